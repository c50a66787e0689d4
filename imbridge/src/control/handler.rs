//! Stock [`ControlHandler`] that turns every command into a queued [`Message`].

use thiserror::Error;

use crate::control::server::ControlHandler;
use crate::control::types::{ControlCommand, Opcode, Status};
use crate::runtime::message::{DecodeError, Message, MessageKind, MessageSender};
use crate::trace::warn;

impl From<Opcode> for MessageKind {
    fn from(op: Opcode) -> Self {
        Self::new(op.code())
    }
}

/// A queued message does not describe a control command.
#[derive(Debug, Error)]
pub enum CommandDecodeError {
    #[error("message kind {0} is not a control opcode")]
    UnknownKind(MessageKind),
    #[error(transparent)]
    Payload(#[from] DecodeError),
}

impl TryFrom<&Message> for ControlCommand {
    type Error = CommandDecodeError;

    fn try_from(msg: &Message) -> Result<Self, Self::Error> {
        let op = Opcode::try_from(msg.kind().code())
            .map_err(|_| CommandDecodeError::UnknownKind(msg.kind()))?;
        Ok(match op {
            Opcode::HideKeyboardSelf => Self::HideKeyboardSelf {
                flags: msg.decode()?,
            },
            Opcode::AdvanceToNext => Self::AdvanceToNext {
                is_current_ime: msg.decode()?,
            },
            Opcode::SetDisplayMode => Self::SetDisplayMode {
                mode: msg.decode()?,
            },
            Opcode::OnKeyboardShowed => Self::OnKeyboardShowed,
        })
    }
}

/// Forwards commands to a message queue and returns without waiting.
///
/// Message kind is the command's opcode; the payload is its single field.
#[derive(Clone)]
pub struct ChannelHandler {
    sender: MessageSender,
}

impl ChannelHandler {
    #[must_use]
    pub const fn new(sender: MessageSender) -> Self {
        Self { sender }
    }

    fn enqueue(&self, command: ControlCommand) -> Status {
        let kind = MessageKind::from(command.opcode());
        let built = match command {
            ControlCommand::HideKeyboardSelf { flags } => Message::new(kind, &flags),
            ControlCommand::AdvanceToNext { is_current_ime } => Message::new(kind, &is_current_ime),
            ControlCommand::SetDisplayMode { mode } => Message::new(kind, &mode),
            ControlCommand::OnKeyboardShowed => Ok(Message::empty(kind)),
        };
        let msg = match built {
            Ok(msg) => msg,
            Err(err) => {
                warn!(opcode = %command.opcode(), error = %err, "failed to build message");
                return Status::NO_MEMORY;
            }
        };
        match self.sender.send(msg) {
            Ok(()) => Status::OK,
            Err(_) => {
                warn!(opcode = %command.opcode(), "message queue closed; command dropped");
                Status::DEAD_OBJECT
            }
        }
    }
}

impl ControlHandler for ChannelHandler {
    fn hide_keyboard_self(&self, flags: i32) -> Status {
        self.enqueue(ControlCommand::HideKeyboardSelf { flags })
    }

    fn advance_to_next(&self, is_current_ime: bool) -> bool {
        self.enqueue(ControlCommand::AdvanceToNext { is_current_ime }).is_ok()
    }

    fn set_display_mode(&self, mode: i32) {
        self.enqueue(ControlCommand::SetDisplayMode { mode });
    }

    fn on_keyboard_showed(&self) {
        self.enqueue(ControlCommand::OnKeyboardShowed);
    }
}
