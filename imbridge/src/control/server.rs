//! Service-side stub: validates and dispatches incoming requests.

use crate::control::codec::{self, ReplyBody};
use crate::control::types::{ControlCommand, INTERFACE_TOKEN, ProtocolError, Status};
use crate::trace::{debug, trace, warn};

/// Worker-side implementation of the control commands.
///
/// Called on the transport's thread. Implementations are expected to hand
/// the work off (see [`ChannelHandler`](crate::control::handler::ChannelHandler))
/// rather than execute it inline.
pub trait ControlHandler: Send + Sync + 'static {
    /// Returns `Status::OK` once the request is queued.
    fn hide_keyboard_self(&self, flags: i32) -> Status;

    /// The return value is only logged; the caller always sees `true`.
    fn advance_to_next(&self, is_current_ime: bool) -> bool;

    fn set_display_mode(&self, mode: i32);

    fn on_keyboard_showed(&self);
}

/// Decodes requests addressed to one interface token and invokes a
/// [`ControlHandler`].
pub struct ControlServer<H> {
    token: String,
    handler: H,
}

impl<H: ControlHandler> ControlServer<H> {
    pub fn new(handler: H) -> Self {
        Self::with_token(INTERFACE_TOKEN, handler)
    }

    pub fn with_token(token: impl Into<String>, handler: H) -> Self {
        Self {
            token: token.into(),
            handler,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Handles one encoded request and returns the encoded reply.
    ///
    /// Rejected requests (foreign token, unsupported opcode) get an
    /// `UNKNOWN_TRANSACTION` status and never reach the handler.
    pub fn on_remote_request(&self, request: &[u8]) -> Vec<u8> {
        let mut reply = Vec::with_capacity(8);
        match codec::decode_request(request, &self.token) {
            Ok(command) => {
                let body = self.dispatch(command);
                codec::encode_reply(Status::OK, body, &mut reply);
            }
            Err(ProtocolError::UnknownTransaction(rejection)) => {
                warn!(%rejection, "control request rejected");
                codec::encode_reply(Status::UNKNOWN_TRANSACTION, ReplyBody::None, &mut reply);
            }
            Err(err) => {
                warn!(error = %err, "malformed control request");
                codec::encode_reply(Status::INVALID_DATA, ReplyBody::None, &mut reply);
            }
        }
        reply
    }

    fn dispatch(&self, command: ControlCommand) -> ReplyBody {
        trace!(opcode = %command.opcode(), "control request");
        match command {
            ControlCommand::HideKeyboardSelf { flags } => {
                ReplyBody::Int(self.handler.hide_keyboard_self(flags).code())
            }
            ControlCommand::AdvanceToNext { is_current_ime } => {
                if !self.handler.advance_to_next(is_current_ime) {
                    debug!(is_current_ime, "advance-to-next not queued; acknowledging anyway");
                }
                ReplyBody::Bool(true)
            }
            ControlCommand::SetDisplayMode { mode } => {
                self.handler.set_display_mode(mode);
                ReplyBody::None
            }
            ControlCommand::OnKeyboardShowed => {
                self.handler.on_keyboard_showed();
                ReplyBody::None
            }
        }
    }
}
