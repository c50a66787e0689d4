//! Caller-side proxy for the control channel.

use crate::control::codec::{self, FrameReader};
use crate::control::transport::Transport;
use crate::control::types::{
    ControlCommand, ControlError, INTERFACE_TOKEN, ProtocolError, Rejection, Status,
};
use crate::trace::trace;

/// Encodes commands, sends them over a [`Transport`] and parses the replies.
///
/// Every call is a single round trip; failures are returned, never retried.
pub struct ControlProxy<T> {
    transport: T,
    token: String,
}

impl<T: Transport> ControlProxy<T> {
    pub fn new(transport: T) -> Self {
        Self::with_token(transport, INTERFACE_TOKEN)
    }

    /// A proxy that stamps requests with `token` instead of [`INTERFACE_TOKEN`].
    pub fn with_token(transport: T, token: impl Into<String>) -> Self {
        Self {
            transport,
            token: token.into(),
        }
    }

    /// Asks the worker side to hide its keyboard.
    ///
    /// Returns the handler's result code: `Status::OK` once the request was
    /// queued, `Status::NO_MEMORY` if it could not be built.
    ///
    /// # Errors
    ///
    /// See [`ControlError`].
    pub fn hide_keyboard_self(&self, flags: i32) -> Result<Status, ControlError> {
        self.call(ControlCommand::HideKeyboardSelf { flags }, |r| {
            r.take_i32().map(Status::from)
        })
    }

    /// Asks the worker side to switch to the next engine.
    ///
    /// # Errors
    ///
    /// See [`ControlError`].
    pub fn advance_to_next(&self, is_current_ime: bool) -> Result<bool, ControlError> {
        self.call(ControlCommand::AdvanceToNext { is_current_ime }, |r| r.take_bool())
    }

    /// # Errors
    ///
    /// See [`ControlError`].
    pub fn set_display_mode(&self, mode: i32) -> Result<(), ControlError> {
        self.call(ControlCommand::SetDisplayMode { mode }, |_| Ok(()))
    }

    /// # Errors
    ///
    /// See [`ControlError`].
    pub fn on_keyboard_showed(&self) -> Result<(), ControlError> {
        self.call(ControlCommand::OnKeyboardShowed, |_| Ok(()))
    }

    fn call<R>(
        &self,
        command: ControlCommand,
        parse: impl FnOnce(&mut FrameReader<'_>) -> Result<R, ProtocolError>,
    ) -> Result<R, ControlError> {
        let mut request = Vec::with_capacity(self.token.len() + 16);
        codec::encode_request(&self.token, &command, &mut request)?;
        trace!(opcode = %command.opcode(), bytes = request.len(), "control request out");

        let reply = self.transport.send_request(&request)?;
        let mut r = FrameReader::new(&reply);
        match codec::read_status(&mut r)? {
            Status::OK => Ok(parse(&mut r)?),
            Status::UNKNOWN_TRANSACTION => {
                Err(ProtocolError::UnknownTransaction(Rejection::ByPeer).into())
            }
            status => Err(ControlError::Remote(status)),
        }
    }
}
