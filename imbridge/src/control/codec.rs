//! Wire encoding for control requests and replies.
//!
//! All integers are little-endian.
//!
//! ```text
//! request  ┌──────────────┬───────────────┬────────────┬──────────────────┐
//!          │ TokenLen(2)  │ Token (utf-8) │ Opcode(4)  │ Payload          │
//!          └──────────────┴───────────────┴────────────┴──────────────────┘
//! reply    ┌──────────────┬──────────────────┐
//!          │ Status(4)    │ Payload          │
//!          └──────────────┴──────────────────┘
//! ```
//!
//! Payloads are fixed width: `i32` fields take 4 bytes, `bool` fields one
//! byte (0 or 1). The token is checked before the opcode is even read.

use crate::control::types::{ControlCommand, Opcode, ProtocolError, Rejection, Status};

/// Reply payload shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyBody {
    None,
    Int(i32),
    Bool(bool),
}

pub(crate) struct FrameWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> FrameWriter<'a> {
    pub(crate) fn new(buf: &'a mut Vec<u8>) -> Self {
        buf.clear();
        Self { buf }
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_bool(&mut self, v: bool) {
        self.put_u8(u8::from(v));
    }

    fn put_token(&mut self, token: &str) -> Result<(), ProtocolError> {
        let len = u16::try_from(token.len()).map_err(|_| ProtocolError::TokenTooLong(token.len()))?;
        self.put_u16(len);
        self.buf.extend_from_slice(token.as_bytes());
        Ok(())
    }
}

pub(crate) struct FrameReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> FrameReader<'a> {
    pub(crate) const fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::BufferTooSmall {
                need: n,
                have: self.remaining(),
            });
        }
        let bytes = &self.buf[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    fn take_u16(&mut self) -> Result<u16, ProtocolError> {
        self.take_array().map(u16::from_le_bytes)
    }

    fn take_u32(&mut self) -> Result<u32, ProtocolError> {
        self.take_array().map(u32::from_le_bytes)
    }

    pub(crate) fn take_i32(&mut self) -> Result<i32, ProtocolError> {
        self.take_array().map(i32::from_le_bytes)
    }

    pub(crate) fn take_bool(&mut self) -> Result<bool, ProtocolError> {
        match self.take_array::<1>()?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::InvalidBool(other)),
        }
    }

    fn take_token(&mut self) -> Result<&'a str, ProtocolError> {
        let len = usize::from(self.take_u16()?);
        std::str::from_utf8(self.take(len)?).map_err(|_| ProtocolError::InvalidToken)
    }
}

/// Encodes `command` behind `token`. The buffer is cleared and reused.
///
/// # Errors
///
/// [`ProtocolError::TokenTooLong`] if the token does not fit its length field.
pub fn encode_request(
    token: &str,
    command: &ControlCommand,
    buf: &mut Vec<u8>,
) -> Result<(), ProtocolError> {
    let mut w = FrameWriter::new(buf);
    w.put_token(token)?;
    w.put_u32(command.opcode().code());
    match *command {
        ControlCommand::HideKeyboardSelf { flags } => w.put_i32(flags),
        ControlCommand::AdvanceToNext { is_current_ime } => w.put_bool(is_current_ime),
        ControlCommand::SetDisplayMode { mode } => w.put_i32(mode),
        ControlCommand::OnKeyboardShowed => {}
    }
    Ok(())
}

/// Decodes a request, rejecting it unless it carries `expected_token`.
///
/// # Errors
///
/// [`ProtocolError::UnknownTransaction`] for a foreign or unreadable token
/// and for an opcode this side does not implement. Other variants for a
/// malformed opcode or payload behind a valid token.
pub fn decode_request(bytes: &[u8], expected_token: &str) -> Result<ControlCommand, ProtocolError> {
    let mut r = FrameReader::new(bytes);

    // A token that cannot be read cannot match.
    let token = r.take_token().map_err(|_| {
        let got = String::from_utf8_lossy(bytes.get(2..).unwrap_or_default());
        ProtocolError::UnknownTransaction(Rejection::TokenMismatch {
            got: got.into_owned(),
        })
    })?;
    if token != expected_token {
        return Err(ProtocolError::UnknownTransaction(Rejection::TokenMismatch {
            got: token.to_owned(),
        }));
    }

    let command = match Opcode::try_from(r.take_u32()?)? {
        Opcode::HideKeyboardSelf => ControlCommand::HideKeyboardSelf {
            flags: r.take_i32()?,
        },
        Opcode::AdvanceToNext => ControlCommand::AdvanceToNext {
            is_current_ime: r.take_bool()?,
        },
        Opcode::SetDisplayMode => ControlCommand::SetDisplayMode {
            mode: r.take_i32()?,
        },
        Opcode::OnKeyboardShowed => ControlCommand::OnKeyboardShowed,
    };
    Ok(command)
}

/// Encodes a reply. The buffer is cleared and reused.
pub fn encode_reply(status: Status, body: ReplyBody, buf: &mut Vec<u8>) {
    let mut w = FrameWriter::new(buf);
    w.put_i32(status.code());
    match body {
        ReplyBody::None => {}
        ReplyBody::Int(v) => w.put_i32(v),
        ReplyBody::Bool(v) => w.put_bool(v),
    }
}

/// Reads the status word of a reply, leaving the reader at the payload.
///
/// # Errors
///
/// [`ProtocolError::BufferTooSmall`] if the reply is shorter than a status.
pub(crate) fn read_status(r: &mut FrameReader<'_>) -> Result<Status, ProtocolError> {
    r.take_i32().map(Status::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::types::INTERFACE_TOKEN;

    #[test]
    fn request_layout() {
        let mut buf = Vec::new();
        encode_request("ab", &ControlCommand::SetDisplayMode { mode: -2 }, &mut buf).unwrap();
        assert_eq!(buf, [2, 0, b'a', b'b', 3, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn decodes_every_opcode() {
        let commands = [
            ControlCommand::HideKeyboardSelf { flags: 0x55 },
            ControlCommand::AdvanceToNext { is_current_ime: true },
            ControlCommand::SetDisplayMode { mode: 1 },
            ControlCommand::OnKeyboardShowed,
        ];
        let mut buf = Vec::new();
        for command in commands {
            encode_request(INTERFACE_TOKEN, &command, &mut buf).unwrap();
            assert_eq!(decode_request(&buf, INTERFACE_TOKEN).unwrap(), command);
        }
    }

    #[test]
    fn foreign_token_is_rejected_before_opcode() {
        let mut buf = Vec::new();
        encode_request("evil.Token", &ControlCommand::OnKeyboardShowed, &mut buf).unwrap();
        // Corrupt the opcode too; the token check must win.
        let len = buf.len();
        buf[len - 4..].copy_from_slice(&999u32.to_le_bytes());

        assert_eq!(
            decode_request(&buf, INTERFACE_TOKEN),
            Err(ProtocolError::UnknownTransaction(Rejection::TokenMismatch {
                got: "evil.Token".into()
            }))
        );
    }

    #[test]
    fn unknown_opcode() {
        let mut buf = Vec::new();
        encode_request(INTERFACE_TOKEN, &ControlCommand::OnKeyboardShowed, &mut buf).unwrap();
        let len = buf.len();
        buf[len - 4..].copy_from_slice(&42u32.to_le_bytes());
        assert_eq!(
            decode_request(&buf, INTERFACE_TOKEN),
            Err(ProtocolError::UnknownTransaction(Rejection::UnknownOpcode(42)))
        );
    }

    #[test]
    fn truncated_payload() {
        let mut buf = Vec::new();
        encode_request(INTERFACE_TOKEN, &ControlCommand::HideKeyboardSelf { flags: 1 }, &mut buf)
            .unwrap();
        buf.truncate(buf.len() - 2);
        assert_eq!(
            decode_request(&buf, INTERFACE_TOKEN),
            Err(ProtocolError::BufferTooSmall { need: 4, have: 2 })
        );
    }

    #[test]
    fn bad_bool_byte() {
        let mut buf = Vec::new();
        encode_request(
            INTERFACE_TOKEN,
            &ControlCommand::AdvanceToNext { is_current_ime: false },
            &mut buf,
        )
        .unwrap();
        *buf.last_mut().unwrap() = 7;
        assert_eq!(
            decode_request(&buf, INTERFACE_TOKEN),
            Err(ProtocolError::InvalidBool(7))
        );
    }

    #[test]
    fn reply_status_then_payload() {
        let mut buf = Vec::new();
        encode_reply(Status::OK, ReplyBody::Int(-12), &mut buf);
        let mut r = FrameReader::new(&buf);
        assert_eq!(read_status(&mut r).unwrap(), Status::OK);
        assert_eq!(r.take_i32().unwrap(), -12);
        assert_eq!(r.remaining(), 0);
    }

    fn is_token_mismatch(result: Result<ControlCommand, ProtocolError>) -> bool {
        matches!(
            result,
            Err(ProtocolError::UnknownTransaction(Rejection::TokenMismatch { .. }))
        )
    }

    #[test]
    fn unreadable_token_is_a_mismatch() {
        assert!(is_token_mismatch(decode_request(&[], INTERFACE_TOKEN)));
        assert!(is_token_mismatch(decode_request(&[9], INTERFACE_TOKEN)));
        // Not utf-8.
        assert!(is_token_mismatch(decode_request(
            &[2, 0, 0xff, 0xfe, 4, 0, 0, 0],
            INTERFACE_TOKEN
        )));
        // Length runs past the buffer.
        assert!(is_token_mismatch(decode_request(&[200, 0, b'x', b'y'], INTERFACE_TOKEN)));
    }

    #[test]
    fn missing_opcode_behind_valid_token_is_malformed() {
        let mut buf = Vec::new();
        encode_request(INTERFACE_TOKEN, &ControlCommand::OnKeyboardShowed, &mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        assert_eq!(
            decode_request(&buf, INTERFACE_TOKEN),
            Err(ProtocolError::BufferTooSmall { need: 4, have: 3 })
        );
    }
}
