//! Types shared by both ends of the control channel.

use std::fmt;

use thiserror::Error;

use crate::control::transport::TransportError;

/// Interface token every request must start with.
pub const INTERFACE_TOKEN: &str = "imbridge.InputControlChannel";

/// Transaction codes carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    HideKeyboardSelf = 1,
    AdvanceToNext = 2,
    SetDisplayMode = 3,
    OnKeyboardShowed = 4,
}

impl Opcode {
    pub const ALL: [Self; 4] = [
        Self::HideKeyboardSelf,
        Self::AdvanceToNext,
        Self::SetDisplayMode,
        Self::OnKeyboardShowed,
    ];

    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Opcode {
    type Error = ProtocolError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::HideKeyboardSelf),
            2 => Ok(Self::AdvanceToNext),
            3 => Ok(Self::SetDisplayMode),
            4 => Ok(Self::OnKeyboardShowed),
            other => Err(ProtocolError::UnknownTransaction(Rejection::UnknownOpcode(
                other,
            ))),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HideKeyboardSelf => "HIDE_KEYBOARD_SELF",
            Self::AdvanceToNext => "ADVANCE_TO_NEXT",
            Self::SetDisplayMode => "SET_DISPLAY_MODE",
            Self::OnKeyboardShowed => "ON_KEYBOARD_SHOWED",
        };
        f.write_str(s)
    }
}

/// A decoded control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    HideKeyboardSelf { flags: i32 },
    AdvanceToNext { is_current_ime: bool },
    SetDisplayMode { mode: i32 },
    OnKeyboardShowed,
}

impl ControlCommand {
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::HideKeyboardSelf { .. } => Opcode::HideKeyboardSelf,
            Self::AdvanceToNext { .. } => Opcode::AdvanceToNext,
            Self::SetDisplayMode { .. } => Opcode::SetDisplayMode,
            Self::OnKeyboardShowed => Opcode::OnKeyboardShowed,
        }
    }
}

/// Transaction status code, written first in every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(i32);

impl Status {
    pub const OK: Self = Self(0);
    pub const INVALID_DATA: Self = Self(-22);
    pub const NO_MEMORY: Self = Self(-12);
    pub const DEAD_OBJECT: Self = Self(-32);
    pub const UNKNOWN_TRANSACTION: Self = Self(-74);

    #[must_use]
    pub const fn code(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::OK => "OK",
            Self::INVALID_DATA => "INVALID_DATA",
            Self::NO_MEMORY => "NO_MEMORY",
            Self::DEAD_OBJECT => "DEAD_OBJECT",
            Self::UNKNOWN_TRANSACTION => "UNKNOWN_TRANSACTION",
            Self(code) => return write!(f, "status {code}"),
        };
        write!(f, "{name} ({})", self.0)
    }
}

/// Why a request was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    TokenMismatch { got: String },
    UnknownOpcode(u32),
    /// The peer answered `UNKNOWN_TRANSACTION`.
    ByPeer,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenMismatch { got } => write!(f, "interface token mismatch: {got:?}"),
            Self::UnknownOpcode(code) => write!(f, "unsupported opcode {code}"),
            Self::ByPeer => f.write_str("rejected by peer"),
        }
    }
}

/// Encoding and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown transaction: {0}")]
    UnknownTransaction(Rejection),

    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("invalid bool byte: 0x{0:02x}")]
    InvalidBool(u8),

    #[error("interface token is not valid utf-8")]
    InvalidToken,

    #[error("interface token too long: {0} bytes")]
    TokenTooLong(usize),
}

/// Anything that can go wrong on the calling side of a control request.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("remote returned {0}")]
    Remote(Status),
}
