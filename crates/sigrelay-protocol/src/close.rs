//! WebSocket close codes emitted by the relay.

use std::fmt;

/// Close codes the relay sends when it ends a connection.
///
/// The numeric values are fixed by RFC 6455 and are what peers match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// The connection was replaced by a newer peer in the same slot.
    Normal,
    /// The peer violated the signaling protocol (bad target, ping timeout).
    Protocol,
    /// The relay failed internally.
    Internal,
}

impl CloseCode {
    /// Returns the numeric close code.
    pub const fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::Protocol => 1002,
            CloseCode::Internal => 1011,
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}
