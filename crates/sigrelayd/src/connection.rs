//! Transport capability consumed by the relay.
//!
//! The relay never touches sockets directly. Everything it needs from a
//! connected peer is expressed by the [`Connection`] trait: liveness,
//! message receive/send, ping round-trips and a close request. The
//! WebSocket implementation lives in [`crate::ws`]; tests use the scripted
//! connection in [`mock`].

use async_trait::async_trait;
use sigrelay_protocol::CloseCode;

/// One opaque application message.
///
/// The frame kind is kept so that a text frame is relayed as a text frame.
/// The relay never looks inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Returns the payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns true if the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

/// A message-framed, bidirectional connection to one peer.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Returns true until the connection is closed or a close was requested.
    fn is_open(&self) -> bool;

    /// Requests that the connection be closed with `code` and `reason`.
    ///
    /// Does not wait for the close handshake. Once called, `is_open` returns
    /// false and later calls are no-ops, so the first code wins.
    fn close(&self, code: CloseCode, reason: &str);

    /// Waits for the next inbound message.
    ///
    /// Returns [`ConnectionError::Closed`] once the connection has ended.
    async fn recv(&self) -> Result<Payload, ConnectionError>;

    /// Hands a message to the transport.
    async fn send(&self, payload: Payload) -> Result<(), ConnectionError>;

    /// Sends a ping and waits for the matching pong.
    async fn ping(&self) -> Result<(), ConnectionError>;
}

/// Errors reported by a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The connection has ended. This is the normal termination signal.
    #[error("Connection closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),
}
