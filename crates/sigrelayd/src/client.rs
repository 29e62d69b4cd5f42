//! Server-side representative of one connected peer.

use std::fmt;
use std::sync::Arc;

use sigrelay_protocol::{CloseCode, Slot};
use tracing::debug;

use crate::connection::{Connection, ConnectionError, Payload};

/// A peer bound to one slot of one path.
///
/// The slot is fixed for the client's lifetime. Two clients are the same
/// client only if they are the same allocation; see [`Path`](crate::path::Path).
pub struct PathClient {
    /// Display name, `path.<name>.<slot>`
    name: String,

    /// Connection number assigned by the server
    id: u64,

    slot: Slot,

    connection: Arc<dyn Connection>,
}

impl PathClient {
    /// Creates a client for `slot` on the path named `path_name`.
    pub fn new(path_name: &str, slot: Slot, id: u64, connection: Arc<dyn Connection>) -> Self {
        let client = Self {
            name: format!("path.{path_name}.{slot}"),
            id,
            slot,
            connection,
        };
        if client.is_open() {
            debug!(client = %client, "Open");
        }
        client
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Returns the liveness of the underlying connection.
    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    /// Requests a close with `code` and `reason`. No-op if already closed.
    pub fn close(&self, code: CloseCode, reason: &str) {
        if self.is_open() {
            debug!(client = %self, code = %code, reason, "Closing");
            self.connection.close(code, reason);
        }
    }

    /// Waits for the next message from the peer.
    pub async fn receive(&self) -> Result<Payload, ConnectionError> {
        self.connection.recv().await
    }

    /// Hands `payload` to the peer's transport.
    pub async fn send(&self, payload: Payload) -> Result<(), ConnectionError> {
        self.connection.send(payload).await
    }

    /// Completes one ping/pong round-trip.
    pub async fn ping(&self) -> Result<(), ConnectionError> {
        self.connection.ping().await
    }
}

impl fmt::Display for PathClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

impl fmt::Debug for PathClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathClient")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock;

    #[test]
    fn test_name_includes_path_and_slot() {
        let (conn, _peer) = mock::pair();
        let client = PathClient::new("room1", Slot::One, 7, conn);
        assert_eq!(client.name(), "path.room1.1");
        assert_eq!(client.to_string(), "path.room1.1#7");
        assert_eq!(client.slot(), Slot::One);
    }

    #[tokio::test]
    async fn test_close_is_noop_when_closed() {
        let (conn, peer) = mock::pair();
        let client = PathClient::new("room1", Slot::Zero, 1, conn);

        client.close(CloseCode::Protocol, "ping timeout");
        assert!(!client.is_open());

        client.close(CloseCode::Normal, "");
        assert_eq!(peer.close_code(), Some(CloseCode::Protocol));
    }

    #[tokio::test]
    async fn test_receive_reports_closed_after_disconnect() {
        let (conn, mut peer) = mock::pair();
        let client = PathClient::new("room1", Slot::Zero, 1, conn);

        peer.send("offer");
        assert_eq!(client.receive().await, Ok(Payload::from("offer")));

        peer.disconnect();
        assert_eq!(client.receive().await, Err(ConnectionError::Closed));
        assert!(client.send(Payload::from("late")).await.is_err());
    }
}
