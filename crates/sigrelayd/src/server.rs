//! WebSocket server for the relay daemon.
//!
//! The server:
//! - Listens on a TCP socket for WebSocket peers
//! - Parses `/<namespace>/<path>/<slot>` from each request target
//! - Registers the peer into its path slot and supervises the session
//! - Supports graceful shutdown via CancellationToken
//!
//! ```text
//! ┌─────────────────┐
//! │ SignalingServer │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept() + handshake
//!         ▼
//! ┌─────────────────┐   get_or_create   ┌─────────────────┐
//! │handle_connection│──────────────────▶│ RegistryHandle  │
//! │   (per peer)    │                   └─────────────────┘
//! └───────┬─────────┘
//!         │ register / supervise / unregister
//!         ▼
//! ┌─────────────────┐
//! │   Path slots    │
//! └─────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sigrelay_protocol::{CloseCode, PathTarget};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::PathClient;
use crate::config::{ConfigError, ServerConfig};
use crate::connection::Connection;
use crate::registry::RegistryHandle;
use crate::session::{supervise, KeepAlive, SessionError, SignalingError};
use crate::ws;

/// Relay server accepting WebSocket peers.
pub struct SignalingServer {
    config: ServerConfig,

    /// Handle to the path registry
    registry: RegistryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for client identities
    connection_counter: AtomicU64,
}

impl SignalingServer {
    pub fn new(
        config: ServerConfig,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        self.config.validate()?;
        TcpListener::bind(self.config.bind)
            .await
            .map_err(|e| ServerError::Bind {
                addr: self.config.bind,
                error: e.to_string(),
            })
    }

    /// Binds and serves until the cancellation token is triggered.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener until cancelled.
    ///
    /// Sessions that are running at shutdown end with their connections.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.config.validate()?;
        let addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr: self.config.bind,
            error: e.to_string(),
        })?;
        info!(addr = %addr, "Signaling server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let id = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.spawn_connection(stream, peer, id);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        info!("Server stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, id: u64) {
        let registry = self.registry.clone();
        let handshake_timeout = self.config.handshake_timeout();
        let max_message_size = self.config.max_message_size;
        let keep_alive = self.config.keep_alive();

        tokio::spawn(async move {
            debug!(peer = %peer, connection = id, "New connection");

            let (connection, target) =
                match timeout(handshake_timeout, ws::accept(stream, max_message_size)).await {
                    Ok(Ok(accepted)) => accepted,
                    Ok(Err(e)) => {
                        warn!(peer = %peer, error = %e, "WebSocket handshake failed");
                        return;
                    }
                    Err(_) => {
                        warn!(peer = %peer, "WebSocket handshake timed out");
                        return;
                    }
                };

            handle_connection(Arc::new(connection), &target, id, &registry, keep_alive).await;
        });
    }
}

/// Runs one peer from admission to unregistration.
///
/// Returns the reason the connection ended. By the time this returns the
/// peer has been closed with the matching close code (if it was still open)
/// and its slot has been released.
pub async fn handle_connection(
    connection: Arc<dyn Connection>,
    target: &str,
    id: u64,
    registry: &RegistryHandle,
    keep_alive: KeepAlive,
) -> SessionError {
    let target = match PathTarget::parse(target) {
        Ok(target) => target,
        Err(e) => {
            let err = SignalingError::from(e);
            warn!(connection = id, error = %err, "Rejecting connection");
            connection.close(CloseCode::Protocol, &err.to_string());
            return err.into();
        }
    };

    let path = match registry.get_or_create(target.name.as_str()).await {
        Ok(path) => path,
        Err(e) => {
            error!(connection = id, error = %e, "Path registry unavailable");
            connection.close(CloseCode::Internal, "");
            return SessionError::Internal(e.to_string());
        }
    };
    debug!(connection = id, target = %target, "Admitted connection");

    let client = Arc::new(PathClient::new(path.name(), target.slot, id, connection));
    path.register_client(Arc::clone(&client));

    let outcome = supervise(Arc::clone(&path), Arc::clone(&client), keep_alive).await;
    match &outcome {
        SessionError::ConnectionClosed => {
            info!(client = %client, "Connection closed");
        }
        SessionError::Signaling(e) => {
            warn!(client = %client, error = %e, "Closing due to protocol error");
            client.close(CloseCode::Protocol, &e.to_string());
        }
        SessionError::Internal(e) => {
            error!(client = %client, error = %e, "Closing due to internal error");
            client.close(CloseCode::Internal, "");
        }
    }

    path.unregister_client(&client);
    outcome
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sigrelay_protocol::Slot;

    use super::*;
    use crate::connection::mock;
    use crate::connection::Payload;
    use crate::registry::spawn_registry;

    #[tokio::test]
    async fn test_invalid_slot_is_rejected_before_path_creation() {
        let registry = spawn_registry();
        let (conn, peer) = mock::pair();

        let outcome =
            handle_connection(conn, "/x/room1/2", 0, &registry, KeepAlive::default()).await;

        assert!(matches!(
            outcome,
            SessionError::Signaling(SignalingError::InvalidTarget(_))
        ));
        assert_eq!(peer.close_code(), Some(CloseCode::Protocol));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_closed_session_releases_slot_without_close_code() {
        let registry = spawn_registry();
        let (conn, mut peer) = mock::pair();

        let task = {
            let registry = registry.clone();
            tokio::spawn(async move {
                handle_connection(conn, "/x/room1/0", 1, &registry, KeepAlive::default()).await
            })
        };

        let path = wait_for_occupant(&registry, "room1", Slot::Zero).await;
        peer.disconnect();

        let outcome = task.await.unwrap();
        assert_eq!(outcome, SessionError::ConnectionClosed);
        assert_eq!(peer.close_code(), None);
        assert!(!path.is_occupied(Slot::Zero));
    }

    #[tokio::test]
    async fn test_pair_relays_both_directions() {
        let registry = spawn_registry();
        let (conn_a, mut peer_a) = mock::pair();
        let (conn_b, mut peer_b) = mock::pair();

        for (conn, target, id) in [(conn_a, "/x/room1/0", 1), (conn_b, "/x/room1/1", 2)] {
            let registry = registry.clone();
            let target = target.to_string();
            tokio::spawn(async move {
                handle_connection(conn, &target, id, &registry, KeepAlive::default()).await
            });
        }
        wait_for_occupant(&registry, "room1", Slot::Zero).await;
        wait_for_occupant(&registry, "room1", Slot::One).await;

        peer_a.send("offer");
        peer_b.send("answer");

        assert_eq!(recv(&mut peer_b).await, Payload::from("offer"));
        assert_eq!(recv(&mut peer_a).await, Payload::from("answer"));
    }

    #[tokio::test]
    async fn test_takeover_closes_previous_with_normal_code() {
        let registry = spawn_registry();
        let (conn_old, peer_old) = mock::pair();
        let (conn_new, peer_new) = mock::pair();

        let old = {
            let registry = registry.clone();
            tokio::spawn(async move {
                handle_connection(conn_old, "/x/room1/0", 1, &registry, KeepAlive::default())
                    .await
            })
        };
        let path = wait_for_occupant(&registry, "room1", Slot::Zero).await;

        {
            let registry = registry.clone();
            tokio::spawn(async move {
                handle_connection(conn_new, "/x/room1/0", 2, &registry, KeepAlive::default())
                    .await
            });
        }

        // The displaced session ends on its own closed connection and must
        // not release the slot held by the newcomer.
        assert_eq!(old.await.unwrap(), SessionError::ConnectionClosed);
        assert_eq!(peer_old.close_code(), Some(CloseCode::Normal));
        assert!(peer_new.is_open());
        assert_eq!(path.occupant(Slot::Zero).unwrap().id(), 2);
    }

    #[tokio::test]
    async fn test_send_to_closed_peer_vacates_sender_slot() {
        let registry = spawn_registry();
        let (conn_a, peer_a) = mock::pair();

        let task = {
            let registry = registry.clone();
            tokio::spawn(async move {
                handle_connection(conn_a, "/x/room1/0", 1, &registry, KeepAlive::default()).await
            })
        };
        let path = wait_for_occupant(&registry, "room1", Slot::Zero).await;

        // A slot-1 occupant whose socket is already gone.
        let (conn_b, mut peer_b) = mock::pair();
        path.register_client(Arc::new(PathClient::new("room1", Slot::One, 2, conn_b)));
        peer_b.disconnect();

        peer_a.send("offer");

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sender session should end")
            .unwrap();
        assert_eq!(outcome, SessionError::ConnectionClosed);
        assert_eq!(peer_a.close_code(), Some(CloseCode::Normal));
        assert!(!path.is_occupied(Slot::Zero));
    }

    #[tokio::test]
    async fn test_bind_rejects_out_of_range_timeout() {
        let config = ServerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            handshake_timeout_secs: 1e30,
            ..ServerConfig::default()
        };
        let server = SignalingServer::new(config, spawn_registry(), CancellationToken::new());

        let err = server.bind().await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Config(ConfigError::Invalid {
                field: "handshake_timeout_secs",
                ..
            })
        ));
    }

    async fn wait_for_occupant(
        registry: &RegistryHandle,
        name: &str,
        slot: Slot,
    ) -> Arc<crate::path::Path> {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(path) = registry.get(name).await {
                    if path.is_occupied(slot) {
                        return path;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("slot should be occupied")
    }

    async fn recv(peer: &mut mock::MockPeer) -> Payload {
        tokio::time::timeout(Duration::from_secs(1), peer.recv())
            .await
            .expect("message should arrive")
            .expect("connection should be open")
    }
}
