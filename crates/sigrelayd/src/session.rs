//! Supervised per-client session.
//!
//! Every registered client runs two tasks until one of them ends:
//!
//! - **keep-alive** pings the client and fails with [`SignalingError::PingTimeout`]
//!   when a pong does not arrive in time.
//! - **relay** reads the client's messages and forwards each one, unmodified,
//!   to whoever occupies the other slot of the path at that moment.
//!
//! Neither task is meant to finish. The first one that does decides the
//! session outcome; the other is cancelled through a [`CancellationToken`]
//! and awaited before [`supervise`] returns, so no task outlives its session.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sigrelay_protocol::{CloseCode, TargetError};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::client::PathClient;
use crate::connection::ConnectionError;
use crate::path::Path;

/// Time between a pong and the next ping.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Maximum time to wait for a pong.
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Keep-alive timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            interval: PING_INTERVAL,
            timeout: PING_TIMEOUT,
        }
    }
}

/// The two supervised tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    KeepAlive,
    Relay,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::KeepAlive => write!(f, "keep-alive"),
            TaskKind::Relay => write!(f, "relay"),
        }
    }
}

/// Violations of the signaling protocol. Always closed with 1002.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Ping timeout")]
    PingTimeout,

    #[error("Task {task} returned unexpectedly")]
    TaskReturned { task: TaskKind },

    #[error(transparent)]
    InvalidTarget(#[from] TargetError),
}

/// Why a session ended.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The client's connection went away. Not a failure.
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Returns the close code to send, or `None` when the connection is
    /// already closed.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            SessionError::ConnectionClosed => None,
            SessionError::Signaling(_) => Some(CloseCode::Protocol),
            SessionError::Internal(_) => Some(CloseCode::Internal),
        }
    }
}

impl From<ConnectionError> for SessionError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Closed => SessionError::ConnectionClosed,
            ConnectionError::Transport(e) => SessionError::Internal(e),
        }
    }
}

/// Runs keep-alive and relay for `client` until one of them ends.
///
/// Never returns normally: the returned error is the reason the session
/// ended. The sibling task has been cancelled and has finished by the time
/// this returns.
pub async fn supervise(
    path: Arc<Path>,
    client: Arc<PathClient>,
    settings: KeepAlive,
) -> SessionError {
    let cancel = CancellationToken::new();
    let pinger = keep_alive(Arc::clone(&client), settings, cancel.child_token());
    let channel = relay(path, Arc::clone(&client), cancel.child_token());
    supervise_tasks(&client, cancel, pinger, channel).await
}

/// Spawns both tasks, waits for the first to finish, then cancels and
/// drains the other.
///
/// Both futures must return `Ok(())` only once `cancel` has fired.
async fn supervise_tasks<K, R>(
    client: &PathClient,
    cancel: CancellationToken,
    keep_alive: K,
    relay: R,
) -> SessionError
where
    K: Future<Output = Result<(), SessionError>> + Send + 'static,
    R: Future<Output = Result<(), SessionError>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    tasks.spawn(async move { (TaskKind::KeepAlive, keep_alive.await) });
    tasks.spawn(async move { (TaskKind::Relay, relay.await) });

    let first = tasks.join_next().await;

    cancel.cancel();
    while let Some(rest) = tasks.join_next().await {
        match rest {
            Ok((task, Ok(()))) => debug!(client = %client, task = %task, "Task cancelled"),
            Ok((task, Err(e))) => {
                debug!(client = %client, task = %task, error = %e, "Task failed during cancellation")
            }
            Err(e) => error!(client = %client, error = %e, "Task panicked during cancellation"),
        }
    }

    match first {
        Some(Ok((task, Ok(())))) => {
            error!(client = %client, task = %task, "Task returned unexpectedly");
            SignalingError::TaskReturned { task }.into()
        }
        Some(Ok((_, Err(e)))) => e,
        Some(Err(e)) => SessionError::Internal(e.to_string()),
        None => SessionError::Internal("no session tasks were started".to_string()),
    }
}

/// Pings `client` forever. Returns `Ok(())` only when cancelled.
pub async fn keep_alive(
    client: Arc<PathClient>,
    settings: KeepAlive,
    cancel: CancellationToken,
) -> Result<(), SessionError> {
    loop {
        trace!(client = %client, "Ping");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(client = %client, "Ping cancelled");
                return Ok(());
            }
            result = timeout(settings.timeout, client.ping()) => match result {
                Ok(Ok(())) => trace!(client = %client, "Pong"),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(SignalingError::PingTimeout.into()),
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(client = %client, "Ping cancelled");
                return Ok(());
            }
            _ = sleep(settings.interval) => {}
        }
    }
}

/// Forwards messages from `client` to the other slot's occupant forever.
/// Returns `Ok(())` only when cancelled.
pub async fn relay(
    path: Arc<Path>,
    client: Arc<PathClient>,
    cancel: CancellationToken,
) -> Result<(), SessionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(client = %client, "Channel cancelled");
            Ok(())
        }
        result = relay_messages(&path, &client) => result,
    }
}

async fn relay_messages(path: &Path, client: &PathClient) -> Result<(), SessionError> {
    loop {
        let message = client.receive().await?;
        let length = message.len();
        info!(client = %client, bytes = length, "Received message");
        trace!(client = %client, message = ?message, "<<");

        if !path.is_occupied(client.slot().other()) {
            info!(client = %client, "Waiting for other client");
        }
        let other = path.wait_other_client(client).await;

        info!(client = %other, bytes = length, "Sending message");
        trace!(client = %other, message = ?message, ">>");
        other.send(message).await?;
    }
}
