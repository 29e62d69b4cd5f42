//! Registry actor commands and errors.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::path::Path;

/// Commands sent to the registry actor.
///
/// Each command carries a oneshot channel for the response.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Look up a path by name, creating it on first use.
    GetOrCreate {
        name: String,
        respond_to: oneshot::Sender<Arc<Path>>,
    },

    /// Look up a path without creating it.
    Get {
        name: String,
        respond_to: oneshot::Sender<Option<Arc<Path>>>,
    },

    /// Number of known paths.
    Count {
        respond_to: oneshot::Sender<usize>,
    },
}

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The actor stopped before answering.
    #[error("registry channel closed")]
    ChannelClosed,
}
