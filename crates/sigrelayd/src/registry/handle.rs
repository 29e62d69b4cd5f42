//! Client interface for the registry actor.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::commands::{RegistryCommand, RegistryError};
use crate::path::Path;

/// Cheap-to-clone handle to the registry actor.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Returns the path named `name`, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn get_or_create(&self, name: impl Into<String>) -> Result<Arc<Path>, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::GetOrCreate {
                name: name.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Returns the path named `name` if it exists.
    ///
    /// Returns `None` as well if communication with the actor fails.
    pub async fn get(&self, name: impl Into<String>) -> Option<Arc<Path>> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Get {
                name: name.into(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Returns the number of known paths.
    pub async fn len(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Count { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }

    /// Returns true if no path has been created yet.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
