//! Registry actor - owns the path map and processes commands.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::commands::RegistryCommand;
use crate::path::Path;

/// The registry actor.
///
/// Receives commands via mpsc and processes them sequentially in a single
/// task. All map mutations happen inside that task.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    paths: HashMap<String, Arc<Path>>,
}

impl RegistryActor {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            receiver,
            paths: HashMap::new(),
        }
    }

    /// Runs the actor until every handle has been dropped.
    pub async fn run(mut self) {
        info!("Path registry starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(paths = self.paths.len(), "Path registry stopped");
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        // Send errors only mean the caller went away.
        match cmd {
            RegistryCommand::GetOrCreate { name, respond_to } => {
                let _ = respond_to.send(self.handle_get_or_create(name));
            }
            RegistryCommand::Get { name, respond_to } => {
                let _ = respond_to.send(self.paths.get(&name).cloned());
            }
            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.paths.len());
            }
        }
    }

    fn handle_get_or_create(&mut self, name: String) -> Arc<Path> {
        if let Some(path) = self.paths.get(&name) {
            debug!(path = %name, "Using path");
            return Arc::clone(path);
        }

        let path = Arc::new(Path::new(name.clone()));
        self.paths.insert(name, Arc::clone(&path));
        info!(path = %path.name(), total = self.paths.len(), "Created path");
        path
    }

    #[cfg(test)]
    pub fn path_count(&self) -> usize {
        self.paths.len()
    }
}
