//! Path registry using the actor pattern.
//!
//! The registry maps path names to [`Path`]s. It is the only owner of the
//! map: lookups and lazy creation are commands processed one at a time by
//! a single task, so two peers naming the same path always receive the same
//! `Arc<Path>`.
//!
//! ```text
//! ┌─────────────────┐  RegistryCommand  ┌─────────────────┐
//! │ connection task │──────(mpsc)──────▶│  RegistryActor  │
//! └─────────────────┘                   └────────┬────────┘
//!         ▲                                      │
//!         │          Arc<Path> (oneshot)         │
//!         └──────────────────────────────────────┘
//! ```
//!
//! The actor only hands out paths. Slot state lives inside each `Path` and
//! is never touched by the actor, so a busy path does not slow down the
//! lookup of another one. Paths live for the lifetime of the process.
//!
//! [`Path`]: crate::path::Path

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

/// Command channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// # Example
///
/// ```no_run
/// use sigrelayd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let registry = spawn_registry();
///     let path = registry.get_or_create("room1").await.unwrap();
///     assert_eq!(path.name(), "room1");
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx)
}
