//! sigrelay protocol - vocabulary shared by the relay daemon and its peers
//!
//! Peers reach the relay with a WebSocket request target of the form
//! `/<namespace>/<path-name>/<slot>`. This crate parses that target and
//! names the close codes the relay emits when it tears a connection down.

pub mod close;
pub mod slot;
pub mod target;

pub use close::CloseCode;
pub use slot::Slot;
pub use target::{PathTarget, TargetError};
