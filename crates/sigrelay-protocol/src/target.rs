//! Request target parsing.
//!
//! A peer selects its rendezvous path and slot through the WebSocket request
//! target:
//!
//! ```text
//! /<namespace>/<path-name>/<slot>
//! ```
//!
//! The namespace is the first segment, the slot is the last one and every
//! segment in between belongs to the path name, so `/rtc/team/room1/0` names
//! path `team/room1`. Paths are identified by name alone; the namespace is
//! informational.

use std::fmt;

use thiserror::Error;

use crate::slot::{Slot, SlotError};

/// A parsed and validated request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTarget {
    /// First segment of the target.
    pub namespace: String,
    /// Rendezvous path name.
    pub name: String,
    /// Slot the peer asks to occupy.
    pub slot: Slot,
}

impl PathTarget {
    /// Parses a request target path.
    ///
    /// The input is the path component only; callers strip the query string
    /// before parsing.
    ///
    /// # Errors
    ///
    /// Returns a [`TargetError`] when the leading slash is missing, when
    /// fewer than three segments are present, when any segment is empty, or
    /// when the last segment is not exactly `0` or `1`.
    pub fn parse(target: &str) -> Result<Self, TargetError> {
        let rest = target
            .strip_prefix('/')
            .ok_or_else(|| TargetError::NotAbsolute(target.to_string()))?;

        let (rest, slot) = rest
            .rsplit_once('/')
            .ok_or_else(|| TargetError::MissingSegments(target.to_string()))?;

        let (namespace, name) = rest
            .split_once('/')
            .ok_or_else(|| TargetError::MissingSegments(target.to_string()))?;

        if namespace.is_empty() || name.split('/').any(str::is_empty) {
            return Err(TargetError::EmptySegment(target.to_string()));
        }

        let slot = slot.parse::<Slot>().map_err(|source| TargetError::InvalidSlot {
            target: target.to_string(),
            source,
        })?;

        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            slot,
        })
    }
}

impl fmt::Display for PathTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}/{}", self.namespace, self.name, self.slot)
    }
}

/// Reasons a request target is rejected at admission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("Invalid path: {0} (must start with '/')")]
    NotAbsolute(String),

    #[error("Invalid path: {0} (expected /<namespace>/<path>/<slot>)")]
    MissingSegments(String),

    #[error("Invalid path: {0} (empty segment)")]
    EmptySegment(String),

    #[error("Invalid path: {target} ({source})")]
    InvalidSlot {
        target: String,
        #[source]
        source: SlotError,
    },
}
