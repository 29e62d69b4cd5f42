//! Rendezvous paths and their two slot cells.
//!
//! Each slot is a `watch` channel holding the current occupant. The channel
//! gives exactly the cell semantics the relay needs:
//!
//! - `register` is `send_replace`: last writer wins, the displaced occupant
//!   is handed back so it can be closed.
//! - `unregister` is `send_if_modified` with an identity check, so a stale
//!   session cannot clear a slot that was already taken over.
//! - `wait_other_client` subscribes to the opposite cell and waits for it to
//!   be filled, re-reading the cell on every call.
//!
//! Every cell has its own lock; paths never contend with each other.

use std::sync::Arc;

use sigrelay_protocol::{CloseCode, Slot};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::PathClient;

type SlotCell = watch::Sender<Option<Arc<PathClient>>>;

/// One rendezvous session, identified by name.
pub struct Path {
    name: String,
    slots: [SlotCell; 2],
}

impl Path {
    /// Creates a path with both slots empty.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: [watch::channel(None).0, watch::channel(None).0],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn cell(&self, slot: Slot) -> &SlotCell {
        match slot {
            Slot::Zero => &self.slots[0],
            Slot::One => &self.slots[1],
        }
    }

    /// Returns the current occupant of `slot`, if any.
    pub fn occupant(&self, slot: Slot) -> Option<Arc<PathClient>> {
        self.cell(slot).borrow().clone()
    }

    pub fn is_occupied(&self, slot: Slot) -> bool {
        self.cell(slot).borrow().is_some()
    }

    /// Installs `client` in its slot, closing any previous occupant.
    pub fn register_client(&self, client: Arc<PathClient>) {
        let slot = client.slot();
        let previous = self.cell(slot).send_replace(Some(Arc::clone(&client)));

        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &client) {
                warn!(
                    path = %self.name,
                    slot = %slot,
                    previous = %previous,
                    "Slot taken over, closing previous client"
                );
                previous.close(CloseCode::Normal, "");
                info!(path = %self.name, client = %previous, "Unregistered client");
            }
        }

        info!(path = %self.name, client = %client, "Registered client");
    }

    /// Removes `client` from its slot and closes it.
    ///
    /// Does nothing if the slot is empty or holds a different client.
    /// Returns true if `client` was the occupant.
    pub fn unregister_client(&self, client: &Arc<PathClient>) -> bool {
        let slot = client.slot();
        let mut was_empty = false;

        let removed = self.cell(slot).send_if_modified(|current| match current {
            Some(occupant) if Arc::ptr_eq(occupant, client) => {
                *current = None;
                true
            }
            Some(_) => false,
            None => {
                was_empty = true;
                false
            }
        });

        if !removed {
            if was_empty {
                warn!(path = %self.name, slot = %slot, client = %client, "Slot is empty");
            } else {
                warn!(path = %self.name, slot = %slot, client = %client, "Different client");
            }
            return false;
        }

        client.close(CloseCode::Normal, "");
        info!(path = %self.name, client = %client, "Unregistered client");
        true
    }

    /// Waits until the slot opposite `client` is occupied and returns the
    /// occupant at that moment.
    ///
    /// Resolves immediately when the slot is already filled. The cell is
    /// read anew on every call; callers must not cache the result across
    /// messages.
    pub async fn wait_other_client(&self, client: &PathClient) -> Arc<PathClient> {
        let mut occupant = self.cell(client.slot().other()).subscribe();
        loop {
            let current = occupant.borrow_and_update().clone();
            if let Some(other) = current {
                return other;
            }
            // `self` owns the sender, so the cell cannot close while borrowed.
            if occupant.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl std::fmt::Debug for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Path")
            .field("name", &self.name)
            .field("slot0", &self.occupant(Slot::Zero))
            .field("slot1", &self.occupant(Slot::One))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connection::mock::{self, MockPeer};

    fn client(path: &Path, slot: Slot, id: u64) -> (Arc<PathClient>, MockPeer) {
        let (conn, peer) = mock::pair();
        (Arc::new(PathClient::new(path.name(), slot, id, conn)), peer)
    }

    #[test]
    fn test_register_fills_slot() {
        let path = Path::new("room1");
        let (a, _peer) = client(&path, Slot::Zero, 1);

        path.register_client(Arc::clone(&a));

        assert!(path.is_occupied(Slot::Zero));
        assert!(!path.is_occupied(Slot::One));
        assert!(Arc::ptr_eq(&path.occupant(Slot::Zero).unwrap(), &a));
    }

    #[test]
    fn test_register_replaces_and_closes_previous() {
        let path = Path::new("room1");
        let (old, old_peer) = client(&path, Slot::Zero, 1);
        let (new, new_peer) = client(&path, Slot::Zero, 2);

        path.register_client(Arc::clone(&old));
        path.register_client(Arc::clone(&new));

        assert_eq!(old_peer.close_code(), Some(CloseCode::Normal));
        assert!(!old.is_open());
        assert!(new_peer.is_open());
        assert!(Arc::ptr_eq(&path.occupant(Slot::Zero).unwrap(), &new));
    }

    #[test]
    fn test_unregister_stale_client_keeps_occupant() {
        let path = Path::new("room1");
        let (old, _old_peer) = client(&path, Slot::Zero, 1);
        let (new, new_peer) = client(&path, Slot::Zero, 2);

        path.register_client(Arc::clone(&old));
        path.register_client(Arc::clone(&new));

        assert!(!path.unregister_client(&old));
        assert!(new_peer.is_open());
        assert!(Arc::ptr_eq(&path.occupant(Slot::Zero).unwrap(), &new));
    }

    #[test]
    fn test_unregister_empty_slot_is_noop() {
        let path = Path::new("room1");
        let (a, peer) = client(&path, Slot::One, 1);

        assert!(!path.unregister_client(&a));
        assert!(peer.is_open());
        assert!(!path.is_occupied(Slot::One));
    }

    #[test]
    fn test_unregister_occupant_closes_and_clears() {
        let path = Path::new("room1");
        let (a, peer) = client(&path, Slot::One, 1);

        path.register_client(Arc::clone(&a));
        assert!(path.unregister_client(&a));

        assert!(!path.is_occupied(Slot::One));
        assert_eq!(peer.close_code(), Some(CloseCode::Normal));

        // A second unregister finds the slot empty.
        assert!(!path.unregister_client(&a));
    }

    #[tokio::test]
    async fn test_wait_other_resolves_immediately_when_present() {
        let path = Path::new("room1");
        let (a, _pa) = client(&path, Slot::Zero, 1);
        let (b, _pb) = client(&path, Slot::One, 2);
        path.register_client(Arc::clone(&a));
        path.register_client(Arc::clone(&b));

        let other = tokio::time::timeout(Duration::from_millis(100), path.wait_other_client(&a))
            .await
            .expect("should resolve immediately");
        assert!(Arc::ptr_eq(&other, &b));
    }

    #[tokio::test]
    async fn test_wait_other_resolves_on_late_registration() {
        let path = Arc::new(Path::new("room1"));
        let (a, _pa) = client(&path, Slot::Zero, 1);
        let (b, _pb) = client(&path, Slot::One, 2);
        path.register_client(Arc::clone(&a));

        let waiter = {
            let path = Arc::clone(&path);
            let a = Arc::clone(&a);
            tokio::spawn(async move { path.wait_other_client(&a).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        path.register_client(Arc::clone(&b));
        let other = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve")
            .unwrap();
        assert!(Arc::ptr_eq(&other, &b));
    }

    #[tokio::test]
    async fn test_wait_other_sees_replacement() {
        let path = Path::new("room1");
        let (a, _pa) = client(&path, Slot::Zero, 1);
        let (b1, _pb1) = client(&path, Slot::One, 2);
        let (b2, _pb2) = client(&path, Slot::One, 3);
        path.register_client(Arc::clone(&a));

        path.register_client(Arc::clone(&b1));
        assert!(Arc::ptr_eq(&path.wait_other_client(&a).await, &b1));

        path.register_client(Arc::clone(&b2));
        assert!(Arc::ptr_eq(&path.wait_other_client(&a).await, &b2));
    }

    #[tokio::test]
    async fn test_wait_other_blocks_after_peer_leaves() {
        let path = Path::new("room1");
        let (a, _pa) = client(&path, Slot::Zero, 1);
        let (b, _pb) = client(&path, Slot::One, 2);
        path.register_client(Arc::clone(&a));
        path.register_client(Arc::clone(&b));
        path.unregister_client(&b);

        let waited =
            tokio::time::timeout(Duration::from_millis(50), path.wait_other_client(&a)).await;
        assert!(waited.is_err());
    }
}
