//! Pin lifecycle for published roots.
//!
//! Pin and unpin failures only affect retention, so they are logged and
//! reported but never returned as errors.

use std::fmt;

use cairn_core::Cid;
use cairn_store::{ErrorKind, Store};

/// Result of a single pin or unpin attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    Done,
    Failed(ErrorKind),
    /// Pin management is disabled.
    Skipped,
}

impl fmt::Display for PinOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinOutcome::Done => write!(f, "done"),
            PinOutcome::Failed(kind) => write!(f, "failed ({kind})"),
            PinOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// What a reconcile or reverse attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinReport {
    /// `None` when there was nothing to unpin.
    pub unpinned: Option<PinOutcome>,
    pub pinned: PinOutcome,
}

#[derive(Clone, Copy)]
pub struct PinLifecycle<'a> {
    store: &'a dyn Store,
    enabled: bool,
}

impl<'a> PinLifecycle<'a> {
    pub fn new(store: &'a dyn Store, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub async fn pin(&self, cid: &Cid, recursive: bool) -> PinOutcome {
        if !self.enabled {
            return PinOutcome::Skipped;
        }
        match self.store.pin_add(cid, recursive).await {
            Ok(()) => {
                tracing::info!(cid = %cid, "pinned");
                PinOutcome::Done
            }
            Err(e) => {
                tracing::warn!(cid = %cid, error = %e, "pin failed");
                PinOutcome::Failed(e.kind)
            }
        }
    }

    pub async fn unpin(&self, cid: &Cid, recursive: bool) -> PinOutcome {
        if !self.enabled {
            return PinOutcome::Skipped;
        }
        match self.store.pin_rm(cid, recursive).await {
            Ok(()) => {
                tracing::info!(cid = %cid, "unpinned");
                PinOutcome::Done
            }
            Err(e) => {
                tracing::warn!(cid = %cid, error = %e, "unpin failed");
                PinOutcome::Failed(e.kind)
            }
        }
    }

    /// Move retention from `old` to `new`.
    ///
    /// `unpin(old)` is attempted when `old` exists and differs from `new`;
    /// `pin(new)` is attempted whatever the unpin outcome was.
    pub async fn reconcile(&self, old: Option<&Cid>, new: &Cid) -> PinReport {
        let unpinned = match old {
            Some(old) if old != new => Some(self.unpin(old, true).await),
            _ => None,
        };
        let pinned = self.pin(new, true).await;
        PinReport { unpinned, pinned }
    }

    /// Undo a reconcile: re-pin `old`, release `new`.
    pub async fn reverse(&self, old: &Cid, new: &Cid) -> PinReport {
        let pinned = self.pin(old, true).await;
        let unpinned = if old != new {
            Some(self.unpin(new, true).await)
        } else {
            None
        };
        PinReport { unpinned, pinned }
    }
}

#[cfg(test)]
mod tests {
    use cairn_core::{DagNode, Link};
    use cairn_store::memory::{Op, Operation};
    use cairn_store::MemoryStore;

    use super::*;

    fn two_roots(store: &MemoryStore) -> (Cid, Cid) {
        let leaf = store.insert_blob(b"x");
        let a = store.insert_node(&DagNode::directory(vec![Link::new("a", leaf.clone(), 1)]));
        let b = store.insert_node(&DagNode::directory(vec![Link::new("b", leaf, 1)]));
        (a.cid, b.cid)
    }

    #[tokio::test]
    async fn reconcile_moves_pin_to_new_root() {
        let store = MemoryStore::new();
        let (old, new) = two_roots(&store);
        store.pin_directly(&old);

        let report = PinLifecycle::new(&store, true).reconcile(Some(&old), &new).await;
        assert_eq!(report.unpinned, Some(PinOutcome::Done));
        assert_eq!(report.pinned, PinOutcome::Done);
        assert_eq!(store.pinned(), vec![new]);
    }

    #[tokio::test]
    async fn failed_unpin_still_pins_new_root() {
        let store = MemoryStore::new().fail_on(Op::PinRm, ErrorKind::Network);
        let (old, new) = two_roots(&store);

        let report = PinLifecycle::new(&store, true).reconcile(Some(&old), &new).await;
        assert_eq!(report.unpinned, Some(PinOutcome::Failed(ErrorKind::Network)));
        assert_eq!(report.pinned, PinOutcome::Done);
        assert!(store.is_pinned(&new));
        let ops = store.operations();
        assert!(ops.contains(&Operation::PinRm { cid: old }));
        assert!(ops.contains(&Operation::PinAdd { cid: new }));
    }

    #[tokio::test]
    async fn same_root_is_not_unpinned() {
        let store = MemoryStore::new();
        let (root, _) = two_roots(&store);

        let report = PinLifecycle::new(&store, true).reconcile(Some(&root), &root).await;
        assert_eq!(report.unpinned, None);
        assert!(store.is_pinned(&root));
    }

    #[tokio::test]
    async fn disabled_lifecycle_skips_every_call() {
        let store = MemoryStore::new();
        let (old, new) = two_roots(&store);

        let report = PinLifecycle::new(&store, false).reconcile(Some(&old), &new).await;
        assert_eq!(report.unpinned, Some(PinOutcome::Skipped));
        assert_eq!(report.pinned, PinOutcome::Skipped);
        assert!(store.operations().is_empty());
    }

    #[tokio::test]
    async fn reverse_pins_old_and_releases_new() {
        let store = MemoryStore::new();
        let (old, new) = two_roots(&store);
        store.pin_directly(&new);

        let report = PinLifecycle::new(&store, true).reverse(&old, &new).await;
        assert_eq!(report.pinned, PinOutcome::Done);
        assert_eq!(report.unpinned, Some(PinOutcome::Done));
        assert_eq!(store.pinned(), vec![old]);
    }
}
