//! Read side of every task's status.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::recorder::TaskStatus;

/// Registry of status receivers, keyed by channel identifier.
///
/// The manager adds and removes entries; readers take immutable snapshots
/// and never see a half-updated status.
#[derive(Clone, Default)]
pub struct StatusBoard {
    entries: Arc<RwLock<BTreeMap<String, watch::Receiver<TaskStatus>>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, identifier: &str, rx: watch::Receiver<TaskStatus>) {
        self.entries.write().insert(identifier.to_string(), rx);
    }

    pub(crate) fn remove(&self, identifier: &str) {
        self.entries.write().remove(identifier);
    }

    /// Current status of every task, ordered by identifier.
    pub fn snapshot(&self) -> Vec<TaskStatus> {
        self.entries.read().values().map(|rx| rx.borrow().clone()).collect()
    }

    pub fn get(&self, identifier: &str) -> Option<TaskStatus> {
        self.entries.read().get(identifier).map(|rx| rx.borrow().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_ordered_and_tolerates_removal() {
        let board = StatusBoard::new();
        let (_tx_b, rx_b) = watch::channel(TaskStatus::new("b", "B"));
        let (_tx_a, rx_a) = watch::channel(TaskStatus::new("a", "A"));
        board.insert("b", rx_b);
        board.insert("a", rx_a);

        let ids: Vec<_> = board.snapshot().into_iter().map(|s| s.identifier).collect();
        assert_eq!(ids, vec!["a", "b"]);

        board.remove("a");
        board.remove("missing");
        assert_eq!(board.len(), 1);
        assert!(board.get("a").is_none());
    }

    #[test]
    fn test_snapshot_survives_dropped_writer() {
        let board = StatusBoard::new();
        let (tx, rx) = watch::channel(TaskStatus::new("a", "A"));
        board.insert("a", rx);
        drop(tx);
        assert_eq!(board.snapshot().len(), 1);
    }
}
