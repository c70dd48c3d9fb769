use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{DocKey, Snapshot};

const FEED_CAPACITY: usize = 256;

/// A document write as seen by watchers.
#[derive(Debug, Clone)]
pub struct Change {
    pub key: DocKey,
    pub snapshot: Snapshot,
}

/// Broadcast channel for document changes.
///
/// The same write can reach the feed twice (once from the writer, once from
/// the cross-process poller), and concurrent writers can publish out of
/// order. The feed keeps the highest revision published per document and
/// drops anything at or below it.
#[derive(Clone, Debug)]
pub struct ChangeFeed {
    tx: broadcast::Sender<Arc<Change>>,
    published: Arc<DashMap<DocKey, u64>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            tx,
            published: Arc::new(DashMap::new()),
        }
    }

    /// Publish a snapshot. Returns `false` if it was stale and dropped.
    pub fn publish(&self, key: &DocKey, snapshot: Snapshot) -> bool {
        let mut last = self.published.entry(key.clone()).or_insert(0);
        if snapshot.revision <= *last {
            return false;
        }
        *last = snapshot.revision;

        // Sent while the entry is held so receivers see revisions in order.
        // An error only means nobody is listening right now.
        let _ = self.tx.send(Arc::new(Change {
            key: key.clone(),
            snapshot,
        }));
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Change>> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
