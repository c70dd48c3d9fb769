use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::Value;

use super::{
    validate_field, ChangeFeed, DocKey, Document, DocumentStore, FieldValue, Snapshot, StoreError,
};

#[derive(Debug, Clone)]
struct Stored {
    revision: u64,
    data: Document,
}

/// In-process document store backed by a DashMap.
///
/// Every write holds the document's shard lock for the whole
/// read-modify-write, which is what makes [`FieldValue::Increment`] atomic
/// here. Nothing is persisted; restart loses all documents.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: DashMap<DocKey, Stored>,
    seq: AtomicU64,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &DocKey) -> Result<Snapshot, StoreError> {
        Ok(match self.docs.get(key) {
            Some(stored) => Snapshot {
                revision: stored.revision,
                data: Some(stored.data.clone()),
            },
            None => Snapshot::absent(),
        })
    }

    async fn set(
        &self,
        key: &DocKey,
        data: Document,
        merge: bool,
    ) -> Result<Snapshot, StoreError> {
        if merge {
            for name in data.keys() {
                validate_field(name)?;
            }
        }

        let mut stored = match self.docs.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let mut stored = entry.into_ref();
                if merge {
                    stored.data.extend(data);
                } else {
                    stored.data = data;
                }
                stored
            }
            Entry::Vacant(entry) => entry.insert(Stored {
                revision: 0,
                data,
            }),
        };
        stored.revision = self.next_revision();

        let snapshot = Snapshot {
            revision: stored.revision,
            data: Some(stored.data.clone()),
        };
        self.feed.publish(key, snapshot.clone());
        Ok(snapshot)
    }

    async fn update(
        &self,
        key: &DocKey,
        fields: Vec<(String, FieldValue)>,
    ) -> Result<Snapshot, StoreError> {
        for (name, _) in &fields {
            validate_field(name)?;
        }

        let mut stored = match self.docs.get_mut(key) {
            Some(stored) => stored,
            None => return Err(StoreError::not_found(key)),
        };

        for (name, value) in fields {
            let next = match value {
                FieldValue::Set(value) => value,
                FieldValue::Increment(delta) => {
                    let current = stored.data.get(&name).and_then(Value::as_i64).unwrap_or(0);
                    Value::from(current + delta)
                }
            };
            stored.data.insert(name, next);
        }
        stored.revision = self.next_revision();

        let snapshot = Snapshot {
            revision: stored.revision,
            data: Some(stored.data.clone()),
        };
        self.feed.publish(key, snapshot.clone());
        Ok(snapshot)
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }
}
