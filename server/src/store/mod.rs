//! Keyed-document storage used by the link configuration and click counter.
//!
//! A document is a JSON object addressed by `(collection, id)`. Backends offer
//! point reads, upsert/merge writes, field-level updates with store-side
//! increments, and a change feed that pushes a fresh snapshot of a document
//! every time it is written, including for [`SqliteStore`], writes made by
//! other processes sharing the same database file.

use std::fmt;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

mod feed;
mod memory;
mod sqlite;

pub use feed::{Change, ChangeFeed};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Top-level fields of a stored document.
pub type Document = serde_json::Map<String, Value>;

// ── Keys & snapshots ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocKey {
    pub collection: String,
    pub id: String,
}

impl DocKey {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Point-in-time view of one document.
///
/// `revision` is a store-wide sequence number that grows with every write, so
/// a larger revision is always a newer state of the same document. Absent
/// documents read as revision 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub revision: u64,
    pub data: Option<Document>,
}

impl Snapshot {
    pub fn absent() -> Self {
        Self {
            revision: 0,
            data: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }
}

/// New value for a single field in [`DocumentStore::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Overwrite the field unconditionally.
    Set(Value),
    /// Add a delta to the stored number (a missing field counts as 0).
    Increment(i64),
}

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document {collection}/{id} does not exist")]
    NotFound { collection: String, id: String },

    #[error("invalid field name '{0}'")]
    InvalidField(String),

    #[error("stored value is not a JSON object")]
    NotAnObject,

    #[error("change feed lagged, {0} notification(s) skipped")]
    Lagged(u64),

    #[error("store is closed")]
    Closed,
}

impl StoreError {
    pub(crate) fn not_found(key: &DocKey) -> Self {
        Self::NotFound {
            collection: key.collection.clone(),
            id: key.id.clone(),
        }
    }
}

// ── Store contract ─────────────────────────────────────────────────────────

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Read the current state of a document.
    async fn get(&self, key: &DocKey) -> Result<Snapshot, StoreError>;

    /// Create or overwrite a document. With `merge = true` only the given
    /// top-level fields are written and every other field is preserved.
    async fn set(&self, key: &DocKey, data: Document, merge: bool)
        -> Result<Snapshot, StoreError>;

    /// Apply field updates to an existing document as one atomic step.
    /// Fails with [`StoreError::NotFound`] when the document is absent.
    async fn update(
        &self,
        key: &DocKey,
        fields: Vec<(String, FieldValue)>,
    ) -> Result<Snapshot, StoreError>;

    /// The feed every successful write of this store is published on.
    fn changes(&self) -> &ChangeFeed;

    /// Open a watch on one document: the initial read first, then one
    /// snapshot per later change.
    async fn watch(&self, key: &DocKey) -> DocumentWatch {
        // Subscribe before reading so no write can slip between the two.
        let rx = self.changes().subscribe();
        let initial = self.get(key).await;
        DocumentWatch::new(key.clone(), rx, initial)
    }
}

/// Live view of one document, produced by [`DocumentStore::watch`].
pub struct DocumentWatch {
    key: DocKey,
    initial: Option<Result<Snapshot, StoreError>>,
    seen: u64,
    rx: broadcast::Receiver<std::sync::Arc<Change>>,
}

impl DocumentWatch {
    fn new(
        key: DocKey,
        rx: broadcast::Receiver<std::sync::Arc<Change>>,
        initial: Result<Snapshot, StoreError>,
    ) -> Self {
        let seen = initial.as_ref().map(|s| s.revision).unwrap_or(0);
        Self {
            key,
            initial: Some(initial),
            seen,
            rx,
        }
    }

    /// Next state of the document. Returns `None` once the store's feed is
    /// gone. Changes at or below an already delivered revision are skipped.
    pub async fn next(&mut self) -> Option<Result<Snapshot, StoreError>> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }

        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    if change.key != self.key || !self.advance(change.snapshot.revision) {
                        continue;
                    }
                    return Some(Ok(change.snapshot.clone()));
                }
                Err(RecvError::Lagged(skipped)) => return Some(Err(StoreError::Lagged(skipped))),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Record `revision` as delivered. Returns `false` when it is not newer
    /// than what the watcher already saw.
    pub fn advance(&mut self, revision: u64) -> bool {
        if revision <= self.seen {
            return false;
        }
        self.seen = revision;
        true
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Serialize a value into a document. The value must serialize to an object.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: &Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc.clone()))?)
}

/// Field names are restricted to `[A-Za-z0-9_]` so they can be embedded in
/// JSON paths.
pub(crate) fn validate_field(name: &str) -> Result<(), StoreError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidField(name.to_owned()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A store whose every operation fails, for exercising degraded paths.
    pub struct UnavailableStore {
        feed: ChangeFeed,
    }

    impl UnavailableStore {
        pub fn new() -> Self {
            Self {
                feed: ChangeFeed::new(),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for UnavailableStore {
        async fn get(&self, _key: &DocKey) -> Result<Snapshot, StoreError> {
            Err(StoreError::Closed)
        }

        async fn set(
            &self,
            _key: &DocKey,
            _data: Document,
            _merge: bool,
        ) -> Result<Snapshot, StoreError> {
            Err(StoreError::Closed)
        }

        async fn update(
            &self,
            _key: &DocKey,
            _fields: Vec<(String, FieldValue)>,
        ) -> Result<Snapshot, StoreError> {
            Err(StoreError::Closed)
        }

        fn changes(&self) -> &ChangeFeed {
            &self.feed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_names_are_restricted() {
        assert!(validate_field("totalClicks").is_ok());
        assert!(validate_field("clicks_today").is_ok());
        assert!(validate_field("").is_err());
        assert!(validate_field("a.b").is_err());
        assert!(validate_field("x') --").is_err());
    }

    #[test]
    fn to_document_rejects_non_objects() {
        assert!(matches!(to_document(&3), Err(StoreError::NotAnObject)));
        let doc = to_document(&json!({ "link": "x" })).unwrap();
        assert_eq!(doc.get("link"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn watch_skips_other_documents_and_stale_revisions() {
        let store = MemoryStore::new();
        let key = DocKey::new("settings", "a");
        let other = DocKey::new("settings", "b");

        let mut watch = store.watch(&key).await;
        let initial = watch.next().await.unwrap().unwrap();
        assert!(!initial.exists());

        store.set(&other, Document::new(), false).await.unwrap();
        let written = store
            .set(&key, to_document(&json!({ "n": 1 })).unwrap(), false)
            .await
            .unwrap();

        let next = watch.next().await.unwrap().unwrap();
        assert_eq!(next.revision, written.revision);
        assert!(!watch.advance(written.revision));
    }
}
