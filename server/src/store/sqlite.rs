use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tokio::task::JoinHandle;

use super::{
    validate_field, ChangeFeed, DocKey, Document, DocumentStore, FieldValue, Snapshot, StoreError,
};

/// Next store-wide revision, evaluated inside the writing statement so that
/// SQLite's write lock makes it unique.
const NEXT_SEQ: &str = "(SELECT COALESCE(MAX(seq), 0) + 1 FROM documents)";

/// Document store on top of a single SQLite `documents` table.
///
/// Documents are stored as JSON text. Field updates are compiled into one
/// `UPDATE … SET data = json_set(…)` statement, so increments are computed by
/// SQLite against the stored value rather than by the caller.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and apply the
    /// embedded migrations.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(
                SqliteConnectOptions::from_str(url)?
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(Duration::from_secs(5)),
            )
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Document store migrations applied");

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            feed: ChangeFeed::new(),
        }
    }

    /// Watch the table for writes made by any process and republish them on
    /// this store's feed. Local writes are already published when they
    /// happen; the feed drops the duplicates.
    pub async fn spawn_change_poller(&self, every: Duration) -> Result<JoinHandle<()>, StoreError> {
        let pool = self.pool.clone();
        let feed = self.feed.clone();

        // Everything up to here is covered by the initial read of a watch.
        let mut last_seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM documents")
            .fetch_one(&pool)
            .await?;

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let rows: Vec<(String, String, i64, String)> = match sqlx::query_as(
                    "SELECT collection, id, seq, data FROM documents
                     WHERE seq > ?1 ORDER BY seq",
                )
                .bind(last_seq)
                .fetch_all(&pool)
                .await
                {
                    Ok(rows) => rows,
                    Err(e) => {
                        tracing::warn!("Change poller query failed: {:?}", e);
                        continue;
                    }
                };

                for (collection, id, seq, data) in rows {
                    last_seq = last_seq.max(seq);
                    let key = DocKey::new(collection, id);
                    match parse_document(&data) {
                        Ok(doc) => {
                            if feed.publish(&key, snapshot(seq, doc)) {
                                tracing::debug!("Picked up external change to {} at seq {}", key, seq);
                            }
                        }
                        Err(e) => tracing::warn!("Skipping unreadable document {}: {}", key, e),
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, key: &DocKey) -> Result<Snapshot, StoreError> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT seq, data FROM documents WHERE collection = ?1 AND id = ?2",
        )
        .bind(&key.collection)
        .bind(&key.id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((seq, data)) => Ok(snapshot(seq, parse_document(&data)?)),
            None => Ok(Snapshot::absent()),
        }
    }

    async fn set(
        &self,
        key: &DocKey,
        data: Document,
        merge: bool,
    ) -> Result<Snapshot, StoreError> {
        let payload = serde_json::to_string(&data)?;

        // A merge overwrites each given top-level field as a whole, so nested
        // objects are replaced and explicit nulls are kept. ?1..?3 are fixed.
        let mut merged = Vec::with_capacity(data.len() * 2);
        let mut assignments = String::new();
        if merge {
            for (name, value) in &data {
                validate_field(name)?;
                let n = 4 + merged.len();
                assignments.push_str(&format!(", ?{}, json(?{})", n, n + 1));
                merged.push(format!("$.{name}"));
                merged.push(serde_json::to_string(value)?);
            }
        }
        let on_conflict = if !merge {
            "excluded.data".to_owned()
        } else if assignments.is_empty() {
            "documents.data".to_owned()
        } else {
            format!("json_set(documents.data{assignments})")
        };

        let sql = format!(
            "INSERT INTO documents (collection, id, data, seq, updated_at)
             VALUES (?1, ?2, json(?3), {NEXT_SEQ}, datetime('now'))
             ON CONFLICT (collection, id) DO UPDATE SET
                 data = {on_conflict},
                 seq = excluded.seq,
                 updated_at = excluded.updated_at
             RETURNING seq, data"
        );

        let mut query = sqlx::query_as::<_, (i64, String)>(&sql)
            .bind(&key.collection)
            .bind(&key.id)
            .bind(payload);
        for text in merged {
            query = query.bind(text);
        }

        // Drained to completion: the autocommit only lands once the statement
        // finishes, and the snapshot must not be published before that.
        let (seq, stored) = match query.fetch_all(&self.pool).await?.into_iter().next() {
            Some(row) => row,
            None => return Err(StoreError::not_found(key)),
        };

        let snapshot = snapshot(seq, parse_document(&stored)?);
        self.feed.publish(key, snapshot.clone());
        Ok(snapshot)
    }

    async fn update(
        &self,
        key: &DocKey,
        fields: Vec<(String, FieldValue)>,
    ) -> Result<Snapshot, StoreError> {
        if fields.is_empty() {
            let current = self.get(key).await?;
            if !current.exists() {
                return Err(StoreError::not_found(key));
            }
            return Ok(current);
        }

        // Every `?` is bound in the order it appears in the statement.
        let mut assignments = Vec::with_capacity(fields.len());
        let mut binds: Vec<Bind> = Vec::with_capacity(fields.len() * 3 + 2);
        for (name, value) in fields {
            validate_field(&name)?;
            let path = format!("$.{name}");
            match value {
                FieldValue::Set(value) => {
                    assignments.push("?, json(?)");
                    binds.push(Bind::Text(path));
                    binds.push(Bind::Text(serde_json::to_string(&value)?));
                }
                FieldValue::Increment(delta) => {
                    assignments.push("?, COALESCE(json_extract(data, ?), 0) + ?");
                    binds.push(Bind::Text(path.clone()));
                    binds.push(Bind::Text(path));
                    binds.push(Bind::Int(delta));
                }
            }
        }
        binds.push(Bind::Text(key.collection.clone()));
        binds.push(Bind::Text(key.id.clone()));

        let sql = format!(
            "UPDATE documents
             SET data = json_set(data, {}),
                 seq = {NEXT_SEQ},
                 updated_at = datetime('now')
             WHERE collection = ? AND id = ?
             RETURNING seq, data",
            assignments.join(", ")
        );

        let mut query = sqlx::query_as::<_, (i64, String)>(&sql);
        for bind in binds {
            query = match bind {
                Bind::Text(text) => query.bind(text),
                Bind::Int(int) => query.bind(int),
            };
        }

        // Drained to completion so the write is committed before publishing.
        let (seq, stored) = match query.fetch_all(&self.pool).await?.into_iter().next() {
            Some(row) => row,
            None => return Err(StoreError::not_found(key)),
        };

        let snapshot = snapshot(seq, parse_document(&stored)?);
        self.feed.publish(key, snapshot.clone());
        Ok(snapshot)
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

enum Bind {
    Text(String),
    Int(i64),
}

fn snapshot(seq: i64, data: Document) -> Snapshot {
    Snapshot {
        revision: seq.max(0) as u64,
        data: Some(data),
    }
}

fn parse_document(text: &str) -> Result<Document, StoreError> {
    match serde_json::from_str(text)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject),
    }
}
