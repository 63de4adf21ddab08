//! SQLite implementation of the Store trait.
//!
//! This is the durable storage backend for Tessera. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking. The database
//! is opened and migrated on first use, so calls made before `init` simply
//! wait for it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::OnceCell;
use tracing::debug;

use tessera_core::{now_millis, VerificationRecord};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::Store;

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// Database file; `None` for an in-memory database.
    path: Option<PathBuf>,
    /// The SQLite connection, opened lazily.
    conn: OnceCell<Arc<Mutex<Connection>>>,
}

impl SqliteStore {
    /// Use a SQLite database at the given path.
    ///
    /// The file is created and migrated on first use.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            conn: OnceCell::new(),
        }
    }

    /// Use an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Self {
        Self {
            path: None,
            conn: OnceCell::new(),
        }
    }

    /// The connection, opening and migrating it if this is the first call.
    async fn connection(&self) -> Result<Arc<Mutex<Connection>>> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let path = self.path.clone();
                tokio::task::spawn_blocking(move || {
                    let mut conn = match &path {
                        Some(path) => Connection::open(path)?,
                        None => Connection::open_in_memory()?,
                    };
                    migration::migrate(&mut conn)?;
                    debug!(path = ?path, "opened sqlite store");
                    Ok::<_, StoreError>(Arc::new(Mutex::new(conn)))
                })
                .await
                .map_err(join_error)?
            })
            .await?;
        Ok(conn.clone())
    }

    /// Run a blocking operation on the connection.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection().await?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(join_error)?
    }
}

fn join_error(e: tokio::task::JoinError) -> StoreError {
    StoreError::Task(e.to_string())
}

fn encode_record(record: &VerificationRecord) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(record, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_record(bytes: &[u8]) -> Result<VerificationRecord> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl Store for SqliteStore {
    async fn init(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    async fn put(&self, key: &str, record: &VerificationRecord) -> Result<()> {
        let key = key.to_string();
        let address = record.address.to_hex();
        let timestamp = record.timestamp;
        let blob = encode_record(record)?;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO records (key, address, timestamp, record, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    address = excluded.address,
                    timestamp = excluded.timestamp,
                    record = excluded.record,
                    stored_at = excluded.stored_at",
                params![key, address, timestamp, blob, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<VerificationRecord>> {
        let key = key.to_string();

        let blob: Option<Vec<u8>> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT record FROM records WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await?;

        blob.map(|bytes| decode_record(&bytes)).transpose()
    }

    async fn query(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM records
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;
            let keys = stmt
                .query_map(params![prefix], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::{CrdtKind, Keypair, RecordBuilder};

    fn make_test_record(keypair: &Keypair, key: &str, value: serde_json::Value) -> VerificationRecord {
        RecordBuilder::new(key, value, keypair.address())
            .timestamp(1234567890000)
            .sign(keypair)
    }

    #[tokio::test]
    async fn test_sqlite_put_get() {
        let store = SqliteStore::open_memory();
        let keypair = Keypair::generate();
        let record = make_test_record(&keypair, "k", json!({"nested": [1, 2.5, "x", null]}));

        store.put("k", &record).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(record));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_usable_before_init() {
        let store = SqliteStore::open_memory();
        assert!(store.query("").await.unwrap().is_empty());
        store.init().await.unwrap();
        store.init().await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_replace_and_query() {
        let store = SqliteStore::open_memory();
        let keypair = Keypair::generate();

        store.put("==bob", &make_test_record(&keypair, "==bob", json!(1))).await.unwrap();
        store.put("==alice", &make_test_record(&keypair, "==alice", json!(1))).await.unwrap();
        store.put("other", &make_test_record(&keypair, "other", json!(1))).await.unwrap();
        store.put("==bob", &make_test_record(&keypair, "==bob", json!(2))).await.unwrap();

        assert_eq!(store.query("==").await.unwrap(), vec!["==alice", "==bob"]);
        assert_eq!(store.get("==bob").await.unwrap().unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.db");
        let keypair = Keypair::generate();
        let record = RecordBuilder::new("counter", json!([]), keypair.address())
            .timestamp(1)
            .crdt(CrdtKind::Counter)
            .sign(&keypair);

        {
            let store = SqliteStore::open(&path);
            store.put("counter", &record).await.unwrap();
        }

        let reopened = SqliteStore::open(&path);
        let loaded = reopened.get("counter").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.crdt, Some(CrdtKind::Counter));
    }
}
