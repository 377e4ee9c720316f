//! SQLite key-value store implementation.
//!
//! Features:
//! - WAL mode for concurrent readers
//! - Keys stored as order-preserving BLOBs, so prefix scans are range scans
//! - Every write runs in its own transaction that bumps a store-wide
//!   versionstamp sequence first, taking the write lock before any check

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::key::{validate_key, Key, Versionstamp};
use crate::store::{
    check_holds, scan_start, KvEntry, KvStore, ListOptions, ListPage, TransactionOp,
};

/// Settings for opening a [`SqliteStore`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Connection pool size.
    pub max_connections: u32,
    /// How long a writer waits on a locked database.
    pub busy_timeout_secs: u64,
    /// Create the file if it does not exist.
    pub create_if_missing: bool,
}

impl SqliteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("docstore.db"),
            max_connections: 5,
            busy_timeout_secs: 30,
            create_if_missing: true,
        }
    }
}

/// SQLite implementation of KvStore.
///
/// Uses WAL mode for performance and durability.
pub struct SqliteStore {
    pool: SqlitePool,
}

type Row = (Vec<u8>, Vec<u8>, i64);

impl SqliteStore {
    /// Open or create a SQLite store at the given path with default settings.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(&SqliteConfig::new(path.as_ref())).await
    }

    /// Open a SQLite store with explicit settings.
    pub async fn with_config(config: &SqliteConfig) -> Result<Self> {
        info!("Opening SQLite store at {:?}", config.path);

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(config.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::StoreUnavailable(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// A single connection is kept open for the lifetime of the store, since
    /// the database vanishes with its last connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::StoreUnavailable(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key BLOB PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                versionstamp INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv_meta (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                seq INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO kv_meta (id, seq) VALUES (0, 0);
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite schema initialized");
        Ok(())
    }

    /// Begin a write transaction and reserve the next versionstamp.
    ///
    /// The sequence bump is the first statement, so the transaction holds the
    /// write lock before it reads anything.
    async fn begin_write(&self) -> Result<(Transaction<'static, Sqlite>, Versionstamp)> {
        let mut tx = self.pool.begin().await?;
        let (seq,): (i64,) =
            sqlx::query_as("UPDATE kv_meta SET seq = seq + 1 WHERE id = 0 RETURNING seq")
                .fetch_one(&mut *tx)
                .await?;
        Ok((tx, Versionstamp::new(seq as u64)))
    }

    async fn current_version(
        tx: &mut Transaction<'static, Sqlite>,
        encoded: &[u8],
    ) -> Result<Option<Versionstamp>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT versionstamp FROM kv_store WHERE key = ?")
            .bind(encoded)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(|(v,)| Versionstamp::new(v as u64)))
    }

    async fn upsert(
        tx: &mut Transaction<'static, Sqlite>,
        encoded: &[u8],
        value: &[u8],
        version: Versionstamp,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, versionstamp)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                versionstamp = excluded.versionstamp
            "#,
        )
        .bind(encoded)
        .bind(value)
        .bind(version.value() as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    fn to_entry((key, value, version): Row) -> Result<KvEntry> {
        Ok(KvEntry {
            key: Key::decode(&key)?,
            value,
            versionstamp: Versionstamp::new(version as u64),
        })
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &Key) -> Result<Option<KvEntry>> {
        validate_key(key)?;

        let row: Option<Row> =
            sqlx::query_as("SELECT key, value, versionstamp FROM kv_store WHERE key = ?")
                .bind(key.encode())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Self::to_entry).transpose()
    }

    async fn set(&self, key: &Key, value: Vec<u8>) -> Result<Versionstamp> {
        validate_key(key)?;

        let (mut tx, version) = self.begin_write().await?;
        Self::upsert(&mut tx, &key.encode(), &value, version).await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        validate_key(key)?;

        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key.encode())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, prefix: &Key, options: ListOptions) -> Result<ListPage> {
        let start = scan_start(prefix, &options)?;
        let limit = options.page_size();

        // Every key under the prefix continues with a part tag below 0xFF.
        let mut upper = prefix.encode();
        upper.push(0xFF);

        let rows: Vec<Row> = sqlx::query_as(
            "SELECT key, value, versionstamp FROM kv_store WHERE key > ? AND key < ? ORDER BY key LIMIT ?",
        )
        .bind(start.encode())
        .bind(upper)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(Self::to_entry)
            .collect::<Result<Vec<_>>>()?;
        Ok(ListPage::from_entries(entries, limit))
    }

    async fn compare_and_set(
        &self,
        key: &Key,
        expected: Versionstamp,
        value: Vec<u8>,
    ) -> Result<Versionstamp> {
        validate_key(key)?;
        let encoded = key.encode();

        let (mut tx, version) = self.begin_write().await?;
        let current = Self::current_version(&mut tx, &encoded).await?;
        check_holds(key, Some(expected), current)?;

        Self::upsert(&mut tx, &encoded, &value, version).await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn create_if_not_exists(&self, key: &Key, value: Vec<u8>) -> Result<Versionstamp> {
        validate_key(key)?;

        let (mut tx, version) = self.begin_write().await?;
        let inserted = sqlx::query(
            "INSERT INTO kv_store (key, value, versionstamp) VALUES (?, ?, ?) ON CONFLICT(key) DO NOTHING",
        )
        .bind(key.encode())
        .bind(&value)
        .bind(version.value() as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }

        tx.commit().await?;
        Ok(version)
    }

    async fn transaction(&self, ops: Vec<TransactionOp>) -> Result<Versionstamp> {
        for op in &ops {
            match op {
                TransactionOp::Set { key, .. }
                | TransactionOp::Delete { key }
                | TransactionOp::CheckVersion { key, .. } => validate_key(key)?,
            }
        }

        let (mut tx, version) = self.begin_write().await?;

        // First validate all CheckVersion operations
        for op in &ops {
            if let TransactionOp::CheckVersion { key, expected } = op {
                let current = Self::current_version(&mut tx, &key.encode()).await?;
                check_holds(key, *expected, current)?;
            }
        }

        // Apply all Set and Delete operations
        for op in ops {
            match op {
                TransactionOp::Set { key, value } => {
                    Self::upsert(&mut tx, &key.encode(), &value, version).await?;
                }
                TransactionOp::Delete { key } => {
                    sqlx::query("DELETE FROM kv_store WHERE key = ?")
                        .bind(key.encode())
                        .execute(&mut *tx)
                        .await?;
                }
                TransactionOp::CheckVersion { .. } => {
                    // Already validated above
                }
            }
        }

        // Commit transaction
        tx.commit().await?;
        Ok(version)
    }

    async fn close(&self) -> Result<()> {
        info!("Closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPart;

    fn key(collection: &str, id: impl Into<KeyPart>) -> Key {
        Key::new([KeyPart::from(collection), id.into()])
    }

    fn prefix(collection: &str) -> Key {
        Key::new([KeyPart::from(collection)])
    }

    #[tokio::test]
    async fn test_sqlite_set_and_get() {
        let store = SqliteStore::in_memory().await.unwrap();

        let version = store.set(&key("t", "k"), b"value".to_vec()).await.unwrap();

        let entry = store.get(&key("t", "k")).await.unwrap().unwrap();
        assert_eq!(entry.key, key("t", "k"));
        assert_eq!(entry.value, b"value");
        assert_eq!(entry.versionstamp, version);
    }

    #[tokio::test]
    async fn test_sqlite_version_increment() {
        let store = SqliteStore::in_memory().await.unwrap();

        let v1 = store.set(&key("t", "k"), b"v1".to_vec()).await.unwrap();
        let v2 = store.set(&key("t", "k"), b"v2".to_vec()).await.unwrap();

        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn test_sqlite_delete() {
        let store = SqliteStore::in_memory().await.unwrap();

        store.set(&key("t", "k"), b"value".to_vec()).await.unwrap();
        assert!(store.exists(&key("t", "k")).await.unwrap());

        store.delete(&key("t", "k")).await.unwrap();
        assert!(!store.exists(&key("t", "k")).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_list_in_key_order() {
        let store = SqliteStore::in_memory().await.unwrap();

        store.set(&key("users", 2i32), b"n2".to_vec()).await.unwrap();
        store.set(&key("users", "b"), b"b".to_vec()).await.unwrap();
        store.set(&key("users", "a"), b"a".to_vec()).await.unwrap();
        store.set(&key("nodes", "n1"), b"n".to_vec()).await.unwrap();

        let page = store
            .list(&prefix("users"), ListOptions::default())
            .await
            .unwrap();
        let values: Vec<_> = page.entries.iter().map(|e| e.value.clone()).collect();
        assert_eq!(values, vec![b"a".to_vec(), b"b".to_vec(), b"n2".to_vec()]);
        assert!(page.cursor.is_none());

        let first = store
            .list(&prefix("users"), ListOptions::new(1))
            .await
            .unwrap();
        let rest = store
            .list(&prefix("users"), ListOptions::new(10).after(first.cursor))
            .await
            .unwrap();
        assert_eq!(rest.entries.len(), 2);
        assert_eq!(rest.entries[0].value, b"b");
    }

    #[tokio::test]
    async fn test_sqlite_compare_and_set() {
        let store = SqliteStore::in_memory().await.unwrap();

        let v1 = store.set(&key("t", "k"), b"v1".to_vec()).await.unwrap();

        let v2 = store
            .compare_and_set(&key("t", "k"), v1, b"v2".to_vec())
            .await
            .unwrap();
        assert!(v2 > v1);

        // Conflict
        let result = store
            .compare_and_set(&key("t", "k"), v1, b"v3".to_vec())
            .await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));

        let entry = store.get(&key("t", "k")).await.unwrap().unwrap();
        assert_eq!(entry.value, b"v2");
    }

    #[tokio::test]
    async fn test_sqlite_create_if_not_exists() {
        let store = SqliteStore::in_memory().await.unwrap();

        store
            .create_if_not_exists(&key("t", "k"), b"v1".to_vec())
            .await
            .unwrap();

        let result = store
            .create_if_not_exists(&key("t", "k"), b"v2".to_vec())
            .await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_sqlite_transaction() {
        let store = SqliteStore::in_memory().await.unwrap();

        let va = store.set(&key("t", "a"), b"1".to_vec()).await.unwrap();
        store.set(&key("t", "b"), b"2".to_vec()).await.unwrap();

        let version = store
            .transaction(vec![
                TransactionOp::check_version(key("t", "a"), va),
                TransactionOp::set(key("t", "a"), b"new-a".to_vec()),
                TransactionOp::set(key("t", "c"), b"new-c".to_vec()),
                TransactionOp::delete(key("t", "b")),
            ])
            .await
            .unwrap();

        let a = store.get(&key("t", "a")).await.unwrap().unwrap();
        assert_eq!(a.value, b"new-a");
        assert_eq!(a.versionstamp, version);
        assert!(store.exists(&key("t", "c")).await.unwrap());
        assert!(!store.exists(&key("t", "b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_transaction_rollback() {
        let store = SqliteStore::in_memory().await.unwrap();

        let v1 = store.set(&key("t", "a"), b"1".to_vec()).await.unwrap();
        store.set(&key("t", "a"), b"2".to_vec()).await.unwrap();

        let result = store
            .transaction(vec![
                TransactionOp::check_version(key("t", "a"), v1), // stale
                TransactionOp::set(key("t", "a"), b"3".to_vec()),
                TransactionOp::set(key("t", "b"), b"new".to_vec()),
            ])
            .await;

        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));

        // Transaction should have rolled back
        let a = store.get(&key("t", "a")).await.unwrap().unwrap();
        assert_eq!(a.value, b"2");
        assert!(!store.exists(&key("t", "b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_closed_is_unavailable() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.close().await.unwrap();

        let result = store.get(&key("t", "a")).await;
        assert!(matches!(result, Err(StoreError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_sqlite_file_survives_reopen() {
        let path = std::env::temp_dir().join(format!("docstore-{}.db", uuid::Uuid::new_v4()));

        let store = SqliteStore::open(&path).await.unwrap();
        let v1 = store.set(&key("t", "k"), b"durable".to_vec()).await.unwrap();
        store.close().await.unwrap();

        let store = SqliteStore::open(&path).await.unwrap();
        let entry = store.get(&key("t", "k")).await.unwrap().unwrap();
        assert_eq!(entry.value, b"durable");
        assert_eq!(entry.versionstamp, v1);

        // The versionstamp sequence continues across reopen
        let v2 = store.set(&key("t", "k"), b"again".to_vec()).await.unwrap();
        assert!(v2 > v1);
        store.close().await.unwrap();

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }

    #[test]
    fn test_config_defaults() {
        let config: SqliteConfig = serde_json::from_str(r#"{"path": "/tmp/x.db"}"#).unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.busy_timeout_secs, 30);
        assert!(config.create_if_missing);
    }
}
