//! Shared store handle with an explicit connect / disconnect lifecycle.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use crate::collection::Collection;
use crate::error::{Result, StoreError};
use crate::memory::MemoryStore;
use crate::sqlite::{SqliteConfig, SqliteStore};
use crate::store::KvStore;

/// Outcome of [`Database::disconnect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectResult {
    pub ok: bool,
    pub message: String,
}

/// Holds at most one connected [`KvStore`] and hands it to collections.
///
/// Collections created before a disconnect keep their handle; their calls
/// fail with `StoreUnavailable` once the store is closed.
#[derive(Default)]
pub struct Database {
    store: RwLock<Option<Arc<dyn KvStore>>>,
}

impl Database {
    /// A database with nothing connected yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `store`. Returns `false` if a store is already connected.
    pub fn connect(&self, store: Arc<dyn KvStore>) -> bool {
        let mut slot = self.store.write();
        if slot.is_some() {
            warn!("Already connected to a database");
            return false;
        }
        *slot = Some(store);
        info!("Database connected");
        true
    }

    /// Connect a fresh in-memory store.
    pub fn connect_memory(&self) -> bool {
        self.connect(Arc::new(MemoryStore::new()))
    }

    /// Open and connect a SQLite store.
    pub async fn connect_sqlite(&self, config: &SqliteConfig) -> Result<bool> {
        if self.is_connected() {
            warn!("Already connected to a database");
            return Ok(false);
        }
        let store = SqliteStore::with_config(config).await?;
        Ok(self.connect(Arc::new(store)))
    }

    pub fn is_connected(&self) -> bool {
        self.store.read().is_some()
    }

    /// Detach and close the connected store.
    pub async fn disconnect(&self) -> DisconnectResult {
        let taken = self.store.write().take();
        let Some(store) = taken else {
            return DisconnectResult {
                ok: false,
                message: "No database is connected".to_string(),
            };
        };

        if let Err(e) = store.close().await {
            warn!(error = %e, "error while closing store");
        }
        info!("Database disconnected");
        DisconnectResult {
            ok: true,
            message: "Database disconnected successfully".to_string(),
        }
    }

    /// The connected store.
    pub fn store(&self) -> Result<Arc<dyn KvStore>> {
        self.store
            .read()
            .clone()
            .ok_or_else(|| StoreError::StoreUnavailable("database is not connected".to_string()))
    }

    /// A collection bound to the connected store.
    pub fn collection(&self, name: impl Into<String>) -> Result<Collection> {
        Ok(Collection::new(name, self.store()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let db = Database::new();
        assert!(!db.is_connected());

        assert!(db.connect_memory());
        assert!(db.is_connected());
        assert!(!db.connect_memory());

        let result = db.disconnect().await;
        assert!(result.ok);
        assert_eq!(result.message, "Database disconnected successfully");

        let result = db.disconnect().await;
        assert!(!result.ok);
        assert_eq!(result.message, "No database is connected");
    }

    #[tokio::test]
    async fn test_collection_requires_connection() {
        let db = Database::new();
        assert!(matches!(
            db.collection("users"),
            Err(StoreError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_collections_share_the_store() {
        let db = Database::new();
        db.connect_memory();

        let a = db.collection("users").unwrap();
        let b = db.collection("users").unwrap();
        let saved = a.save(doc! { name: "A" }).await.unwrap();
        assert!(b.find_by_id(saved.id).await.ok);
    }

    #[tokio::test]
    async fn test_disconnect_closes_store() {
        let db = Database::new();
        db.connect_memory();
        let users = db.collection("users").unwrap();
        users.save(doc! { _id: "u1" }).await.unwrap();

        db.disconnect().await;
        assert!(!users.find_by_id("u1").await.ok);
        assert!(users.save(doc! { _id: "u2" }).await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_connect_sqlite_when_connected() {
        let db = Database::new();
        db.connect_memory();
        let connected = db
            .connect_sqlite(&SqliteConfig::new("/nonexistent/never-opened.db"))
            .await
            .unwrap();
        assert!(!connected);
    }
}
