//! # univrs-docstore
//!
//! Document collections for the Univrs ecosystem, layered on an ordered
//! key-value store that only offers per-key compare-and-set, prefix scans and
//! atomic multi-key commits.
//!
//! - **Collections**: documents stored at `[collection, _id]`
//! - **Unique ids**: explicit ids are guarded by create-if-absent writes,
//!   generated ids are random UUIDs with bounded collision retry
//! - **Filtered queries**: equality filters evaluated during ordered scans
//! - **Optimistic updates**: shallow merges written against the versionstamp
//!   that was read; a concurrent writer turns into `Conflict`
//! - **Batch deletes**: one atomic commit plus a verifying re-scan
//!
//! ## Backends
//!
//! - [`SqliteStore`]: Embedded SQLite database (durable)
//! - [`MemoryStore`]: In-memory store (testing and development)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use univrs_docstore::{doc, Database, FindOptions};
//!
//! #[tokio::main]
//! async fn main() -> univrs_docstore::Result<()> {
//!     let db = Database::new();
//!     db.connect_memory();
//!
//!     let users = db.collection("users")?;
//!     let saved = users.save(doc! { name: "Alice", age: 30 }).await?;
//!
//!     let found = users.find_by_id(saved.id.clone()).await;
//!     println!("{:?}", found.value);
//!
//!     let thirties = users.find_many(doc! { age: 30 }, FindOptions::default()).await?;
//!     println!("{} match", thirties.len());
//!
//!     users.update_by_id(saved.id, doc! { age: 31 }).await?;
//!     db.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Conflicts
//!
//! ```rust,no_run
//! use univrs_docstore::{doc, Collection, MemoryStore, StoreError};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> univrs_docstore::Result<()> {
//!     let users = Collection::new("users", Arc::new(MemoryStore::new()));
//!     users.save(doc! { _id: "u1", visits: 0 }).await?;
//!
//!     // Retry policy belongs to the caller.
//!     loop {
//!         let current = users.find_by_id("u1").await.into_document()?;
//!         let visits = current.get("visits").and_then(|v| v.as_f64()).unwrap_or(0.0);
//!         match users.update_by_id("u1", doc! { visits: (visits + 1.0) }).await {
//!             Err(StoreError::Conflict(_)) => continue,
//!             other => {
//!                 other?;
//!                 break;
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod collection;
pub mod database;
pub mod error;
pub mod filter;
pub mod id;
pub mod key;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod value;

// Re-export main types
pub use collection::{
    Collection, DeleteCollectionConfirmation, DeleteCount, DeleteResult, FindManyResult,
    FindOptions, FindResult, FoundDocument, SaveResult, UpdateResult,
};
pub use database::{Database, DisconnectResult};
pub use error::{Result, StoreError};
pub use filter::Filter;
pub use id::{DocumentId, IdAllocator};
pub use key::{Cursor, Key, KeyPart, Versionstamp, MAX_KEY_LENGTH};
pub use memory::MemoryStore;
pub use sqlite::{SqliteConfig, SqliteStore};
pub use store::{KvEntry, KvStore, ListOptions, ListPage, TransactionOp};
pub use value::{Document, Value};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::collection::{Collection, DeleteCollectionConfirmation, FindOptions};
    pub use crate::database::Database;
    pub use crate::doc;
    pub use crate::error::{Result, StoreError};
    pub use crate::filter::Filter;
    pub use crate::memory::MemoryStore;
    pub use crate::sqlite::SqliteStore;
    pub use crate::store::KvStore;
    pub use crate::value::{Document, Value};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[tokio::test]
    async fn test_memory_collection_basic() {
        let users = Collection::new("users", std::sync::Arc::new(MemoryStore::new()));

        let saved = users.save(doc! { name: "A" }).await.unwrap();
        let found = users.find_by_id(saved.id).await;
        assert_eq!(found.value.unwrap().get("name"), Some(&Value::from("A")));
    }

    #[tokio::test]
    async fn test_stores_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<MemoryStore>();
        assert_send_sync::<SqliteStore>();
        assert_send_sync::<Collection>();
        assert_send_sync::<Database>();
    }
}
