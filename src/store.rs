//! KvStore trait - the ordered key-value contract every backend implements.
//!
//! - Entries: key + opaque bytes + versionstamp
//! - Core operations: get, set, delete, list (prefix scan, paged)
//! - Conditional operations: compare_and_set, create_if_not_exists
//! - Transactions: checks plus mutations committed as one unit

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::key::{Cursor, Key, Versionstamp};

/// Default page size for [`KvStore::list`].
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// A stored entry.
#[derive(Debug, Clone)]
pub struct KvEntry {
    /// The key.
    pub key: Key,
    /// The value (opaque bytes).
    pub value: Vec<u8>,
    /// Revision of this value.
    pub versionstamp: Versionstamp,
}

/// An operation within a transaction.
#[derive(Debug, Clone)]
pub enum TransactionOp {
    /// Set a key to a value.
    Set { key: Key, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Key },
    /// Check that a key has a specific versionstamp; `None` means the key
    /// must not exist. Fails the whole transaction if not.
    CheckVersion {
        key: Key,
        expected: Option<Versionstamp>,
    },
}

impl TransactionOp {
    /// Create a Set operation.
    pub fn set(key: Key, value: impl Into<Vec<u8>>) -> Self {
        Self::Set {
            key,
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: Key) -> Self {
        Self::Delete { key }
    }

    /// Create a CheckVersion operation.
    pub fn check_version(key: Key, expected: Versionstamp) -> Self {
        Self::CheckVersion {
            key,
            expected: Some(expected),
        }
    }

    /// Create a check that passes only while `key` is absent.
    pub fn check_absent(key: Key) -> Self {
        Self::CheckVersion {
            key,
            expected: None,
        }
    }
}

/// Evaluates a transaction check against the versionstamp currently stored.
pub(crate) fn check_holds(
    key: &Key,
    expected: Option<Versionstamp>,
    found: Option<Versionstamp>,
) -> Result<()> {
    if expected == found {
        return Ok(());
    }
    match expected {
        None => Err(StoreError::AlreadyExists(key.to_string())),
        Some(_) => Err(StoreError::VersionConflict {
            key: key.to_string(),
            expected,
            found,
        }),
    }
}

/// Paging options for [`KvStore::list`].
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Maximum entries per page. Zero is treated as one.
    pub limit: usize,
    /// Resume strictly after this position.
    pub cursor: Option<Cursor>,
}

impl ListOptions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            cursor: None,
        }
    }

    pub fn after(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub(crate) fn page_size(&self) -> usize {
        self.limit.max(1)
    }
}

impl Default for ListOptions {
    fn default() -> Self {
        Self::new(DEFAULT_LIST_LIMIT)
    }
}

/// One page of a prefix scan.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Entries in key order.
    pub entries: Vec<KvEntry>,
    /// Present when the page is full and more entries may follow.
    pub cursor: Option<Cursor>,
}

impl ListPage {
    pub(crate) fn from_entries(entries: Vec<KvEntry>, limit: usize) -> Self {
        let cursor = if entries.len() >= limit {
            entries.last().map(|e| Cursor::after(&e.key))
        } else {
            None
        };
        Self { entries, cursor }
    }
}

/// Resolves where a scan over `prefix` starts and validates a caller cursor.
pub(crate) fn scan_start(prefix: &Key, options: &ListOptions) -> Result<Key> {
    match &options.cursor {
        Some(cursor) => {
            let key = cursor.key()?;
            if !key.is_under(prefix) {
                return Err(StoreError::InvalidKey(format!(
                    "cursor does not belong to prefix {}",
                    prefix
                )));
            }
            Ok(key)
        }
        None => Ok(prefix.clone()),
    }
}

/// The core key-value storage trait.
///
/// All storage backends (SQLite, memory) implement this trait.
/// Code should depend on this trait, not specific implementations.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get an entry by key.
    ///
    /// Returns `None` if the key does not exist.
    async fn get(&self, key: &Key) -> Result<Option<KvEntry>>;

    /// Set a key to a value unconditionally.
    ///
    /// Returns the new versionstamp.
    async fn set(&self, key: &Key, value: Vec<u8>) -> Result<Versionstamp>;

    /// Delete a key.
    ///
    /// Returns `Ok(())` if the key was deleted or didn't exist.
    async fn delete(&self, key: &Key) -> Result<()>;

    /// List entries strictly under `prefix`, in key order, one page at a time.
    async fn list(&self, prefix: &Key, options: ListOptions) -> Result<ListPage>;

    /// Compare-and-set: update only if the current versionstamp matches.
    ///
    /// Returns the new versionstamp on success, or `VersionConflict` if the
    /// key changed or disappeared since it was read.
    async fn compare_and_set(
        &self,
        key: &Key,
        expected: Versionstamp,
        value: Vec<u8>,
    ) -> Result<Versionstamp>;

    /// Create a key only if it doesn't already exist.
    ///
    /// Returns `AlreadyExists` if the key is present.
    async fn create_if_not_exists(&self, key: &Key, value: Vec<u8>) -> Result<Versionstamp>;

    /// Execute a transaction atomically.
    ///
    /// All operations succeed or all fail. CheckVersion operations are
    /// evaluated first; if any fail, the transaction is aborted. All
    /// mutations share the returned versionstamp.
    async fn transaction(&self, ops: Vec<TransactionOp>) -> Result<Versionstamp>;

    /// Release backend resources. Later calls fail with `StoreUnavailable`.
    async fn close(&self) -> Result<()>;

    /// Check if a key exists.
    async fn exists(&self, key: &Key) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPart;

    fn key(s: &str) -> Key {
        Key::new([KeyPart::from("t"), KeyPart::from(s)])
    }

    #[test]
    fn test_transaction_op_creation() {
        let op = TransactionOp::set(key("a"), vec![1, 2, 3]);
        assert!(matches!(op, TransactionOp::Set { .. }));

        let op = TransactionOp::delete(key("a"));
        assert!(matches!(op, TransactionOp::Delete { .. }));

        let op = TransactionOp::check_version(key("a"), Versionstamp::new(5));
        assert!(matches!(
            op,
            TransactionOp::CheckVersion {
                expected: Some(v),
                ..
            } if v == Versionstamp::new(5)
        ));

        let op = TransactionOp::check_absent(key("a"));
        assert!(matches!(
            op,
            TransactionOp::CheckVersion { expected: None, .. }
        ));
    }

    #[test]
    fn test_check_holds() {
        let k = key("a");
        let v1 = Some(Versionstamp::new(1));
        assert!(check_holds(&k, None, None).is_ok());
        assert!(check_holds(&k, v1, v1).is_ok());
        assert!(matches!(
            check_holds(&k, None, v1),
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            check_holds(&k, v1, None),
            Err(StoreError::VersionConflict { .. })
        ));
    }

    #[test]
    fn test_scan_start_rejects_foreign_cursor() {
        let prefix = Key::new([KeyPart::from("t")]);
        let foreign = Key::new([KeyPart::from("other"), KeyPart::from("x")]);
        let options = ListOptions::new(10).after(Some(Cursor::after(&foreign)));
        assert!(matches!(
            scan_start(&prefix, &options),
            Err(StoreError::InvalidKey(_))
        ));

        let options = ListOptions::new(10).after(Some(Cursor::after(&key("b"))));
        assert_eq!(scan_start(&prefix, &options).unwrap(), key("b"));
    }

    #[test]
    fn test_page_cursor_only_when_full() {
        let entries = vec![KvEntry {
            key: key("a"),
            value: vec![],
            versionstamp: Versionstamp::new(1),
        }];
        assert!(ListPage::from_entries(entries.clone(), 2).cursor.is_none());
        assert_eq!(
            ListPage::from_entries(entries, 1).cursor,
            Some(Cursor::after(&key("a")))
        );
    }
}
