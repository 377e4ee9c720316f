//! In-memory key-value store implementation.
//!
//! This implementation is NOT durable - data is lost on process exit.
//! Use for testing, development and short-lived embedding.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::key::{validate_key, Key, Versionstamp};
use crate::store::{
    check_holds, scan_start, KvEntry, KvStore, ListOptions, ListPage, TransactionOp,
};

#[derive(Default)]
struct Inner {
    data: BTreeMap<Key, (Vec<u8>, Versionstamp)>,
    last_version: u64,
}

impl Inner {
    fn next_version(&mut self) -> Versionstamp {
        self.last_version += 1;
        Versionstamp::new(self.last_version)
    }

    fn current(&self, key: &Key) -> Option<Versionstamp> {
        self.data.get(key).map(|(_, v)| *v)
    }
}

/// In-memory implementation of KvStore.
///
/// Uses a BTreeMap for ordered key iteration and RwLock for concurrency.
/// Every write happens inside one write-lock section, which makes checks and
/// mutations atomic.
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::StoreUnavailable(
                "memory store is closed".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<KvEntry>> {
        self.ensure_open()?;
        validate_key(key)?;
        Ok(self.inner.read().data.get(key).map(|(value, v)| KvEntry {
            key: key.clone(),
            value: value.clone(),
            versionstamp: *v,
        }))
    }

    async fn set(&self, key: &Key, value: Vec<u8>) -> Result<Versionstamp> {
        self.ensure_open()?;
        validate_key(key)?;

        let mut inner = self.inner.write();
        let version = inner.next_version();
        inner.data.insert(key.clone(), (value, version));
        Ok(version)
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.ensure_open()?;
        validate_key(key)?;

        self.inner.write().data.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &Key, options: ListOptions) -> Result<ListPage> {
        self.ensure_open()?;
        let start = scan_start(prefix, &options)?;
        let limit = options.page_size();

        let inner = self.inner.read();
        let entries: Vec<KvEntry> = inner
            .data
            .range((Bound::Excluded(start), Bound::Unbounded))
            .take_while(|(k, _)| k.is_under(prefix))
            .take(limit)
            .map(|(k, (value, v))| KvEntry {
                key: k.clone(),
                value: value.clone(),
                versionstamp: *v,
            })
            .collect();

        Ok(ListPage::from_entries(entries, limit))
    }

    async fn compare_and_set(
        &self,
        key: &Key,
        expected: Versionstamp,
        value: Vec<u8>,
    ) -> Result<Versionstamp> {
        self.ensure_open()?;
        validate_key(key)?;

        let mut inner = self.inner.write();
        check_holds(key, Some(expected), inner.current(key))?;

        let version = inner.next_version();
        inner.data.insert(key.clone(), (value, version));
        Ok(version)
    }

    async fn create_if_not_exists(&self, key: &Key, value: Vec<u8>) -> Result<Versionstamp> {
        self.ensure_open()?;
        validate_key(key)?;

        let mut inner = self.inner.write();
        if inner.data.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }

        let version = inner.next_version();
        inner.data.insert(key.clone(), (value, version));
        Ok(version)
    }

    async fn transaction(&self, ops: Vec<TransactionOp>) -> Result<Versionstamp> {
        self.ensure_open()?;
        for op in &ops {
            match op {
                TransactionOp::Set { key, .. }
                | TransactionOp::Delete { key }
                | TransactionOp::CheckVersion { key, .. } => validate_key(key)?,
            }
        }

        let mut inner = self.inner.write();

        // First, validate all CheckVersion operations
        for op in &ops {
            if let TransactionOp::CheckVersion { key, expected } = op {
                check_holds(key, *expected, inner.current(key))?;
            }
        }

        // Then apply all Set and Delete operations
        let version = inner.next_version();
        for op in ops {
            match op {
                TransactionOp::Set { key, value } => {
                    inner.data.insert(key, (value, version));
                }
                TransactionOp::Delete { key } => {
                    inner.data.remove(&key);
                }
                TransactionOp::CheckVersion { .. } => {}
            }
        }

        Ok(version)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
