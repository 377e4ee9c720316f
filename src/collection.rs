//! Document collections on top of a [`KvStore`].
//!
//! Each document lives at `[collection, _id]`. Uniqueness of `_id` comes from
//! the store's create-if-absent write, updates are guarded by the versionstamp
//! that was read, and multi-document deletes go through one atomic
//! transaction followed by a verifying re-scan.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::filter::Filter;
use crate::id::{Allocation, DocumentId, IdAllocator};
use crate::key::{Cursor, Key, KeyPart, Versionstamp};
use crate::store::{KvEntry, KvStore, ListOptions, TransactionOp};
use crate::value::{Document, Value, ID_FIELD};

/// Default number of matches returned by [`Collection::find_many`].
pub const DEFAULT_FIND_LIMIT: usize = 100;

/// Number of raw entries fetched from the store per scan page.
pub const SCAN_PAGE_SIZE: usize = 100;

/// Result of [`Collection::save`].
#[derive(Debug, Clone, PartialEq)]
pub struct SaveResult {
    pub ok: bool,
    pub versionstamp: Option<Versionstamp>,
    pub id: DocumentId,
}

/// Result of [`Collection::find_by_id`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindResult {
    pub ok: bool,
    pub value: Option<Document>,
    pub versionstamp: Option<Versionstamp>,
}

impl FindResult {
    fn missing() -> Self {
        Self::default()
    }

    /// Turns absence into a `NotFound` error.
    pub fn into_document(self) -> Result<Document> {
        self.value
            .ok_or_else(|| StoreError::NotFound("document".to_string()))
    }
}

/// A document matched by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundDocument {
    pub id: DocumentId,
    pub value: Document,
    pub versionstamp: Versionstamp,
}

/// Paging options for [`Collection::find_many`].
#[derive(Debug, Clone)]
pub struct FindOptions {
    /// Maximum number of matches. Zero is treated as one.
    pub limit: usize,
    /// Continue a previous scan.
    pub cursor: Option<Cursor>,
}

impl FindOptions {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit,
            cursor: None,
        }
    }

    pub fn after(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }
}

impl Default for FindOptions {
    fn default() -> Self {
        Self::limit(DEFAULT_FIND_LIMIT)
    }
}

/// Result of [`Collection::find_many`].
#[derive(Debug, Clone, Default)]
pub struct FindManyResult {
    pub entries: Vec<FoundDocument>,
    /// Set when the scan stopped at the limit and more documents may follow.
    pub cursor: Option<Cursor>,
}

impl FindManyResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Just the documents, in key order.
    pub fn documents(self) -> Vec<Document> {
        self.entries.into_iter().map(|e| e.value).collect()
    }
}

/// Result of [`Collection::update_by_id`] and [`Collection::find_one_and_update`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateResult {
    pub ok: bool,
    pub versionstamp: Option<Versionstamp>,
    pub data_old: Option<Document>,
    pub data_new: Option<Document>,
}

impl UpdateResult {
    fn missing() -> Self {
        Self::default()
    }
}

/// Result of [`Collection::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    pub ok: bool,
}

/// Result of [`Collection::delete_many`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteCount {
    /// Every matched document was removed and nothing matching remains.
    pub ok: bool,
    /// Documents matched before the delete.
    pub total: usize,
    /// Documents removed by the atomic commit.
    pub removed: usize,
    /// Documents still matching after the commit.
    pub left: usize,
}

/// Explicit opt-in for [`Collection::delete_collection`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteCollectionConfirmation {
    pub wants_to_remove_every_thing_of_this_collection: bool,
}

impl DeleteCollectionConfirmation {
    pub fn confirmed() -> Self {
        Self {
            wants_to_remove_every_thing_of_this_collection: true,
        }
    }
}

/// A named group of documents sharing the key prefix `[name]`.
///
/// Cheap to clone; clones share the store handle.
#[derive(Clone)]
pub struct Collection {
    name: String,
    store: Arc<dyn KvStore>,
    allocator: IdAllocator,
}

impl Collection {
    pub fn new(name: impl Into<String>, store: Arc<dyn KvStore>) -> Self {
        Self {
            name: name.into(),
            store,
            allocator: IdAllocator::new(),
        }
    }

    pub fn with_allocator(mut self, allocator: IdAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> Key {
        Key::new([KeyPart::from(&self.name)])
    }

    fn key(&self, id: DocumentId) -> Key {
        self.prefix().child(id)
    }

    fn decode(entry: &KvEntry) -> Result<(DocumentId, Document)> {
        let id = entry
            .key
            .last()
            .cloned()
            .ok_or_else(|| StoreError::InvalidKey("empty document key".to_string()))?;
        let doc = Document::from_bytes(&entry.value)?;
        Ok((id, doc))
    }

    /// Insert a new document.
    ///
    /// A supplied `_id` must be unused, otherwise `DuplicateKey`. Without one
    /// a random id is generated and collisions are retried a bounded number
    /// of times (`AllocationExhausted`).
    pub async fn save(&self, data: Document) -> Result<SaveResult> {
        let provided = match data.id() {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(id) => Some(DocumentId::try_from(id)?),
        };

        match self.allocator.allocate(provided) {
            Allocation::Explicit(id) => {
                let key = self.key(id.clone());
                let bytes = data.to_bytes()?;
                match self.store.create_if_not_exists(&key, bytes).await {
                    Ok(versionstamp) => {
                        debug!(collection = %self.name, %id, "saved document");
                        Ok(SaveResult {
                            ok: true,
                            versionstamp: Some(versionstamp),
                            id,
                        })
                    }
                    Err(StoreError::AlreadyExists(_)) => Err(StoreError::DuplicateKey(key.to_string())),
                    Err(e) => Err(e),
                }
            }
            Allocation::Generated(candidates) => {
                for id in candidates {
                    let mut doc = data.clone();
                    doc.insert(ID_FIELD, id.clone());
                    let key = self.key(id.clone());
                    match self.store.create_if_not_exists(&key, doc.to_bytes()?).await {
                        Ok(versionstamp) => {
                            debug!(collection = %self.name, %id, "saved document");
                            return Ok(SaveResult {
                                ok: true,
                                versionstamp: Some(versionstamp),
                                id,
                            });
                        }
                        Err(StoreError::AlreadyExists(_)) => {
                            warn!(collection = %self.name, %id, "generated id collided, retrying");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(StoreError::AllocationExhausted {
                    attempts: self.allocator.max_attempts(),
                })
            }
        }
    }

    /// Look up one document. Absence and read failures both give `ok: false`.
    pub async fn find_by_id(&self, id: impl Into<DocumentId>) -> FindResult {
        let key = self.key(id.into());
        let entry = match self.store.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return FindResult::missing(),
            Err(e) => {
                warn!(%key, error = %e, "find_by_id read failed");
                return FindResult::missing();
            }
        };

        match Document::from_bytes(&entry.value) {
            Ok(value) => FindResult {
                ok: true,
                value: Some(value),
                versionstamp: Some(entry.versionstamp),
            },
            Err(e) => {
                warn!(%key, error = %e, "find_by_id could not decode document");
                FindResult::missing()
            }
        }
    }

    /// Scan the collection in key order and collect up to `limit` documents
    /// matching `filter`. Stops at the limit without reading further.
    ///
    /// Store pages are followed until `limit` matches are found or the
    /// collection is exhausted, so a short result always means nothing else
    /// matches. The returned cursor is therefore only set when the scan
    /// stopped at `limit`; it resumes after the last matched document.
    pub async fn find_many(
        &self,
        filter: impl Into<Filter>,
        options: FindOptions,
    ) -> Result<FindManyResult> {
        let filter = filter.into();
        let limit = options.limit.max(1);
        let prefix = self.prefix();
        let mut cursor = options.cursor;
        let mut entries = Vec::new();

        loop {
            let page = self
                .store
                .list(&prefix, ListOptions::new(SCAN_PAGE_SIZE).after(cursor.take()))
                .await?;

            for entry in &page.entries {
                let (id, value) = match Self::decode(entry) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!(key = %entry.key, error = %e, "skipping undecodable document");
                        continue;
                    }
                };
                if !filter.matches(&value) {
                    continue;
                }
                entries.push(FoundDocument {
                    id,
                    value,
                    versionstamp: entry.versionstamp,
                });
                if entries.len() >= limit {
                    return Ok(FindManyResult {
                        entries,
                        cursor: Some(Cursor::after(&entry.key)),
                    });
                }
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(FindManyResult { entries, cursor: None }),
            }
        }
    }

    /// Every document matching `filter`, following cursors to the end.
    pub async fn find_all(&self, filter: impl Into<Filter>) -> Result<Vec<FoundDocument>> {
        let filter = filter.into();
        let mut found = Vec::new();
        let mut cursor = None;

        loop {
            let page = self
                .find_many(
                    filter.clone(),
                    FindOptions::limit(SCAN_PAGE_SIZE).after(cursor),
                )
                .await?;
            found.extend(page.entries);
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(found),
            }
        }
    }

    /// True if at least one document matches. Stops at the first match.
    pub async fn is_exist(&self, filter: impl Into<Filter>) -> Result<bool> {
        let found = self.find_many(filter, FindOptions::limit(1)).await?;
        Ok(!found.is_empty())
    }

    /// True if no document matches.
    pub async fn is_unique(&self, filter: impl Into<Filter>) -> Result<bool> {
        Ok(!self.is_exist(filter).await?)
    }

    /// Shallow-merge `patch` into the document with `id`.
    ///
    /// A missing document gives `ok: false`. If another writer changes the
    /// document between the read and the write, `Conflict` is returned and
    /// nothing is written; callers retry with a fresh read.
    pub async fn update_by_id(
        &self,
        id: impl Into<DocumentId>,
        patch: Document,
    ) -> Result<UpdateResult> {
        let key = self.key(id.into());
        let Some(entry) = self.store.get(&key).await? else {
            return Ok(UpdateResult::missing());
        };
        let current = Document::from_bytes(&entry.value)?;
        self.write_update(key, current, entry.versionstamp, patch)
            .await
    }

    /// Update the first document (in key order) matching `filter`.
    ///
    /// Which document is "first" follows id order, not insertion order,
    /// unless ids are monotonic.
    pub async fn find_one_and_update(
        &self,
        filter: impl Into<Filter>,
        patch: Document,
    ) -> Result<UpdateResult> {
        let found = self.find_many(filter, FindOptions::limit(1)).await?;
        let Some(first) = found.entries.into_iter().next() else {
            return Ok(UpdateResult::missing());
        };
        let key = self.key(first.id);
        self.write_update(key, first.value, first.versionstamp, patch)
            .await
    }

    async fn write_update(
        &self,
        key: Key,
        current: Document,
        versionstamp: Versionstamp,
        mut patch: Document,
    ) -> Result<UpdateResult> {
        // The key owns the identity.
        patch.remove(ID_FIELD);

        let mut data_new = current.clone();
        data_new.merge(&patch);

        match self
            .store
            .compare_and_set(&key, versionstamp, data_new.to_bytes()?)
            .await
        {
            Ok(new_versionstamp) => {
                debug!(%key, "updated document");
                Ok(UpdateResult {
                    ok: true,
                    versionstamp: Some(new_versionstamp),
                    data_old: Some(current),
                    data_new: Some(data_new),
                })
            }
            Err(StoreError::VersionConflict { .. }) => Err(StoreError::Conflict(key.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Remove the document with `id`. Succeeds whether or not it existed;
    /// only a store failure gives `ok: false`.
    pub async fn delete(&self, id: impl Into<DocumentId>) -> DeleteResult {
        let key = self.key(id.into());
        match self.store.delete(&key).await {
            Ok(()) => DeleteResult { ok: true },
            Err(e) => {
                warn!(%key, error = %e, "delete failed");
                DeleteResult { ok: false }
            }
        }
    }

    /// Remove every document matching `filter` in one atomic commit, then
    /// re-scan to confirm none is left.
    ///
    /// Each delete is guarded by the versionstamp seen during the scan. If any
    /// matched document changed before the commit, nothing is deleted and the
    /// result has `ok: false, removed: 0`. A matching document inserted after
    /// the scan survives and also makes `ok` false.
    pub async fn delete_many(&self, filter: impl Into<Filter>) -> Result<DeleteCount> {
        let filter = filter.into();
        let matched = self.find_all(filter.clone()).await?;
        let total = matched.len();
        let mut removed = 0;

        if total > 0 {
            let ops: Vec<TransactionOp> = matched
                .into_iter()
                .flat_map(|found| {
                    let key = self.key(found.id);
                    [
                        TransactionOp::check_version(key.clone(), found.versionstamp),
                        TransactionOp::delete(key),
                    ]
                })
                .collect();
            match self.store.transaction(ops).await {
                Ok(_) => removed = total,
                Err(StoreError::VersionConflict { key, .. }) => {
                    warn!(collection = %self.name, %key, "delete_many aborted, a matched document changed");
                }
                Err(e) => return Err(e),
            }
        }

        let left = self.find_all(filter).await?.len();
        if left > 0 {
            warn!(collection = %self.name, left, "documents still match after delete_many");
        }
        debug!(collection = %self.name, total, left, "delete_many finished");

        Ok(DeleteCount {
            ok: removed == total && left == 0,
            total,
            removed,
            left,
        })
    }

    /// Remove every document of the collection. Does nothing and returns
    /// `false` unless the confirmation flag is set.
    pub async fn delete_collection(&self, confirm: DeleteCollectionConfirmation) -> Result<bool> {
        if !confirm.wants_to_remove_every_thing_of_this_collection {
            return Ok(false);
        }
        Ok(self.delete_many(Filter::all()).await?.ok)
    }
}
