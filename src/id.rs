//! Document identifiers and their allocation.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::key::KeyPart;
use crate::value::Value;

/// Longest accepted byte-sequence id.
pub const MAX_BYTES_ID_LEN: usize = 64;

/// Default number of auto-generated candidates tried per save.
pub const DEFAULT_MAX_ATTEMPTS: usize = 8;

/// A document `_id`: a string, a number or a short byte sequence. It is also
/// the last part of the document's store key.
pub type DocumentId = KeyPart;

impl TryFrom<&Value> for KeyPart {
    type Error = StoreError;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(KeyPart::String(s.clone())),
            Value::Number(n) if n.is_finite() => Ok(KeyPart::Number(*n)),
            Value::Bytes(b) if b.len() <= MAX_BYTES_ID_LEN => Ok(KeyPart::Bytes(b.clone())),
            Value::Bytes(b) => Err(StoreError::InvalidId(format!(
                "byte id of {} bytes exceeds {} bytes",
                b.len(),
                MAX_BYTES_ID_LEN
            ))),
            other => Err(StoreError::InvalidId(format!(
                "{:?} cannot be used as an id",
                other
            ))),
        }
    }
}

impl From<KeyPart> for Value {
    fn from(part: KeyPart) -> Self {
        match part {
            KeyPart::String(s) => Value::String(s),
            KeyPart::Number(n) => Value::Number(n),
            KeyPart::Bytes(b) => Value::Bytes(b),
        }
    }
}

/// Outcome of [`IdAllocator::allocate`].
pub enum Allocation {
    /// Caller-supplied id. Uniqueness is the caller's contract; a collision
    /// is final.
    Explicit(DocumentId),
    /// Fresh candidates, one per write attempt.
    Generated(Candidates),
}

/// Bounded sequence of generated id candidates.
pub struct Candidates {
    generator: IdGenerator,
    remaining: usize,
}

impl Iterator for Candidates {
    type Item = DocumentId;

    fn next(&mut self) -> Option<DocumentId> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some((self.generator)())
    }
}

type IdGenerator = Arc<dyn Fn() -> DocumentId + Send + Sync>;

/// Produces ids for documents saved without one.
///
/// Generated ids are random UUIDv4 strings; collisions are retried up to
/// `max_attempts` times in total.
#[derive(Clone)]
pub struct IdAllocator {
    generator: IdGenerator,
    max_attempts: usize,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            generator: Arc::new(|| KeyPart::String(Uuid::new_v4().to_string())),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Replaces the random generator, e.g. for monotonic ids.
    pub fn with_generator(
        mut self,
        generator: impl Fn() -> DocumentId + Send + Sync + 'static,
    ) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn allocate(&self, provided: Option<DocumentId>) -> Allocation {
        match provided {
            Some(id) => Allocation::Explicit(id),
            None => Allocation::Generated(Candidates {
                generator: Arc::clone(&self.generator),
                remaining: self.max_attempts,
            }),
        }
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdAllocator")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
