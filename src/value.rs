//! Schema-less document values.
//!
//! A [`Document`] is an insertion-ordered map from field name to [`Value`].
//! Documents are persisted as JSON with explicit variant tags so that every
//! value, byte strings included, reads back exactly as it was written.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Name of the identity field every stored document carries.
pub const ID_FIELD: &str = "_id";

/// A tagged document value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    /// Double precision number; `20` and `20.0` are the same value.
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(Document),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Object(doc) => Some(doc),
            _ => None,
        }
    }

    fn ensure_finite(&self, path: &str) -> Result<()> {
        match self {
            Value::Number(n) if !n.is_finite() => Err(StoreError::SerializationError(format!(
                "field {} holds a non-finite number",
                path
            ))),
            Value::Array(items) => items
                .iter()
                .try_for_each(|item| item.ensure_finite(path)),
            Value::Object(doc) => doc.ensure_finite(path),
            _ => Ok(()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s),
            Value::Bytes(bytes) => serde_json::Value::Array(
                bytes.into_iter().map(serde_json::Value::from).collect(),
            ),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(doc) => serde_json::Value::Object(
                doc.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

/// An ordered field-name to value mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(IndexMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Builds a document from a JSON object.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match Value::from(json) {
            Value::Object(doc) => Ok(doc),
            other => Err(StoreError::SerializationError(format!(
                "expected a JSON object, got {:?}",
                other
            ))),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Object(self.clone()).into()
    }

    /// Sets `field`, returning the previous value. New fields go last.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.shift_remove(field)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// The raw `_id` value, if present.
    pub fn id(&self) -> Option<&Value> {
        self.get(ID_FIELD)
    }

    /// Shallow merge: every top-level field of `patch` replaces the field of
    /// the same name here. Nested objects and arrays are replaced whole.
    pub fn merge(&mut self, patch: &Document) {
        for (field, value) in patch.iter() {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Encodes the document for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.ensure_finite("")?;
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn ensure_finite(&self, parent: &str) -> Result<()> {
        for (field, value) in self.iter() {
            let path = if parent.is_empty() {
                field.clone()
            } else {
                format!("{}.{}", parent, field)
            };
            value.ensure_finite(&path)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[doc(hidden)]
pub fn normalize_field(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}

/// Builds a [`Document`].
///
/// ```
/// use univrs_docstore::doc;
///
/// let user = doc! {
///     name: "Alice",
///     age: 30,
///     "home-town": "Dhaka",
///     address: { city: "Dhaka", zip: null },
///     tags: ["admin", "ops"],
/// };
/// assert_eq!(user.len(), 5);
/// ```
///
/// Negative numbers and other multi-token expressions need parentheses:
/// `doc! { delta: (-1) }`.
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };

    ($($field:tt : $value:tt),* $(,)?) => {{
        let mut doc = $crate::Document::new();
        $(
            doc.insert(
                $crate::value::normalize_field(stringify!($field)),
                $crate::doc_value!($value),
            );
        )*
        doc
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! doc_value {
    (null) => {
        $crate::Value::Null
    };

    ({ $($field:tt : $value:tt),* $(,)? }) => {
        $crate::Value::Object($crate::doc! { $($field : $value),* })
    };

    ([ $($value:tt),* $(,)? ]) => {
        $crate::Value::Array(vec![$($crate::doc_value!($value)),*])
    };

    ($value:expr) => {
        $crate::Value::from($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_macro() {
        let name = "Alice".to_string();
        let doc = doc! {
            name: name,
            age: 30,
            "home-town": "Dhaka",
            nested: { inner: [1, 2, null] },
            delta: (-1),
        };

        assert_eq!(doc.get("name"), Some(&Value::from("Alice")));
        assert_eq!(doc.get("age"), Some(&Value::Number(30.0)));
        assert!(doc.contains_key("home-town"));
        assert_eq!(doc.get("delta"), Some(&Value::Number(-1.0)));

        let inner = doc.get("nested").and_then(Value::as_document).unwrap();
        assert_eq!(
            inner.get("inner"),
            Some(&Value::Array(vec![
                Value::Number(1.0),
                Value::Number(2.0),
                Value::Null
            ]))
        );
        assert!(doc!().is_empty());
    }

    #[test]
    fn test_field_order_is_kept() {
        let doc = doc! { z: 1, a: 2, m: 3 };
        let fields: Vec<_> = doc.fields().collect();
        assert_eq!(fields, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_shallow_merge() {
        let mut doc = doc! { a: 1, b: 2, nested: { x: 1, y: 2 }, _id: "k" };
        doc.merge(&doc! { b: 3, nested: { x: 9 }, c: true });

        assert_eq!(doc.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(doc.get("b"), Some(&Value::Number(3.0)));
        assert_eq!(doc.get("c"), Some(&Value::Bool(true)));
        assert_eq!(doc.get("nested"), Some(&Value::Object(doc! { x: 9 })));
        assert_eq!(doc.id(), Some(&Value::from("k")));
    }

    #[test]
    fn test_number_equality_ignores_representation() {
        assert_eq!(Value::from(20), Value::from(20.0));
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
        assert_ne!(Value::from(1), Value::from("1"));
    }

    #[test]
    fn test_storage_encoding_keeps_bytes_apart_from_arrays() {
        let doc = doc! {
            raw: (Value::Bytes(vec![1, 2])),
            list: [1, 2],
        };
        let decoded = Document::from_bytes(&doc.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, doc);
        assert!(matches!(decoded.get("raw"), Some(Value::Bytes(_))));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        let doc = doc! { ok: 1, bad: { deep: (f64::INFINITY) } };
        let err = doc.to_bytes().unwrap_err();
        assert!(matches!(err, StoreError::SerializationError(_)));
        assert!(err.to_string().contains("bad.deep"));
    }

    #[test]
    fn test_json_conversion() {
        let doc = Document::from_json(serde_json::json!({
            "name": "A",
            "age": 20,
            "tags": ["x"],
            "meta": { "active": true }
        }))
        .unwrap();
        assert_eq!(doc.get("age"), Some(&Value::Number(20.0)));
        assert_eq!(doc.to_json()["meta"]["active"], serde_json::json!(true));

        assert!(Document::from_json(serde_json::json!([1, 2])).is_err());
    }
}
