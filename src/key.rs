//! Keys, versionstamps and scan cursors.
//!
//! A key is a sequence of typed parts. Keys sort part by part; across types
//! the order is bytes < string < number, and numbers sort by IEEE total order.
//! [`Key::encode`] produces a byte string whose lexicographic order matches
//! key order, so a prefix of parts is also a byte prefix of the encoding.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StoreError};

/// Maximum encoded key length in bytes.
pub const MAX_KEY_LENGTH: usize = 2048;

const TAG_BYTES: u8 = 0x01;
const TAG_STRING: u8 = 0x02;
const TAG_NUMBER: u8 = 0x21;
const ESCAPE: u8 = 0xFF;

/// One component of a [`Key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeyPart {
    Bytes(Vec<u8>),
    String(String),
    Number(f64),
}

impl KeyPart {
    fn rank(&self) -> u8 {
        match self {
            KeyPart::Bytes(_) => 0,
            KeyPart::String(_) => 1,
            KeyPart::Number(_) => 2,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            KeyPart::Bytes(bytes) => {
                out.push(TAG_BYTES);
                escape_into(bytes, out);
            }
            KeyPart::String(s) => {
                out.push(TAG_STRING);
                escape_into(s.as_bytes(), out);
            }
            KeyPart::Number(n) => {
                out.push(TAG_NUMBER);
                let bits = n.to_bits();
                let ordered = if bits >> 63 == 1 {
                    !bits
                } else {
                    bits ^ (1 << 63)
                };
                out.extend_from_slice(&ordered.to_be_bytes());
            }
        }
    }
}

fn escape_into(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        out.push(b);
        if b == 0x00 {
            out.push(ESCAPE);
        }
    }
    out.push(0x00);
}

/// Reads an escaped, 0x00-terminated run starting at `pos`.
fn unescape(buf: &[u8], mut pos: usize) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    loop {
        let b = *buf
            .get(pos)
            .ok_or_else(|| StoreError::InvalidKey("unterminated key part".to_string()))?;
        pos += 1;
        if b != 0x00 {
            out.push(b);
            continue;
        }
        if buf.get(pos) == Some(&ESCAPE) {
            out.push(0x00);
            pos += 1;
        } else {
            return Ok((out, pos));
        }
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Bytes(a), KeyPart::Bytes(b)) => a.cmp(b),
            (KeyPart::String(a), KeyPart::String(b)) => a.cmp(b),
            (KeyPart::Number(a), KeyPart::Number(b)) => a.total_cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Bytes(bytes) => write!(f, "0x{}", to_hex(bytes)),
            KeyPart::String(s) => write!(f, "{:?}", s),
            KeyPart::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::String(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::String(s)
    }
}

impl From<&String> for KeyPart {
    fn from(s: &String) -> Self {
        KeyPart::String(s.clone())
    }
}

impl From<f64> for KeyPart {
    fn from(n: f64) -> Self {
        KeyPart::Number(n)
    }
}

impl From<i32> for KeyPart {
    fn from(n: i32) -> Self {
        KeyPart::Number(n.into())
    }
}

impl From<u32> for KeyPart {
    fn from(n: u32) -> Self {
        KeyPart::Number(n.into())
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        KeyPart::Number(n as f64)
    }
}

impl From<Vec<u8>> for KeyPart {
    fn from(bytes: Vec<u8>) -> Self {
        KeyPart::Bytes(bytes)
    }
}

/// An ordered, multi-part store key such as `["users", "u1"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(Vec<KeyPart>);

impl Key {
    pub fn new(parts: impl IntoIterator<Item = KeyPart>) -> Self {
        Self(parts.into_iter().collect())
    }

    /// Returns a copy of this key with `part` appended.
    pub fn child(&self, part: impl Into<KeyPart>) -> Self {
        let mut parts = self.0.clone();
        parts.push(part.into());
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn last(&self) -> Option<&KeyPart> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `prefix` is a proper prefix of this key.
    pub fn is_under(&self, prefix: &Key) -> bool {
        self.0.len() > prefix.0.len() && self.0.starts_with(&prefix.0)
    }

    /// Order-preserving byte encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for part in &self.0 {
            part.encode_into(&mut out);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut parts = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let tag = buf[pos];
            pos += 1;
            match tag {
                TAG_BYTES => {
                    let (bytes, next) = unescape(buf, pos)?;
                    parts.push(KeyPart::Bytes(bytes));
                    pos = next;
                }
                TAG_STRING => {
                    let (bytes, next) = unescape(buf, pos)?;
                    let s = String::from_utf8(bytes)
                        .map_err(|e| StoreError::InvalidKey(e.to_string()))?;
                    parts.push(KeyPart::String(s));
                    pos = next;
                }
                TAG_NUMBER => {
                    let raw: [u8; 8] = buf
                        .get(pos..pos + 8)
                        .and_then(|s| s.try_into().ok())
                        .ok_or_else(|| StoreError::InvalidKey("truncated number".to_string()))?;
                    let ordered = u64::from_be_bytes(raw);
                    let bits = if ordered >> 63 == 1 {
                        ordered ^ (1 << 63)
                    } else {
                        !ordered
                    };
                    parts.push(KeyPart::Number(f64::from_bits(bits)));
                    pos += 8;
                }
                other => {
                    return Err(StoreError::InvalidKey(format!(
                        "unknown key part tag 0x{:02x}",
                        other
                    )))
                }
            }
        }
        Ok(Self(parts))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, "]")
    }
}

/// Validate that a key is well-formed.
pub fn validate_key(key: &Key) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("key cannot be empty".to_string()));
    }
    let len = key.encode().len();
    if len > MAX_KEY_LENGTH {
        return Err(StoreError::InvalidKey(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// Store-wide revision token. Every committed write gets a larger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Versionstamp(u64);

impl Versionstamp {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Versionstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020x}", self.0)
    }
}

/// Opaque continuation token for prefix scans. Resumes strictly after the
/// key it was taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(Vec<u8>);

impl Cursor {
    pub fn after(key: &Key) -> Self {
        Self(key.encode())
    }

    pub(crate) fn key(&self) -> Result<Key> {
        Key::decode(&self.0)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_hex(&self.0))
    }
}

impl FromStr for Cursor {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        if !s.is_ascii() || s.len() % 2 != 0 {
            return Err(StoreError::InvalidKey("malformed cursor".to_string()));
        }
        let bytes = (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|_| StoreError::InvalidKey("malformed cursor".to_string()))?;
        Key::decode(&bytes)?;
        Ok(Self(bytes))
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(parts: Vec<KeyPart>) -> Key {
        Key::new(parts)
    }

    #[test]
    fn test_cross_type_order() {
        let bytes = KeyPart::Bytes(vec![0xff]);
        let string = KeyPart::from("a");
        let number = KeyPart::from(-1.0);
        assert!(bytes < string);
        assert!(string < number);
    }

    #[test]
    fn test_encoding_preserves_order() {
        let mut keys = vec![
            key(vec!["users".into(), "b".into()]),
            key(vec!["users".into(), "a".into()]),
            key(vec!["users".into(), "a\0".into()]),
            key(vec!["users".into(), 3i32.into()]),
            key(vec!["users".into(), (-2.5).into()]),
            key(vec!["users".into(), KeyPart::Bytes(vec![1, 0, 2])]),
            key(vec!["posts".into(), "z".into()]),
            key(vec!["users".into()]),
        ];
        let mut by_encoding = keys.clone();
        keys.sort();
        by_encoding.sort_by_key(|k| k.encode());
        assert_eq!(keys, by_encoding);
    }

    #[test]
    fn test_decode_roundtrip_with_nul_bytes() {
        let original = key(vec![
            "col\0lection".into(),
            KeyPart::Bytes(vec![0, 0, 255]),
            (-0.0).into(),
        ]);
        assert_eq!(Key::decode(&original.encode()).unwrap(), original);
    }

    #[test]
    fn test_prefix_is_byte_prefix() {
        let prefix = key(vec!["users".into()]);
        let child = prefix.child("u1");
        assert!(child.encode().starts_with(&prefix.encode()));
        assert!(child.is_under(&prefix));
        assert!(!prefix.is_under(&prefix));
        assert!(!key(vec!["users2".into(), "x".into()]).is_under(&prefix));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key(&key(vec!["users".into()])).is_ok());
        assert!(matches!(
            validate_key(&Key::default()),
            Err(StoreError::InvalidKey(_))
        ));
        let long = key(vec!["x".repeat(MAX_KEY_LENGTH).into()]);
        assert!(matches!(validate_key(&long), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_display() {
        let k = key(vec!["users".into(), 7i32.into(), KeyPart::Bytes(vec![0xab])]);
        assert_eq!(k.to_string(), r#"["users", 7, 0xab]"#);
        assert_eq!(Versionstamp::new(255).to_string(), "000000000000000000ff");
    }

    #[test]
    fn test_cursor_text_form() {
        let cursor = Cursor::after(&key(vec!["users".into(), "u9".into()]));
        let parsed: Cursor = cursor.to_string().parse().unwrap();
        assert_eq!(parsed, cursor);
        assert!("zz".parse::<Cursor>().is_err());
        assert!("abc".parse::<Cursor>().is_err());
    }
}
