//! Session payload encoding.
//!
//! A session's items are stored as an opaque blob. The blob is MessagePack: a
//! sequence of `[name, value]` pairs in insertion order, so decoding returns
//! the same names, values and order that were encoded. MessagePack is binary
//! safe, so non-ASCII text and raw bytes survive unchanged.

use serde::{Deserialize, Serialize};

use crate::StoreError;

/// A single session value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl SessionValue {
    /// Returns the text content if this is a `Text` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SessionValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SessionValue::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for SessionValue {
    fn from(value: &str) -> Self {
        SessionValue::Text(value.to_owned())
    }
}

impl From<String> for SessionValue {
    fn from(value: String) -> Self {
        SessionValue::Text(value)
    }
}

impl From<i64> for SessionValue {
    fn from(value: i64) -> Self {
        SessionValue::Int(value)
    }
}

impl From<bool> for SessionValue {
    fn from(value: bool) -> Self {
        SessionValue::Bool(value)
    }
}

impl From<f64> for SessionValue {
    fn from(value: f64) -> Self {
        SessionValue::Float(value)
    }
}

impl From<Vec<u8>> for SessionValue {
    fn from(value: Vec<u8>) -> Self {
        SessionValue::Bytes(value)
    }
}

/// Ordered mapping of item names to values.
///
/// Names are unique. Inserting an existing name replaces its value and keeps
/// its original position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionItems {
    entries: Vec<(String, SessionValue)>,
}

impl SessionItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&SessionValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets `name` to `value`, returning the previous value if there was one.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<SessionValue>,
    ) -> Option<SessionValue> {
        let name = name.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<SessionValue> {
        let index = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SessionValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    fn has_duplicate_names(&self) -> bool {
        self.entries
            .iter()
            .enumerate()
            .any(|(i, (name, _))| self.entries[..i].iter().any(|(seen, _)| seen == name))
    }
}

impl<K, V> FromIterator<(K, V)> for SessionItems
where
    K: Into<String>,
    V: Into<SessionValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut items = SessionItems::new();
        for (name, value) in iter {
            items.insert(name, value);
        }
        items
    }
}

/// Encodes items into the stored payload format.
pub fn encode(items: &SessionItems) -> Result<Vec<u8>, StoreError> {
    rmp_serde::to_vec(items).map_err(|e| {
        log::error!(target: "sessionlock", "msg=\"payload encode failed\", error=\"{e}\"");
        StoreError::MalformedPayload(e.to_string())
    })
}

/// Decodes a stored payload. An empty payload is an empty session.
pub fn decode(bytes: &[u8]) -> Result<SessionItems, StoreError> {
    if bytes.is_empty() {
        return Ok(SessionItems::new());
    }

    let items: SessionItems = rmp_serde::from_slice(bytes).map_err(|e| {
        log::error!(target: "sessionlock", "msg=\"payload decode failed\", error=\"{e}\"");
        StoreError::MalformedPayload(e.to_string())
    })?;

    if items.has_duplicate_names() {
        return Err(StoreError::MalformedPayload(
            "duplicate item name in payload".to_owned(),
        ));
    }

    Ok(items)
}
