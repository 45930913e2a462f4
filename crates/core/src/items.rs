//! Session payload: the item collection and its serializer.
//!
//! The lock protocol treats the payload as opaque bytes. Only the
//! [`SessionSerializer`] knows how to turn [`SessionItems`] into bytes and
//! back; a different encoding can be swapped in without touching the store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Error raised by a [`SessionSerializer`].
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Failed to encode session items: {0}")]
    Encode(String),

    #[error("Failed to decode session items: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// SessionItems
// ---------------------------------------------------------------------------

/// String-keyed bag of values stored in a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionItems(BTreeMap<String, serde_json::Value>);

impl SessionItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.0.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<serde_json::Value> {
        self.0.remove(name)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SessionData
// ---------------------------------------------------------------------------

/// What the hosting environment reads and writes for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionData {
    pub items: SessionItems,
    /// Idle timeout in minutes.
    pub timeout: i32,
}

impl SessionData {
    /// Empty data with the given timeout.
    pub fn new(timeout: i32) -> Self {
        Self {
            items: SessionItems::new(),
            timeout,
        }
    }

    pub fn with_items(items: SessionItems, timeout: i32) -> Self {
        Self { items, timeout }
    }
}

// ---------------------------------------------------------------------------
// Serializer
// ---------------------------------------------------------------------------

/// Turns session items into the opaque payload and back.
pub trait SessionSerializer: Send + Sync {
    fn encode(&self, items: &SessionItems) -> Result<Vec<u8>, PayloadError>;

    /// Decode a stored payload. A missing or empty payload must decode to
    /// an empty collection.
    fn decode(&self, payload: Option<&[u8]>) -> Result<SessionItems, PayloadError>;
}

/// Stores items as a JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSessionSerializer;

impl SessionSerializer for JsonSessionSerializer {
    fn encode(&self, items: &SessionItems) -> Result<Vec<u8>, PayloadError> {
        serde_json::to_vec(items).map_err(|e| PayloadError::Encode(e.to_string()))
    }

    fn decode(&self, payload: Option<&[u8]>) -> Result<SessionItems, PayloadError> {
        match payload {
            None => Ok(SessionItems::new()),
            Some(bytes) if bytes.is_empty() => Ok(SessionItems::new()),
            Some(bytes) => {
                serde_json::from_slice(bytes).map_err(|e| PayloadError::Decode(e.to_string()))
            }
        }
    }
}
