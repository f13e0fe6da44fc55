//! Raw documents and the typed-record boundary.
//!
//! The store only knows flat JSON objects carrying `_id` / `_rev`. Typed
//! records ([`Task`](super::Task), [`Job`](super::Job)) convert to and from
//! [`Document`] through serde, which is where known fields get validated.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

pub const ID_FIELD: &str = "_id";
pub const REV_FIELD: &str = "_rev";

/// Opaque revision token handed out by the store.
///
/// Every conditional write must carry the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as stored: a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let mut doc = Self::new();
        doc.set_id(id);
        doc
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.insert(ID_FIELD.to_string(), Value::String(id.into()));
    }

    pub fn rev(&self) -> Option<Revision> {
        self.0
            .get(REV_FIELD)
            .and_then(Value::as_str)
            .map(Revision::new)
    }

    pub fn set_rev(&mut self, rev: &Revision) {
        self.0
            .insert(REV_FIELD.to_string(), Value::String(rev.as_str().to_string()));
    }

    pub fn clear_rev(&mut self) {
        self.0.remove(REV_FIELD);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Merge every key of `values` into the document, overwriting.
    pub fn update(&mut self, values: Map<String, Value>) {
        self.0.extend(values);
    }

    /// Integer field with the same leniency the monitor views apply:
    /// numbers and numeric strings count, anything else reads as `None`.
    pub fn int_field(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// A typed record that round-trips through [`Document`].
pub trait Record: Sized {
    fn id(&self) -> &str;

    fn rev(&self) -> Option<&Revision>;

    fn set_rev(&mut self, rev: Revision);

    fn to_document(&self) -> Result<Document, StoreError>;

    fn from_document(doc: Document) -> Result<Self, StoreError>;
}

pub(crate) fn encode<T: Serialize>(id: &str, record: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => Ok(Document(map)),
        Ok(_) => Err(StoreError::Other(format!(
            "record {id} did not serialize to a JSON object"
        ))),
        Err(source) => Err(StoreError::InvalidDocument {
            id: id.to_string(),
            source,
        }),
    }
}

pub(crate) fn decode<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    let id = doc.id().unwrap_or_default().to_string();
    serde_json::from_value(Value::Object(doc.0))
        .map_err(|source| StoreError::InvalidDocument { id, source })
}
