//! Generic versioned record stored at every path of the property store,
//! plus the pluggable serializer/comparator strategies at the codec seam.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A self-describing, versioned data record.
///
/// The id is immutable after creation and doubles as the record's own key
/// when stored. The version counter is maintained by the property store,
/// never by callers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    id: String,

    /// Simple key to string-value fields.
    #[serde(default)]
    pub simple_fields: BTreeMap<String, String>,

    /// Key to ordered string-list fields.
    #[serde(default)]
    pub list_fields: BTreeMap<String, Vec<String>>,

    /// Key to nested string-map fields.
    #[serde(default)]
    pub map_fields: BTreeMap<String, BTreeMap<String, String>>,

    /// Store-maintained version counter.
    #[serde(default)]
    pub version: i64,
}

impl Record {
    /// Creates an empty record with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// The record's immutable id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Gets a simple field.
    #[must_use]
    pub fn simple_field(&self, key: &str) -> Option<&str> {
        self.simple_fields.get(key).map(String::as_str)
    }

    /// Sets a simple field.
    pub fn set_simple_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.simple_fields.insert(key.into(), value.into());
    }

    /// Gets a list field.
    #[must_use]
    pub fn list_field(&self, key: &str) -> Option<&[String]> {
        self.list_fields.get(key).map(Vec::as_slice)
    }

    /// Sets a list field.
    pub fn set_list_field(&mut self, key: impl Into<String>, value: Vec<String>) {
        self.list_fields.insert(key.into(), value);
    }

    /// Gets a map field.
    #[must_use]
    pub fn map_field(&self, key: &str) -> Option<&BTreeMap<String, String>> {
        self.map_fields.get(key)
    }

    /// Sets a map field.
    pub fn set_map_field(&mut self, key: impl Into<String>, value: BTreeMap<String, String>) {
        self.map_fields.insert(key.into(), value);
    }

    /// Merges another record of the same id into this one, key by key.
    ///
    /// Fields present in `other` override fields of the same key here;
    /// fields absent from `other` are kept. The id and version of `self`
    /// are untouched.
    pub fn merge(&mut self, other: &Self) {
        for (k, v) in &other.simple_fields {
            self.simple_fields.insert(k.clone(), v.clone());
        }
        for (k, v) in &other.list_fields {
            self.list_fields.insert(k.clone(), v.clone());
        }
        for (k, v) in &other.map_fields {
            self.map_fields.insert(k.clone(), v.clone());
        }
    }
}

/// Serializes records to and from bytes at the store boundary.
pub trait RecordSerializer: Send + Sync + 'static {
    /// Encodes a record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialize`] if the record cannot be encoded.
    fn serialize(&self, record: &Record) -> Result<Bytes, Error>;

    /// Decodes a record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Deserialize`] if the bytes are malformed.
    fn deserialize(&self, bytes: &[u8]) -> Result<Record, Error>;
}

/// Decides whether two records are equal for optimistic no-op detection
/// on writes.
pub trait RecordComparator: Send + Sync + 'static {
    /// Returns true if the two records carry the same content.
    fn equals(&self, a: &Record, b: &Record) -> bool;
}

/// JSON codec for records.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRecordSerializer;

impl RecordSerializer for JsonRecordSerializer {
    fn serialize(&self, record: &Record) -> Result<Bytes, Error> {
        let vec = serde_json::to_vec(record).map_err(|e| Error::Serialize(e.to_string()))?;
        Ok(Bytes::from(vec))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Record, Error> {
        serde_json::from_slice(bytes).map_err(|e| Error::Deserialize(e.to_string()))
    }
}

/// Compares records by content, ignoring the store-maintained version.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRecordComparator;

impl RecordComparator for JsonRecordComparator {
    fn equals(&self, a: &Record, b: &Record) -> bool {
        a.id == b.id
            && a.simple_fields == b.simple_fields
            && a.list_fields == b.list_fields
            && a.map_fields == b.map_fields
    }
}

/// Shared handle to a serializer strategy.
pub type SharedSerializer = Arc<dyn RecordSerializer>;

/// Shared handle to a comparator strategy.
pub type SharedComparator = Arc<dyn RecordComparator>;
