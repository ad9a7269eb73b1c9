//! Evidence metadata model.
//!
//! Metadata is the contextual half of a piece of evidence: who captured it,
//! on which device, under which case number. Keys are kept sorted so that
//! iteration order never depends on how the caller built the map.

use crate::error::EncodingError;
use std::collections::BTreeMap;

/// A single metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// UTF-8 text
    String(String),
    /// Whole number
    Integer(i128),
    /// Floating point number, must be finite to encode
    Float(f64),
    /// Boolean flag
    Bool(bool),
    /// Ordered sequence
    List(Vec<MetaValue>),
    /// Nested mapping
    Map(Metadata),
    /// Raw binary; representable here but rejected by the canonical encoder
    Bytes(Vec<u8>),
}

impl MetaValue {
    /// Name of the value's type, used in error messages
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Convert a JSON value, rejecting `null`
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::UnsupportedValue`] for `null` anywhere in the tree
    pub fn from_json(value: &serde_json::Value, path: &str) -> Result<Self, EncodingError> {
        use serde_json::Value;

        Ok(match value {
            Value::Null => {
                return Err(EncodingError::UnsupportedValue {
                    path: path.to_string(),
                    kind: "null",
                });
            }
            Value::Bool(b) => Self::Bool(*b),
            Value::String(s) => Self::String(s.clone()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i128::from(i))
                } else if let Some(u) = n.as_u64() {
                    Self::Integer(i128::from(u))
                } else {
                    // serde_json only produces finite floats
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::Array(items) => Self::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Self::from_json(item, &format!("{path}[{i}]")))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                let mut nested = Metadata::new();
                for (key, item) in map {
                    let child = join_path(path, key);
                    nested.insert(key.clone(), Self::from_json(item, &child)?);
                }
                Self::Map(nested)
            }
        })
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self::Integer(i128::from(value))
    }
}

impl From<u64> for MetaValue {
    fn from(value: u64) -> Self {
        Self::Integer(i128::from(value))
    }
}

impl From<i32> for MetaValue {
    fn from(value: i32) -> Self {
        Self::Integer(i128::from(value))
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Metadata> for MetaValue {
    fn from(value: Metadata) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<MetaValue>> From<Vec<T>> for MetaValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Key-value metadata attached to a piece of evidence
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metadata {
    entries: BTreeMap<String, MetaValue>,
}

impl Metadata {
    /// Create empty metadata
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert an entry, returning the previous value for the key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Option<MetaValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Look up an entry
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries.get(key)
    }

    /// Number of top-level entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetaValue)> {
        self.entries.iter()
    }

    /// Parse a JSON object into metadata
    ///
    /// # Errors
    ///
    /// Returns error if the value is not an object or holds `null`
    pub fn from_json(value: &serde_json::Value) -> Result<Self, EncodingError> {
        match MetaValue::from_json(value, "")? {
            MetaValue::Map(metadata) => Ok(metadata),
            other => Err(EncodingError::UnsupportedValue {
                path: String::new(),
                kind: other.kind(),
            }),
        }
    }

    /// Parse a JSON document into metadata
    ///
    /// # Errors
    ///
    /// Returns error if the text is not JSON or not an object
    pub fn from_json_str(json: &str) -> Result<Self, crate::CoreError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Ok(Self::from_json(&value)?)
    }
}

impl<K: Into<String>, V: Into<MetaValue>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

pub(crate) fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}
