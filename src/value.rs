//! The tagged extraction value tree.
//!
//! The model returns a nested JSON record with six top-level sections.
//! Rather than duck-typing untyped JSON at render time, the record is
//! converted once into a closed variant type, so the flattener in
//! [`crate::flatten`] is a total recursive function the compiler can check.
//!
//! All leaf values are strings: the extraction prompt instructs the model to
//! emit empty strings for missing fields, and numbers/booleans that slip
//! through are stringified on conversion so downstream display and CSV
//! export never have to branch on scalar kind.

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// One node of an extracted invoice record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A leaf value. Missing fields are the empty string, never absent.
    Scalar(String),
    /// An ordered sequence, e.g. line items.
    Sequence(Vec<Value>),
    /// An ordered key-value structure. Entry order is the order the model
    /// emitted the keys in, which [`crate::flatten::flatten`] preserves.
    Structured(Vec<(String, Value)>),
}

impl Value {
    /// True when this node is a leaf.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Scalar(_))
    }
}

/// Conversion from parsed JSON, preserving object key order.
///
/// Relies on serde_json's `preserve_order` feature: without it, object keys
/// would be re-sorted and the flattened field order would no longer match
/// the document layout the model read.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Scalar(String::new()),
            serde_json::Value::Bool(b) => Value::Scalar(b.to_string()),
            serde_json::Value::Number(n) => Value::Scalar(n.to_string()),
            serde_json::Value::String(s) => Value::Scalar(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Structured(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Serializes back to the natural JSON shape (string / array / object).
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Scalar(s) => serializer.serialize_str(s),
            Value::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Structured(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}
