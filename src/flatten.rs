//! Field flattening: nested [`Value`] trees → ordered `(path, value)` pairs.
//!
//! Review screens, CSV export, and per-field editing all work on a flat list
//! of string fields, not on the nested record the model returns. Flattening
//! is deterministic: the same input structure always yields the same output
//! sequence, in the source structure's own order (never sorted). Downstream
//! diffing and export rely on that stability across re-renders.
//!
//! Empty leaves are kept as empty-string values rather than omitted, so
//! exported tables have a consistent column set across records extracted
//! from differently-shaped documents.

use crate::value::Value;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// Separator between nested path segments.
///
/// Chosen to be visually distinct from document content and safe in CSV
/// headers; `"InvoiceDetails > Number"` reads naturally in a review table.
pub const PATH_SEPARATOR: &str = " > ";

/// An insertion-ordered mapping from flattened field path to string value.
///
/// Serializes as a JSON object whose key order is the entry order — the
/// shape the durable store file uses for the `fields` member. A plain
/// `HashMap` would lose the order and a `BTreeMap` would re-sort it; review
/// queues of tens of fields make the linear lookups here irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, String)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. A replaced path keeps its original position.
    pub fn insert(&mut self, path: impl Into<String>, value: impl Into<String>) {
        let path = path.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(p, _)| *p == path) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((path, value)),
        }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(path, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, v)| (p.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (path, value) in iter {
            map.insert(path, value);
        }
        map
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (path, value) in &self.entries {
            map.serialize_entry(path, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldMapVisitor;

        impl<'de> Visitor<'de> for FieldMapVisitor {
            type Value = FieldMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field paths to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldMap, A::Error> {
                let mut map = FieldMap::new();
                while let Some((path, value)) = access.next_entry::<String, String>()? {
                    map.insert(path, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(FieldMapVisitor)
    }
}

/// Flatten a nested record into ordered `(path, value)` pairs.
///
/// * Structured entries contribute `parent > key` paths.
/// * Sequence elements contribute `parent[index]`, recursing if the element
///   is itself structured.
/// * Scalars terminate recursion; empty strings are emitted, not dropped.
pub fn flatten(value: &Value) -> FieldMap {
    let mut out = FieldMap::new();
    flatten_into(value, "", &mut out);
    out
}

fn flatten_into(value: &Value, path: &str, out: &mut FieldMap) {
    match value {
        Value::Scalar(s) => out.insert(path, s.clone()),
        Value::Sequence(items) => {
            for (idx, item) in items.iter().enumerate() {
                flatten_into(item, &format!("{path}[{idx}]"), out);
            }
        }
        Value::Structured(fields) => {
            for (key, child) in fields {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}{PATH_SEPARATOR}{key}")
                };
                flatten_into(child, &child_path, out);
            }
        }
    }
}
