//! Attribute records and tolerant field resolution.
//!
//! Records coming back from the feature store are bags of loosely-typed
//! attributes whose field names drift between dataset versions. A
//! [`FieldTable`] is built once per dataset per run and answers "which of
//! these historical names does this snapshot actually use?" so that per-record
//! lookups stay cheap and never panic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One record from a feature dataset: attributes plus optional raw geometry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeRecord {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
}

impl AttributeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from (name, value) pairs. Test and fixture helper.
    pub fn from_attrs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut attributes = Map::new();
        for (k, v) in pairs {
            attributes.insert(k.into(), v);
        }
        Self {
            attributes,
            geometry: None,
        }
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.attributes.insert(field.into(), value);
    }

    /// Exact-name lookup (no alias resolution).
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// First candidate present in this record, resolved through `table`.
    ///
    /// Presence decides the match, not truthiness: an empty string or zero is
    /// a hit. JSON `null` is the sentinel for "missing" and does not match.
    pub fn resolve<'a>(&'a self, table: &FieldTable, candidates: &[&str]) -> Option<&'a Value> {
        for candidate in candidates {
            if let Some(canonical) = table.canonical(candidate) {
                match self.attributes.get(canonical) {
                    Some(Value::Null) | None => continue,
                    Some(value) => return Some(value),
                }
            }
        }
        None
    }

    /// Resolve to an owned string; numbers are stringified.
    pub fn resolve_str(&self, table: &FieldTable, candidates: &[&str]) -> Option<String> {
        match self.resolve(table, candidates)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Resolve to an integer, tolerating numeric strings and floats.
    pub fn resolve_i64(&self, table: &FieldTable, candidates: &[&str]) -> Option<i64> {
        match self.resolve(table, candidates)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }
}

/// Case-insensitive field-name index for one dataset snapshot.
#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    by_lower: HashMap<String, String>,
}

impl FieldTable {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut by_lower = HashMap::new();
        for field in fields {
            let canonical = field.as_ref().to_string();
            // First spelling wins if the schema somehow carries duplicates.
            by_lower
                .entry(canonical.to_lowercase())
                .or_insert(canonical);
        }
        Self { by_lower }
    }

    /// Union of field names across a snapshot's records.
    pub fn from_records(records: &[AttributeRecord]) -> Self {
        Self::new(
            records
                .iter()
                .flat_map(|r| r.attributes.keys())
                .map(|k| k.as_str()),
        )
    }

    /// Canonical spelling for a candidate name, if the dataset has it.
    pub fn canonical(&self, candidate: &str) -> Option<&str> {
        self.by_lower
            .get(&candidate.to_lowercase())
            .map(|s| s.as_str())
    }

    /// First candidate this dataset knows about.
    pub fn find(&self, candidates: &[&str]) -> Option<&str> {
        candidates.iter().find_map(|c| self.canonical(c))
    }
}
