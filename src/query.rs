//! Query options and canonical subscription keys.
//!
//! Two logically identical queries (same filter/sort/expand after
//! canonicalizing key order) must map to the same [`SubscriptionKey`] so the
//! registry can share one upstream channel between them. Transport-only
//! tuning (`page_size`) never participates in the key.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

// ============================================================================
// Sort Types
// ============================================================================

/// Sort direction for a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A sort specification for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortEntry {
    pub field: String,
    pub direction: SortDirection,
}

/// Sort input — either a shorthand field name (ascending) or explicit entries.
#[derive(Debug, Clone, PartialEq)]
pub enum SortInput {
    /// Single field name, sorts ascending.
    Field(String),
    /// Explicit ordered sort entries.
    Entries(Vec<SortEntry>),
}

/// Normalize sort input to a vec of SortEntry.
pub fn normalize_sort(sort: Option<&SortInput>) -> Option<Vec<SortEntry>> {
    match sort {
        None => None,
        Some(SortInput::Field(f)) => Some(vec![SortEntry {
            field: f.clone(),
            direction: SortDirection::Asc,
        }]),
        Some(SortInput::Entries(e)) => Some(e.clone()),
    }
}

// ============================================================================
// QueryOptions
// ============================================================================

/// Query specification for a mirrored collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Server-side filter object (equality map or backend filter syntax).
    pub filter: Option<Value>,
    /// Sort specification.
    pub sort: Option<SortInput>,
    /// Relations to expand on returned records.
    pub expand: Option<Vec<String>>,
    /// Page size for the initial fetch. Transport tuning only — excluded
    /// from the subscription key.
    pub page_size: Option<usize>,
}

impl QueryOptions {
    pub fn filtered(filter: Value) -> Self {
        Self {
            filter: Some(filter),
            ..Default::default()
        }
    }

    pub fn sorted_by(field: impl Into<String>) -> Self {
        Self {
            sort: Some(SortInput::Field(field.into())),
            ..Default::default()
        }
    }
}

// ============================================================================
// SubscriptionKey
// ============================================================================

/// Canonical identity of a `(collection, query)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the canonical key for a collection + query pair.
///
/// Filter objects are serialized with recursively sorted keys, sort input is
/// normalized to explicit `field:direction` entries, and expand lists are
/// sorted, so any two logically-equal queries produce the same key.
pub fn subscription_key(collection: &str, query: &QueryOptions) -> SubscriptionKey {
    let mut key = String::from(collection);
    key.push('?');

    if let Some(filter) = &query.filter {
        key.push_str("filter=");
        key.push_str(&canonical_json(filter));
        key.push('&');
    }

    if let Some(entries) = normalize_sort(query.sort.as_ref()) {
        key.push_str("sort=");
        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            key.push_str(&entry.field);
            key.push(':');
            key.push_str(match entry.direction {
                SortDirection::Asc => "asc",
                SortDirection::Desc => "desc",
            });
        }
        key.push('&');
    }

    if let Some(expand) = &query.expand {
        let mut sorted = expand.clone();
        sorted.sort();
        key.push_str("expand=");
        key.push_str(&sorted.join(","));
        key.push('&');
    }

    SubscriptionKey(key)
}

/// Serialize a JSON value with object keys in sorted order at every level.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = String::from("{");
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).unwrap_or_default());
                out.push(':');
                out.push_str(&canonical_json(&map[*k]));
            }
            out.push('}');
            out
        }
        Value::Array(items) => {
            let mut out = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonical_json(item));
            }
            out.push(']');
            out
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

// ============================================================================
// Collection name validation
// ============================================================================

/// Collection names are `[a-z0-9_]+`. Anything else is a programmer error
/// and fails fast instead of being encoded in mirror state.
pub fn validate_collection_name(name: &str) -> Result<(), ClientError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ClientError::InvalidCollection(name.to_string()))
    }
}
