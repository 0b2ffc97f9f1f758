//! Core data types: records, change events, and list pages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Record
// ============================================================================

/// An immutable snapshot of one remote record.
///
/// Identified by an opaque `id`, belonging to exactly one collection. Every
/// mutation on the server produces a new snapshot with the same id — local
/// code never mutates a `Record` in place, it replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub collection: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Free-form field map, as delivered by the backend.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Build a record snapshot with `created`/`updated` set to now.
    pub fn new(
        collection: impl Into<String>,
        id: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            collection: collection.into(),
            created: now,
            updated: now,
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(Value::as_bool)
    }
}

// ============================================================================
// Change events
// ============================================================================

/// What happened to a record on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// A change notification delivered by the upstream subscription.
///
/// Delivery is at-least-once and possibly out of order: the same event may
/// arrive twice, and an `Update` may arrive before the record was ever seen
/// locally. [`crate::mirror::apply_event`] tolerates both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub record: Record,
}

impl ChangeEvent {
    pub fn new(action: ChangeAction, record: Record) -> Self {
        Self { action, record }
    }
}

// ============================================================================
// List pages
// ============================================================================

/// One page of a paged list response.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<Record>,
    pub page: usize,
    pub per_page: usize,
    /// Total matching records across all pages.
    pub total_items: usize,
}
