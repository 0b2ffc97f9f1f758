//! Reconciler data types: edits, per-line results, and configuration.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::{error::CommitError, types::Record};

// ============================================================================
// Configuration
// ============================================================================

/// Names of the collections and fields the reconciler operates on. The
/// backend schema is not owned by this library, so everything is addressed
/// by name.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Collection holding medication stock records.
    pub inventory_collection: String,
    /// Collection holding disbursement line records.
    pub line_collection: String,
    /// Field on a line referencing its parent (e.g. the encounter id).
    pub parent_field: String,
    /// Field on a line referencing the medication record.
    pub medication_field: String,
    /// Numeric quantity field on a line.
    pub quantity_field: String,
    /// Numeric stock field on an inventory record.
    pub stock_field: String,
    /// Boolean flag marking a line as handled by a downstream workflow
    /// stage. Processed lines are historical: deleting one never restores
    /// stock.
    pub processed_field: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            inventory_collection: "inventory".to_string(),
            line_collection: "disbursements".to_string(),
            parent_field: "encounter".to_string(),
            medication_field: "medication".to_string(),
            quantity_field: "quantity".to_string(),
            stock_field: "stock".to_string(),
            processed_field: "processed".to_string(),
        }
    }
}

// ============================================================================
// Edits
// ============================================================================

/// One edited line item, as produced by the editing UI.
#[derive(Debug, Clone)]
pub enum LineEdit {
    /// A brand-new line: the full quantity is drawn from stock.
    Create {
        medication_id: String,
        quantity: f64,
        /// Extra line fields written alongside the quantity.
        fields: Map<String, Value>,
    },
    /// An existing line with a changed quantity or fields. The stock delta
    /// is `quantity - baseline committed quantity`, never an absolute
    /// target.
    Update {
        line_id: String,
        medication_id: String,
        quantity: f64,
        fields: Map<String, Value>,
    },
    /// An existing line removed: its committed quantity is restored to
    /// stock (unless the line was processed), then the record is deleted.
    Delete { line_id: String },
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    Created,
    Updated,
    Deleted,
}

/// Outcome for one line in a commit batch.
#[derive(Debug, Clone)]
pub struct LineResult {
    pub action: LineAction,
    /// The line record id — `None` for a creation that failed before the
    /// record existed.
    pub line_id: Option<String>,
    /// `None` only when the edit referenced a line missing from the
    /// baseline, so the medication could not be determined.
    pub medication_id: Option<String>,
    pub error: Option<CommitError>,
}

impl LineResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated outcome of one commit. Partial success is the model: failed
/// lines never abort or roll back the rest of the batch.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    pub succeeded: Vec<LineResult>,
    pub failed: Vec<LineResult>,
    /// Authoritative post-commit stock per affected medication. Server
    /// values win over any optimistic local state.
    pub stock_after: HashMap<String, f64>,
    /// Authoritative post-commit lines for the parent.
    pub lines_after: Vec<Record>,
}
