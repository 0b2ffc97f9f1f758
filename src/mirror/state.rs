//! Mirror state and the pure change-event reducer.
//!
//! `apply_event` is deliberately a free function over a record list so the
//! merge semantics are unit-testable without any network dependency.

use chrono::{DateTime, Utc};

use crate::{
    error::ClientError,
    types::{ChangeAction, ChangeEvent, Record},
};

// ============================================================================
// Status
// ============================================================================

/// Lifecycle of a mirror's materialized view.
///
/// `Idle -> Loading -> Ready`; `Ready -> Refreshing -> Ready`; any state
/// `-> Error` on genuine fetch failure; `Error -> Loading` on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorStatus {
    Idle,
    Loading,
    Ready,
    Refreshing,
    Error,
}

// ============================================================================
// MirrorState
// ============================================================================

/// Snapshot of a mirror's local view.
///
/// Invariant: `records` never contains two entries with the same id.
/// Insertion order is preserved for creates; updates replace in place.
#[derive(Debug, Clone)]
pub struct MirrorState {
    pub records: Vec<Record>,
    pub status: MirrorStatus,
    pub error: Option<ClientError>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl MirrorState {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            status: MirrorStatus::Idle,
            error: None,
            last_updated: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status, MirrorStatus::Ready | MirrorStatus::Refreshing)
    }
}

impl Default for MirrorState {
    fn default() -> Self {
        Self::empty()
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Apply one change event to a record list.
///
/// - `Create`: append; if the id already exists (duplicate delivery),
///   replace in place instead.
/// - `Update`: replace in place, preserving position; if the id is unknown
///   (arrived before the initial fetch, or newly matching the filter),
///   insert it.
/// - `Delete`: remove; no-op when absent.
///
/// Applying the same event twice leaves the list identical to applying it
/// once, so at-least-once delivery is safe.
pub fn apply_event(records: &mut Vec<Record>, event: &ChangeEvent) {
    match event.action {
        ChangeAction::Create | ChangeAction::Update => {
            match records.iter_mut().find(|r| r.id == event.record.id) {
                Some(existing) => *existing = event.record.clone(),
                None => records.push(event.record.clone()),
            }
        }
        ChangeAction::Delete => {
            records.retain(|r| r.id != event.record.id);
        }
    }
}
