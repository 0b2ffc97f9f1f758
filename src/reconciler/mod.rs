//! Quantity reconciler — converts a set of edited disbursement lines into a
//! minimal set of stock + line writes against the remote store.
//!
//! # Modules
//!
//! - [`types`] — [`LineEdit`], [`LineResult`], [`CommitOutcome`],
//!   [`ReconcilerConfig`].
//! - [`commit`] — [`QuantityReconciler`] and the commit algorithm.

pub mod commit;
pub mod types;

pub use commit::QuantityReconciler;
pub use types::{CommitOutcome, LineAction, LineEdit, LineResult, ReconcilerConfig};
