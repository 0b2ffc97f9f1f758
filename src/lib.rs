//! clinic-sync — client-side realtime collection mirroring for clinic apps.
//!
//! Mirrors remote, multi-writer collections (patients, inventory,
//! disbursements) into local view state over an at-least-once change feed,
//! deduplicates upstream subscriptions, and reconciles optimistic quantity
//! edits against server-held stock.
//!
//! # Modules
//!
//! - [`client`] — `RemoteClient` transport trait and full-list fetch.
//! - [`query`] — query options and canonical subscription keys.
//! - [`mirror`] — `CollectionMirror` and the pure event reducer.
//! - [`registry`] — refcounted `SubscriptionRegistry`.
//! - [`reconciler`] — `QuantityReconciler` for stock-delta commits.
//! - [`session`] — explicit session value and login/logout lifecycle.
//! - [`emitter`] — typed pub/sub used for change notification.

pub mod client;
pub mod emitter;
pub mod error;
pub mod mirror;
pub mod query;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod types;

pub use client::{fetch_full_list, ChangeCallback, RemoteClient, Unsubscribe};
pub use emitter::{EventEmitter, SubscriptionId};
pub use error::{ClientError, ClinicSyncError, CommitError, Result};
pub use mirror::{apply_event, CollectionMirror, MirrorState, MirrorStatus};
pub use query::{
    subscription_key, QueryOptions, SortDirection, SortEntry, SortInput, SubscriptionKey,
};
pub use reconciler::{
    CommitOutcome, LineAction, LineEdit, LineResult, QuantityReconciler, ReconcilerConfig,
};
pub use registry::{MirrorHandle, RegistryOptions, SubscriptionRegistry};
pub use session::{Session, SessionEvent, SessionHub};
pub use types::{ChangeAction, ChangeEvent, ListPage, Record};
