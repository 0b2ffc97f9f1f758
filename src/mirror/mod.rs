//! Collection mirror — one consistent local view of a remote collection query.
//!
//! # Modules
//!
//! - [`state`] — [`MirrorState`], [`MirrorStatus`], and the pure
//!   [`apply_event`] reducer.
//! - [`collection`] — [`CollectionMirror`]: buffered start, paged initial
//!   fetch, generation-token refresh.

pub mod collection;
pub mod state;

pub use collection::CollectionMirror;
pub use state::{apply_event, MirrorState, MirrorStatus};
