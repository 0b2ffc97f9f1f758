//! RemoteClient — the transport seam to the backend collection store.
//!
//! The backend (schema, persistence, auth, realtime transport) is an
//! external collaborator: applications implement [`RemoteClient`] over their
//! SDK, tests implement it with mocks. The library never talks to a network
//! directly.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    error::ClientError,
    query::QueryOptions,
    types::{ChangeEvent, ListPage, Record},
};

/// An owned one-shot closure that removes an upstream subscription when
/// called. Returned synchronously from a completed `subscribe` call so
/// ownership of the channel is unambiguous.
pub type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;

/// Callback invoked for each delivered [`ChangeEvent`].
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Transport interface over the remote collection store.
///
/// Delivery contract for `subscribe`: at-least-once, no ordering guarantee
/// across records. A `"*"` topic means all records in the collection.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch one page of records matching `query`.
    async fn list(
        &self,
        collection: &str,
        page: usize,
        per_page: usize,
        query: &QueryOptions,
    ) -> Result<ListPage, ClientError>;

    /// Fetch a single record by id.
    async fn get_one(
        &self,
        collection: &str,
        id: &str,
        expand: Option<&[String]>,
    ) -> Result<Record, ClientError>;

    /// Create a record from a field map.
    async fn create(
        &self,
        collection: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, ClientError>;

    /// Partially update a record.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, ClientError>;

    /// Delete a record. Returns `false` if it was already gone.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, ClientError>;

    /// Open a change subscription on `topic` within `collection`.
    async fn subscribe(
        &self,
        collection: &str,
        topic: &str,
        callback: ChangeCallback,
    ) -> Result<Unsubscribe, ClientError>;
}

/// Default page size for full-list fetches.
pub const DEFAULT_PAGE_SIZE: usize = 200;

/// Hard cap on records materialized by a full-list fetch. Bounded page-out
/// sufficient for the UI rather than an unbounded download.
pub const MAX_FULL_LIST: usize = 1000;

/// Page through `list` until `total_items` is exhausted or [`MAX_FULL_LIST`]
/// is reached.
///
/// Any page error aborts the fetch and is returned as-is, including
/// `Cancelled` — the caller decides whether that is a real failure.
pub async fn fetch_full_list(
    client: &dyn RemoteClient,
    collection: &str,
    query: &QueryOptions,
) -> Result<Vec<Record>, ClientError> {
    let per_page = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
    let mut records: Vec<Record> = Vec::new();
    let mut page = 1;

    loop {
        let result = client.list(collection, page, per_page, query).await?;
        let fetched = result.items.len();
        records.extend(result.items);

        let exhausted = fetched < per_page || records.len() >= result.total_items;
        if exhausted || records.len() >= MAX_FULL_LIST {
            break;
        }
        page += 1;
    }

    records.truncate(MAX_FULL_LIST);
    Ok(records)
}
