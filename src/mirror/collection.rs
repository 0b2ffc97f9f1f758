//! CollectionMirror — maintains one local view of a remote collection query.
//!
//! # Locking model
//!
//! Two independent `parking_lot::Mutex`es guard `state` and the pre-fetch
//! event `buffer`; the critical rule is **never hold both at once**, and
//! never invoke consumer callbacks while holding either (snapshots are
//! cloned out first).
//!
//! # Fetch supersession
//!
//! Every fetch carries a generation token from an `AtomicU64`. A response
//! whose token no longer matches the latest issued token is a superseded
//! request: it is discarded silently (debug-logged) and never surfaces as an
//! error, which is what distinguishes cancellation from genuine failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::{
    client::{fetch_full_list, ChangeCallback, RemoteClient, Unsubscribe},
    emitter::{EventEmitter, SubscriptionId},
    error::ClientError,
    query::{validate_collection_name, QueryOptions},
    session::SessionHub,
    types::{ChangeEvent, Record},
};

use super::state::{apply_event, MirrorState, MirrorStatus};

pub struct CollectionMirror {
    collection: String,
    query: QueryOptions,
    client: Arc<dyn RemoteClient>,
    session: Arc<SessionHub>,
    state: Mutex<MirrorState>,
    emitter: EventEmitter<MirrorState>,
    /// Latest issued fetch generation. Bumped by every fetch and by `stop()`.
    generation: AtomicU64,
    /// `Some` while a fetch that will replace `records` is in flight; events
    /// delivered meanwhile are parked here and re-applied afterwards.
    buffer: Mutex<Option<Vec<ChangeEvent>>>,
    upstream: Mutex<Option<Unsubscribe>>,
}

impl CollectionMirror {
    /// Create an idle mirror. Fails only for a malformed collection name —
    /// transport problems are encoded in state later, never thrown here.
    pub fn new(
        client: Arc<dyn RemoteClient>,
        session: Arc<SessionHub>,
        collection: impl Into<String>,
        query: QueryOptions,
    ) -> Result<Arc<Self>, ClientError> {
        let collection = collection.into();
        validate_collection_name(&collection)?;
        Ok(Arc::new(Self {
            collection,
            query,
            client,
            session,
            state: Mutex::new(MirrorState::empty()),
            emitter: EventEmitter::new(),
            generation: AtomicU64::new(0),
            buffer: Mutex::new(None),
            upstream: Mutex::new(None),
        }))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn query(&self) -> &QueryOptions {
        &self.query
    }

    /// Clone of the current state snapshot.
    pub fn state(&self) -> MirrorState {
        self.state.lock().clone()
    }

    pub fn records(&self) -> Vec<Record> {
        self.state.lock().records.clone()
    }

    pub fn status(&self) -> MirrorStatus {
        self.state.lock().status
    }

    /// Observe state snapshots. The callback fires after every applied change
    /// or status transition, outside all internal locks.
    pub fn on_change(
        &self,
        callback: impl Fn(&MirrorState) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.emitter.subscribe(callback)
    }

    pub fn remove_listener(&self, id: SubscriptionId) {
        self.emitter.unsubscribe(id);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open the upstream subscription and run the initial paged fetch.
    ///
    /// The subscription is opened *before* the fetch; events that race the
    /// fetch are buffered and re-applied after it resolves, so a create or
    /// update committed mid-fetch is never lost.
    ///
    /// Never returns an error: an invalid session or a failed subscribe is
    /// encoded in state (`Error` + distinguishable `ClientError`).
    pub async fn start(self: &Arc<Self>) {
        if !self.session.is_authenticated() {
            self.transition(|st| {
                st.records.clear();
                st.status = MirrorStatus::Error;
                st.error = Some(ClientError::NotAuthenticated);
            });
            return;
        }

        // Re-entrant start (login rebuild, manual retry): drop the previous
        // channel before opening a new one.
        if let Some(unsubscribe) = self.upstream.lock().take() {
            unsubscribe();
        }

        self.transition(|st| {
            st.status = MirrorStatus::Loading;
            st.error = None;
        });
        *self.buffer.lock() = Some(Vec::new());

        let weak = Arc::downgrade(self);
        let callback: ChangeCallback = Arc::new(move |event| {
            if let Some(mirror) = weak.upgrade() {
                mirror.handle_event(event);
            }
        });

        match self.client.subscribe(&self.collection, "*", callback).await {
            Ok(unsubscribe) => {
                *self.upstream.lock() = Some(unsubscribe);
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!(collection = %self.collection, "subscribe cancelled");
                *self.buffer.lock() = None;
                return;
            }
            Err(e) => {
                tracing::warn!(collection = %self.collection, error = %e, "subscribe failed");
                *self.buffer.lock() = None;
                self.transition(|st| {
                    st.status = MirrorStatus::Error;
                    st.error = Some(e);
                });
                return;
            }
        }

        self.run_fetch().await;
    }

    /// Re-run the full fetch without tearing down the subscription.
    ///
    /// Cancel-and-replace: a second `refresh` issued before the first
    /// resolves supersedes it; the first's late response is discarded without
    /// changing state or surfacing an error.
    pub async fn refresh(&self) {
        if !self.session.is_authenticated() {
            tracing::debug!(collection = %self.collection, "refresh skipped: no session");
            return;
        }

        self.transition(|st| {
            st.status = match st.status {
                MirrorStatus::Ready | MirrorStatus::Refreshing => MirrorStatus::Refreshing,
                _ => MirrorStatus::Loading,
            };
        });

        // Park live events until the replacement snapshot lands.
        {
            let mut buffer = self.buffer.lock();
            if buffer.is_none() {
                *buffer = Some(Vec::new());
            }
        }

        self.run_fetch().await;
    }

    /// Close the upstream channel and invalidate any in-flight fetch.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(unsubscribe) = self.upstream.lock().take() {
            unsubscribe();
        }
        *self.buffer.lock() = None;
    }

    /// Empty the view. With an error: `Error` state (logout teardown);
    /// without: back to `Idle`.
    pub fn clear(&self, error: Option<ClientError>) {
        self.transition(|st| {
            st.records.clear();
            st.status = if error.is_some() {
                MirrorStatus::Error
            } else {
                MirrorStatus::Idle
            };
            st.error = error;
        });
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Upstream delivery target. Buffers while a fetch is in flight,
    /// otherwise applies immediately and notifies listeners.
    fn handle_event(&self, event: &ChangeEvent) {
        {
            let mut buffer = self.buffer.lock();
            if let Some(pending) = buffer.as_mut() {
                pending.push(event.clone());
                return;
            }
        }

        let snapshot = {
            let mut st = self.state.lock();
            apply_event(&mut st.records, event);
            st.last_updated = Some(Utc::now());
            st.clone()
        };
        self.emitter.emit(&snapshot);
    }

    async fn run_fetch(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let result = fetch_full_list(self.client.as_ref(), &self.collection, &self.query).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            // Superseded by a newer fetch or by stop() — the newer owner
            // drains the buffer.
            tracing::debug!(collection = %self.collection, "discarding superseded fetch response");
            return;
        }

        match result {
            Ok(records) => {
                let buffered = self.buffer.lock().take();
                let snapshot = {
                    let mut st = self.state.lock();
                    st.records = records;
                    for event in buffered.iter().flatten() {
                        apply_event(&mut st.records, event);
                    }
                    st.status = MirrorStatus::Ready;
                    st.error = None;
                    st.last_updated = Some(Utc::now());
                    st.clone()
                };
                self.emitter.emit(&snapshot);
            }
            Err(e) if e.is_cancelled() => {
                // Transport-level abort without a superseding fetch. Unstick
                // any parked events; state is otherwise untouched.
                tracing::debug!(collection = %self.collection, "fetch cancelled");
                self.drain_buffer_into_state();
            }
            Err(e) => {
                tracing::warn!(collection = %self.collection, error = %e, "fetch failed");
                let buffered = self.buffer.lock().take();
                let snapshot = {
                    let mut st = self.state.lock();
                    // Stale-but-available beats blanking the view: records
                    // loaded by an earlier fetch stay visible in Error state.
                    for event in buffered.iter().flatten() {
                        apply_event(&mut st.records, event);
                    }
                    st.status = MirrorStatus::Error;
                    st.error = Some(e);
                    st.clone()
                };
                self.emitter.emit(&snapshot);
            }
        }
    }

    fn drain_buffer_into_state(&self) {
        let buffered = self.buffer.lock().take();
        let Some(events) = buffered else { return };
        if events.is_empty() {
            return;
        }
        let snapshot = {
            let mut st = self.state.lock();
            for event in &events {
                apply_event(&mut st.records, event);
            }
            st.last_updated = Some(Utc::now());
            st.clone()
        };
        self.emitter.emit(&snapshot);
    }

    /// Mutate state under the lock, then notify listeners with a snapshot.
    fn transition(&self, f: impl FnOnce(&mut MirrorState)) {
        let snapshot = {
            let mut st = self.state.lock();
            f(&mut st);
            st.clone()
        };
        self.emitter.emit(&snapshot);
    }
}
