//! SubscriptionRegistry — single source of truth for "is anyone listening to
//! collection X with query Y".
//!
//! Entries are keyed by canonical [`SubscriptionKey`] and reference-counted,
//! so duplicate consumers share one upstream channel and one mirror. Teardown
//! at refcount zero is deferred by a short linger: a release followed
//! immediately by an acquire for the same key (component remount during
//! navigation) reuses the live entry instead of churning the upstream
//! subscription and refetching. An epoch counter per entry decides whether a
//! lapsed linger may still tear down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::{
    client::RemoteClient,
    emitter::SubscriptionId,
    error::{ClinicSyncError, Result},
    mirror::CollectionMirror,
    query::{subscription_key, validate_collection_name, QueryOptions, SubscriptionKey},
    session::{SessionEvent, SessionHub},
};

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// How long a zero-refcount entry lingers before its upstream
    /// subscription is actually torn down.
    pub linger: Duration,
    /// Default page size applied to queries that do not set one.
    pub page_size: Option<usize>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            linger: Duration::from_millis(100),
            page_size: None,
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// A consumer's claim on a mirror. Releasing (explicitly or on drop)
/// decrements the entry's refcount; double release is a no-op.
pub struct MirrorHandle {
    key: SubscriptionKey,
    mirror: Arc<CollectionMirror>,
    registry: Weak<SubscriptionRegistry>,
    released: AtomicBool,
}

impl MirrorHandle {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn mirror(&self) -> &Arc<CollectionMirror> {
        &self.mirror
    }

    /// Give up this claim. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.release_key(&self.key);
        }
    }
}

impl Drop for MirrorHandle {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Registry
// ============================================================================

struct RegistryEntry {
    mirror: Arc<CollectionMirror>,
    refcount: usize,
    /// Bumped on every acquire/release; a linger task only tears down if the
    /// epoch it captured is still current.
    epoch: u64,
}

pub struct SubscriptionRegistry {
    client: Arc<dyn RemoteClient>,
    session: Arc<SessionHub>,
    options: RegistryOptions,
    entries: Arc<Mutex<HashMap<SubscriptionKey, RegistryEntry>>>,
    disposed: Arc<AtomicBool>,
    session_sub: Mutex<Option<SubscriptionId>>,
}

impl SubscriptionRegistry {
    pub fn new(
        client: Arc<dyn RemoteClient>,
        session: Arc<SessionHub>,
        options: RegistryOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            session,
            options,
            entries: Arc::new(Mutex::new(HashMap::new())),
            disposed: Arc::new(AtomicBool::new(false)),
            session_sub: Mutex::new(None),
        })
    }

    /// Hook the registry into the session lifecycle: logout tears down every
    /// upstream subscription, login rebuilds entries that still have
    /// consumers. Call once after construction. Login rebuilds spawn onto
    /// the tokio runtime current when the event fires.
    pub fn init(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let id = self.session.subscribe(move |event| {
            if let Some(registry) = weak.upgrade() {
                registry.on_session_event(event);
            }
        });
        *self.session_sub.lock() = Some(id);
    }

    // -----------------------------------------------------------------------
    // Acquire / Release
    // -----------------------------------------------------------------------

    /// Claim the mirror for `(collection, query)`, creating and starting it
    /// on first acquire.
    ///
    /// Transport problems never surface here — they land in the mirror's
    /// state. The only errors are programmer errors (invalid collection
    /// name) and acquiring from a disposed registry.
    ///
    /// First-acquire starts are spawned onto the current tokio runtime.
    /// Outside a runtime the handle is still returned, but the mirror stays
    /// `Idle` (warn-logged) until a login rebuild or manual start.
    pub fn acquire(
        self: &Arc<Self>,
        collection: &str,
        query: QueryOptions,
    ) -> Result<MirrorHandle> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ClinicSyncError::Disposed);
        }
        validate_collection_name(collection)?;

        let mut query = query;
        if query.page_size.is_none() {
            query.page_size = self.options.page_size;
        }
        let key = subscription_key(collection, &query);

        let (mirror, needs_start) = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&key) {
                Some(entry) => {
                    entry.refcount += 1;
                    // Invalidate any pending linger teardown.
                    entry.epoch += 1;
                    (Arc::clone(&entry.mirror), false)
                }
                None => {
                    let mirror = CollectionMirror::new(
                        Arc::clone(&self.client),
                        Arc::clone(&self.session),
                        collection,
                        query,
                    )?;
                    entries.insert(
                        key.clone(),
                        RegistryEntry {
                            mirror: Arc::clone(&mirror),
                            refcount: 1,
                            epoch: 0,
                        },
                    );
                    (mirror, true)
                }
            }
        };

        if needs_start {
            let mirror = Arc::clone(&mirror);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        mirror.start().await;
                    });
                }
                Err(_) => {
                    tracing::warn!(key = %key, "no tokio runtime: mirror left idle until a later start");
                }
            }
        }

        Ok(MirrorHandle {
            key,
            mirror,
            registry: Arc::downgrade(self),
            released: AtomicBool::new(false),
        })
    }

    /// Give up a claim. Equivalent to [`MirrorHandle::release`]; idempotent.
    pub fn release(&self, handle: &MirrorHandle) {
        handle.release();
    }

    fn release_key(&self, key: &SubscriptionKey) {
        let epoch = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount > 0 {
                return;
            }
            entry.epoch += 1;
            entry.epoch
        };

        let entries = Arc::clone(&self.entries);
        let key = key.clone();
        let linger = self.options.linger;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(linger).await;
                    teardown_if_stale(&entries, &key, epoch);
                });
            }
            // No runtime (e.g. the last handle dropped during shutdown):
            // tear down immediately rather than leaking the channel.
            Err(_) => teardown_if_stale(&entries, &key, epoch),
        }
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    fn on_session_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::LoggedOut => {
                let mirrors: Vec<Arc<CollectionMirror>> = self
                    .entries
                    .lock()
                    .values()
                    .map(|e| Arc::clone(&e.mirror))
                    .collect();
                for mirror in mirrors {
                    mirror.stop();
                    mirror.clear(Some(crate::error::ClientError::NotAuthenticated));
                }
            }
            SessionEvent::LoggedIn(_) => {
                let mirrors: Vec<Arc<CollectionMirror>> = self
                    .entries
                    .lock()
                    .values()
                    .filter(|e| e.refcount > 0)
                    .map(|e| Arc::clone(&e.mirror))
                    .collect();
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        for mirror in mirrors {
                            handle.spawn(async move {
                                mirror.start().await;
                            });
                        }
                    }
                    Err(_) => {
                        tracing::warn!("no tokio runtime: mirrors not restarted on login");
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Tear everything down. Further acquires are rejected.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        if let Some(id) = self.session_sub.lock().take() {
            self.session.unsubscribe(id);
        }
        let mirrors: Vec<Arc<CollectionMirror>> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, e)| e.mirror).collect()
        };
        for mirror in mirrors {
            mirror.stop();
        }
    }

    /// Number of live entries (including lingering ones).
    pub fn active_mirrors(&self) -> usize {
        self.entries.lock().len()
    }
}

fn teardown_if_stale(
    entries: &Mutex<HashMap<SubscriptionKey, RegistryEntry>>,
    key: &SubscriptionKey,
    epoch: u64,
) {
    let mirror = {
        let mut map = entries.lock();
        match map.get(key) {
            Some(entry) if entry.refcount == 0 && entry.epoch == epoch => {
                map.remove(key).map(|e| e.mirror)
            }
            _ => None,
        }
    };
    if let Some(mirror) = mirror {
        tracing::debug!(key = %key, "tearing down idle mirror");
        mirror.stop();
    }
}
