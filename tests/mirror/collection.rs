//! CollectionMirror tests — initial fetch, event races, refresh supersession.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use clinic_sync::{
    ChangeAction, ChangeCallback, ChangeEvent, ClientError, CollectionMirror, ListPage,
    MirrorStatus, QueryOptions, Record, RemoteClient, Session, SessionHub, Unsubscribe,
};

// ============================================================================
// Mock client
// ============================================================================

/// Response for the nth `list` call (0-based).
type ListResponder = Box<dyn Fn(usize) -> Result<Vec<Record>, ClientError> + Send + Sync>;

struct MockClient {
    list_fn: Mutex<Option<ListResponder>>,
    /// Per-call delays, popped front on each `list`.
    list_delays: Mutex<VecDeque<Duration>>,
    list_calls: AtomicUsize,
    subscribe_error: Mutex<Option<ClientError>>,
    callbacks: Mutex<Vec<ChangeCallback>>,
    subscribes: AtomicUsize,
    unsubscribes: Arc<AtomicUsize>,
}

impl MockClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            list_fn: Mutex::new(None),
            list_delays: Mutex::new(VecDeque::new()),
            list_calls: AtomicUsize::new(0),
            subscribe_error: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
            subscribes: AtomicUsize::new(0),
            unsubscribes: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn on_list(&self, f: impl Fn(usize) -> Result<Vec<Record>, ClientError> + Send + Sync + 'static) {
        *self.list_fn.lock() = Some(Box::new(f));
    }

    fn delay_lists(&self, delays: &[Duration]) {
        self.list_delays.lock().extend(delays.iter().copied());
    }

    fn fail_subscribe(&self, error: ClientError) {
        *self.subscribe_error.lock() = Some(error);
    }

    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// Deliver an event to every live subscriber.
    fn emit(&self, event: &ChangeEvent) {
        let callbacks: Vec<ChangeCallback> = self.callbacks.lock().clone();
        for cb in callbacks {
            cb(event);
        }
    }
}

#[async_trait]
impl RemoteClient for MockClient {
    async fn list(
        &self,
        _collection: &str,
        _page: usize,
        _per_page: usize,
        _query: &QueryOptions,
    ) -> Result<ListPage, ClientError> {
        let index = self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.list_delays.lock().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let items = match &*self.list_fn.lock() {
            Some(f) => f(index)?,
            None => Vec::new(),
        };
        let total_items = items.len();
        Ok(ListPage {
            items,
            page: 1,
            per_page: 200,
            total_items,
        })
    }

    async fn get_one(
        &self,
        _collection: &str,
        _id: &str,
        _expand: Option<&[String]>,
    ) -> Result<Record, ClientError> {
        Err(ClientError::Network("not supported by mock".to_string()))
    }

    async fn create(
        &self,
        _collection: &str,
        _fields: &Map<String, Value>,
    ) -> Result<Record, ClientError> {
        Err(ClientError::Network("not supported by mock".to_string()))
    }

    async fn update(
        &self,
        _collection: &str,
        _id: &str,
        _fields: &Map<String, Value>,
    ) -> Result<Record, ClientError> {
        Err(ClientError::Network("not supported by mock".to_string()))
    }

    async fn delete(&self, _collection: &str, _id: &str) -> Result<bool, ClientError> {
        Ok(false)
    }

    async fn subscribe(
        &self,
        _collection: &str,
        _topic: &str,
        callback: ChangeCallback,
    ) -> Result<Unsubscribe, ClientError> {
        if let Some(error) = self.subscribe_error.lock().take() {
            return Err(error);
        }
        self.callbacks.lock().push(callback);
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let unsubscribes = Arc::clone(&self.unsubscribes);
        Ok(Box::new(move || {
            unsubscribes.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Route library logs through the test harness so the discard/cancel debug
/// lines show up on failure.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn authed_hub() -> Arc<SessionHub> {
    Arc::new(SessionHub::with_session(Session {
        user_id: "vet_1".to_string(),
        token: "tok".to_string(),
    }))
}

fn item(id: &str, stock: f64) -> Record {
    let fields = json!({ "name": id, "stock": stock }).as_object().cloned().unwrap();
    Record::new("inventory", id, fields)
}

fn make_mirror(client: &Arc<MockClient>) -> Arc<CollectionMirror> {
    let client_dyn: Arc<dyn RemoteClient> = Arc::clone(client) as Arc<dyn RemoteClient>;
    CollectionMirror::new(client_dyn, authed_hub(), "inventory", QueryOptions::default())
        .expect("valid collection name")
}

// ============================================================================
// Initial load
// ============================================================================

#[tokio::test]
async fn initial_load_populates_records_and_subscribes() {
    let client = MockClient::new();
    client.on_list(|_| Ok(vec![item("a", 1.0), item("b", 2.0)]));
    let mirror = make_mirror(&client);

    mirror.start().await;

    let state = mirror.state();
    assert_eq!(state.status, MirrorStatus::Ready);
    assert!(state.error.is_none());
    assert!(state.last_updated.is_some());
    let ids: Vec<&str> = state.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(client.subscribes(), 1);
}

#[tokio::test]
async fn initial_load_failure_sets_error_state() {
    let client = MockClient::new();
    client.on_list(|_| {
        Err(ClientError::Server {
            status: 500,
            message: "boom".to_string(),
        })
    });
    let mirror = make_mirror(&client);

    mirror.start().await;

    let state = mirror.state();
    assert_eq!(state.status, MirrorStatus::Error);
    assert!(matches!(state.error, Some(ClientError::Server { .. })));
    assert!(state.records.is_empty());
}

#[tokio::test]
async fn error_state_retries_through_refresh() {
    let client = MockClient::new();
    client.on_list(|index| {
        if index == 0 {
            Err(ClientError::Network("down".to_string()))
        } else {
            Ok(vec![item("a", 1.0)])
        }
    });
    let mirror = make_mirror(&client);

    mirror.start().await;
    assert_eq!(mirror.status(), MirrorStatus::Error);

    mirror.refresh().await;
    let state = mirror.state();
    assert_eq!(state.status, MirrorStatus::Ready);
    assert_eq!(state.records.len(), 1);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn unauthenticated_start_is_a_no_op_with_distinguishable_error() {
    let client = MockClient::new();
    let client_dyn: Arc<dyn RemoteClient> = Arc::clone(&client) as Arc<dyn RemoteClient>;
    let mirror = CollectionMirror::new(
        client_dyn,
        Arc::new(SessionHub::new()),
        "inventory",
        QueryOptions::default(),
    )
    .unwrap();

    mirror.start().await;

    let state = mirror.state();
    assert_eq!(state.status, MirrorStatus::Error);
    assert_eq!(state.error, Some(ClientError::NotAuthenticated));
    assert_eq!(client.list_calls(), 0, "no fetch without a session");
    assert_eq!(client.subscribes(), 0, "no subscription without a session");
}

#[tokio::test]
async fn subscribe_failure_lands_in_state_not_panic() {
    let client = MockClient::new();
    client.fail_subscribe(ClientError::Network("ws refused".to_string()));
    let mirror = make_mirror(&client);

    mirror.start().await;

    let state = mirror.state();
    assert_eq!(state.status, MirrorStatus::Error);
    assert!(matches!(state.error, Some(ClientError::Network(_))));
}

#[tokio::test]
async fn invalid_collection_name_is_a_construction_error() {
    let client = MockClient::new();
    let client_dyn: Arc<dyn RemoteClient> = client as Arc<dyn RemoteClient>;
    let result = CollectionMirror::new(
        client_dyn,
        authed_hub(),
        "Bad Name",
        QueryOptions::default(),
    );
    assert!(matches!(result, Err(ClientError::InvalidCollection(_))));
}

// ============================================================================
// Events racing the initial fetch
// ============================================================================

#[tokio::test(start_paused = true)]
async fn create_delivered_during_initial_fetch_is_not_duplicated() {
    let client = MockClient::new();
    // The fetch result already contains X; the subscription also delivers a
    // Create for X while the fetch is in flight.
    client.on_list(|_| Ok(vec![item("x", 10.0), item("a", 5.0)]));
    client.delay_lists(&[Duration::from_millis(50)]);
    let mirror = make_mirror(&client);

    let task = {
        let mirror = Arc::clone(&mirror);
        tokio::spawn(async move { mirror.start().await })
    };

    // Wait until the subscription is open and the fetch is parked on its delay.
    while client.list_calls() == 0 {
        tokio::task::yield_now().await;
    }
    client.emit(&ChangeEvent::new(ChangeAction::Create, item("x", 10.0)));

    task.await.unwrap();

    let records = mirror.records();
    let xs: Vec<&Record> = records.iter().filter(|r| r.id == "x").collect();
    assert_eq!(xs.len(), 1, "exactly one X expected, got {}", xs.len());
    assert_eq!(xs[0].get_f64("stock"), Some(10.0));
    assert_eq!(mirror.status(), MirrorStatus::Ready);
}

/// Out-of-order tolerance: an update for a record whose older version is
/// still in the in-flight fetch result must win once the fetch resolves,
/// because buffered events are re-applied over the snapshot.
#[tokio::test(start_paused = true)]
async fn update_buffered_during_fetch_overrides_the_stale_snapshot() {
    init_tracing();
    let client = MockClient::new();
    client.on_list(|_| Ok(vec![item("x", 10.0)]));
    client.delay_lists(&[Duration::from_millis(50)]);
    let mirror = make_mirror(&client);

    let task = {
        let mirror = Arc::clone(&mirror);
        tokio::spawn(async move { mirror.start().await })
    };
    while client.list_calls() == 0 {
        tokio::task::yield_now().await;
    }
    // A newer version of X commits while the fetch still carries the old one.
    client.emit(&ChangeEvent::new(ChangeAction::Update, item("x", 99.0)));

    task.await.unwrap();

    let records = mirror.records();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].get_f64("stock"),
        Some(99.0),
        "the buffered update must beat the stale fetch row"
    );
    assert_eq!(mirror.status(), MirrorStatus::Ready);
}

// ============================================================================
// Live events after Ready
// ============================================================================

#[tokio::test]
async fn live_events_apply_and_notify() {
    let client = MockClient::new();
    client.on_list(|_| Ok(vec![item("a", 1.0)]));
    let mirror = make_mirror(&client);
    mirror.start().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    mirror.on_change(move |state| {
        seen_clone.lock().push(state.records.len());
    });

    client.emit(&ChangeEvent::new(ChangeAction::Create, item("b", 2.0)));
    client.emit(&ChangeEvent::new(ChangeAction::Update, item("a", 9.0)));
    client.emit(&ChangeEvent::new(ChangeAction::Delete, item("b", 2.0)));

    let records = mirror.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get_f64("stock"), Some(9.0));
    assert_eq!(*seen.lock(), vec![2, 2, 1]);
}

// ============================================================================
// Refresh semantics
// ============================================================================

#[tokio::test]
async fn refresh_replaces_records_without_resubscribing() {
    let client = MockClient::new();
    client.on_list(|index| {
        if index == 0 {
            Ok(vec![item("a", 1.0)])
        } else {
            Ok(vec![item("a", 1.0), item("b", 2.0)])
        }
    });
    let mirror = make_mirror(&client);
    mirror.start().await;

    mirror.refresh().await;

    assert_eq!(mirror.records().len(), 2);
    assert_eq!(client.subscribes(), 1, "refresh must not reopen the channel");
    assert_eq!(client.unsubscribes(), 0);
}

/// The second of two overlapping refreshes wins; the first's
/// late response is discarded without touching state or surfacing an error.
#[tokio::test(start_paused = true)]
async fn superseded_refresh_response_is_discarded() {
    init_tracing();
    let client = MockClient::new();
    client.on_list(|index| match index {
        0 => Ok(vec![item("initial", 0.0)]),
        1 => Ok(vec![item("first_refresh", 0.0)]),
        _ => Ok(vec![item("second_refresh", 0.0)]),
    });
    let mirror = make_mirror(&client);
    mirror.start().await;

    // First refresh: slow. Second refresh: fast, issued while the first is
    // still in flight.
    client.delay_lists(&[Duration::from_millis(100), Duration::from_millis(10)]);

    let first = {
        let mirror = Arc::clone(&mirror);
        tokio::spawn(async move { mirror.refresh().await })
    };
    while client.list_calls() < 2 {
        tokio::task::yield_now().await;
    }
    let second = {
        let mirror = Arc::clone(&mirror);
        tokio::spawn(async move { mirror.refresh().await })
    };

    first.await.unwrap();
    second.await.unwrap();

    let state = mirror.state();
    assert_eq!(state.status, MirrorStatus::Ready);
    assert!(state.error.is_none());
    let ids: Vec<&str> = state.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["second_refresh"]);
}

#[tokio::test]
async fn refresh_failure_keeps_loaded_records_visible() {
    let client = MockClient::new();
    client.on_list(|index| {
        if index == 0 {
            Ok(vec![item("a", 1.0)])
        } else {
            Err(ClientError::Server {
                status: 502,
                message: "bad gateway".to_string(),
            })
        }
    });
    let mirror = make_mirror(&client);
    mirror.start().await;

    mirror.refresh().await;

    let state = mirror.state();
    assert_eq!(state.status, MirrorStatus::Error);
    assert_eq!(state.records.len(), 1, "stale data beats a blank view");
}

#[tokio::test]
async fn cancelled_fetch_is_never_surfaced_as_error() {
    let client = MockClient::new();
    client.on_list(|index| {
        if index == 0 {
            Ok(vec![item("a", 1.0)])
        } else {
            Err(ClientError::Cancelled)
        }
    });
    let mirror = make_mirror(&client);
    mirror.start().await;

    mirror.refresh().await;

    let state = mirror.state();
    assert_ne!(state.status, MirrorStatus::Error);
    assert!(state.error.is_none());
    assert_eq!(state.records.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn events_during_refresh_are_buffered_not_lost() {
    let client = MockClient::new();
    client.on_list(|_| Ok(vec![item("a", 1.0)]));
    let mirror = make_mirror(&client);
    mirror.start().await;

    client.delay_lists(&[Duration::from_millis(50)]);
    let task = {
        let mirror = Arc::clone(&mirror);
        tokio::spawn(async move { mirror.refresh().await })
    };
    while client.list_calls() < 2 {
        tokio::task::yield_now().await;
    }
    // Delivered mid-refresh: must survive the snapshot replacement.
    client.emit(&ChangeEvent::new(ChangeAction::Create, item("b", 2.0)));

    task.await.unwrap();

    let ids: Vec<String> = mirror.records().iter().map(|r| r.id.clone()).collect();
    assert!(ids.contains(&"a".to_string()));
    assert!(ids.contains(&"b".to_string()));
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test]
async fn stop_closes_the_upstream_channel() {
    let client = MockClient::new();
    client.on_list(|_| Ok(vec![item("a", 1.0)]));
    let mirror = make_mirror(&client);
    mirror.start().await;

    mirror.stop();

    assert_eq!(client.unsubscribes(), 1);
}
