#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracker::{
    config::TrackerConfig,
    models::{DirectionsRequest, GeoPoint, SessionKey, TrackerSnapshot},
    poll::{PollFuture, RiderInfoSource},
    render::RecordingSurface,
    route::{RouteError, RouteFuture, RouteProvider},
    store::{LAST_KNOWN_FIX_KEY, LocationStore, StoreError, StoreFuture},
    tracker::{self as runtime, Collaborators, TrackerHandle},
    transport::ScriptedTransport,
};

/// Answers every lookup with the same path and remembers the requests.
#[derive(Default)]
pub struct FixedRoutes {
    pub path: Vec<GeoPoint>,
    pub requests: Mutex<Vec<DirectionsRequest>>,
}

impl FixedRoutes {
    pub fn new(path: Vec<GeoPoint>) -> Self {
        Self {
            path,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<DirectionsRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl RouteProvider for FixedRoutes {
    fn route(&self, request: DirectionsRequest) -> RouteFuture {
        self.requests.lock().unwrap().push(request);
        let path = self.path.clone();
        Box::pin(async move { Ok(path) })
    }
}

/// Routes every hop as the straight line between its ends and remembers the requests.
#[derive(Default)]
pub struct EchoRoutes {
    pub requests: Mutex<Vec<DirectionsRequest>>,
}

impl EchoRoutes {
    pub fn hops(&self) -> Vec<(GeoPoint, GeoPoint)> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| (request.origin, request.destination))
            .collect()
    }
}

impl RouteProvider for EchoRoutes {
    fn route(&self, request: DirectionsRequest) -> RouteFuture {
        let path = vec![request.origin, request.destination];
        self.requests.lock().unwrap().push(request);
        Box::pin(async move { Ok(path) })
    }
}

pub struct FailingRoutes;

impl RouteProvider for FailingRoutes {
    fn route(&self, _request: DirectionsRequest) -> RouteFuture {
        Box::pin(async { Err(RouteError::Status("ZERO_RESULTS".into())) })
    }
}

/// Rider info source returning nothing, counting calls.
#[derive(Default)]
pub struct EmptyRiderInfo {
    pub calls: Mutex<usize>,
}

impl RiderInfoSource for EmptyRiderInfo {
    fn fetch(&self) -> PollFuture {
        *self.calls.lock().unwrap() += 1;
        Box::pin(async { Ok(None) })
    }
}

/// Reads answer at once with nothing stored; writes never complete.
#[derive(Default)]
pub struct StalledStore {
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl StalledStore {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl LocationStore for StalledStore {
    fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<GeoPoint>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(None) })
    }

    fn set<'a>(&'a self, _key: &'a str, _point: GeoPoint) -> StoreFuture<'a, ()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Box::pin(std::future::pending::<Result<(), StoreError>>())
    }

    fn delete<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, ()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Box::pin(std::future::pending::<Result<(), StoreError>>())
    }
}

pub struct Harness {
    pub handle: TrackerHandle,
    pub task: JoinHandle<()>,
    pub transport: ScriptedTransport,
    pub surface: RecordingSurface,
    pub store: Arc<dyn LocationStore>,
}

impl Harness {
    /// Last known location as persisted, once the writer caught up.
    pub async fn stored(&self) -> Option<GeoPoint> {
        settle().await;
        self.store.get(LAST_KNOWN_FIX_KEY).await.unwrap()
    }
}

pub fn start(
    key: SessionKey,
    routes: Arc<dyn RouteProvider>,
    rider_info: Option<Arc<dyn RiderInfoSource>>,
    store: Arc<dyn LocationStore>,
) -> Harness {
    let transport = ScriptedTransport::new();
    let surface = RecordingSurface::new();
    let (handle, task) = runtime::spawn(
        TrackerConfig::default(),
        key,
        Collaborators {
            transport: Arc::new(transport.clone()),
            routes,
            rider_info,
            store: store.clone(),
            surface: Box::new(surface.clone()),
        },
        CancellationToken::new(),
    );
    Harness {
        handle,
        task,
        transport,
        surface,
        store,
    }
}

pub fn trip_key() -> SessionKey {
    SessionKey::new("42", "abc")
}

pub fn fix_message(point: GeoPoint) -> String {
    serde_json::json!({ "Latitude": point.lat, "Longtitude": point.lng }).to_string()
}

/// Lets the tracker task drain its queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn wait_for(
    handle: &TrackerHandle,
    what: &str,
    condition: impl FnMut(&TrackerSnapshot) -> bool,
) -> TrackerSnapshot {
    let mut rx = handle.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(condition))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("tracker stopped")
        .clone();
    snapshot
}
