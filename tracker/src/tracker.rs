//! The tracker event loop.
//!
//! [`Tracker`] owns every state machine of the crate and is driven by a single task. I/O
//! (the push connection, route lookups, rider info polls, store writes) runs on spawned tasks
//! that report back over channels; every timer is a deadline owned by one of the state
//! machines, and the loop sleeps until the earliest of them.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;

use crate::{
    animator::{Animator, Frame},
    camera::{CameraCommand, HeadingControl, ZoomDebouncer},
    config::TrackerConfig,
    error::TrackerError,
    ingest::FixIngestor,
    models::{
        Fix, GeoPoint, MarkerState, OrientationReading, RawFix, SessionKey, TrackerSnapshot,
    },
    poll::{PollError, RiderInfoSource},
    render::MapSurface,
    route::{Resolution, RouteOutcome, RouteProvider, RouteResolver},
    session::{ConnectionId, MessageOutcome, SessionManager, SessionTimer},
    store::LocationStore,
    transport::{Transport, TransportEnvelope, TransportEvent},
};

const COMMAND_BUFFER: usize = 64;
const STORE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ChangeSession(SessionKey),
    Reconnect,
    ToggleHeadingMode,
    Orientation(OrientationReading),
}

/// Everything the tracker talks to.
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub routes: Arc<dyn RouteProvider>,
    pub rider_info: Option<Arc<dyn RiderInfoSource>>,
    pub store: Arc<dyn LocationStore>,
    pub surface: Box<dyn MapSurface>,
}

#[derive(Debug)]
struct PollOutcome {
    generation: u64,
    result: Result<Option<RawFix>, PollError>,
}

struct Inbox {
    transport: mpsc::UnboundedReceiver<TransportEnvelope>,
    routes: mpsc::UnboundedReceiver<RouteOutcome>,
    polls: mpsc::UnboundedReceiver<PollOutcome>,
}

pub struct Tracker {
    config: TrackerConfig,
    transport: Arc<dyn Transport>,
    rider_info: Option<Arc<dyn RiderInfoSource>>,
    surface: Box<dyn MapSurface>,

    ingestor: FixIngestor,
    resolver: RouteResolver,
    animator: Animator,
    zoom: ZoomDebouncer,
    heading: HeadingControl,
    session: SessionManager,
    previous: Option<Fix>,

    connection_task: Option<JoinHandle<()>>,
    route_task: Option<JoinHandle<()>>,
    poll_task: Option<JoinHandle<()>>,
    poll_generation: u64,

    transport_tx: mpsc::UnboundedSender<TransportEnvelope>,
    route_tx: mpsc::UnboundedSender<RouteOutcome>,
    poll_tx: mpsc::UnboundedSender<PollOutcome>,
    inbox: Option<Inbox>,

    next_frame_at: Option<f64>,
    snapshot: TrackerSnapshot,
    snapshot_tx: watch::Sender<TrackerSnapshot>,
    epoch: Instant,
    torn_down: bool,
}

impl Tracker {
    pub fn new(config: TrackerConfig, key: SessionKey, collaborators: Collaborators) -> Self {
        let Collaborators {
            transport,
            routes,
            rider_info,
            store,
            surface,
        } = collaborators;

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (route_tx, route_rx) = mpsc::unbounded_channel();
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();

        let zoom = ZoomDebouncer::from_config(&config.camera);
        let snapshot = TrackerSnapshot::initial(key.clone(), GeoPoint::UNKNOWN, zoom.current());
        let (snapshot_tx, _) = watch::channel(snapshot.clone());

        Self {
            transport,
            rider_info,
            surface,
            ingestor: FixIngestor::new(store),
            resolver: RouteResolver::new(routes, config.route_timeout),
            animator: Animator::new(config.motion),
            zoom,
            heading: HeadingControl::from_config(&config.camera),
            session: SessionManager::new(key, config.session),
            previous: None,
            connection_task: None,
            route_task: None,
            poll_task: None,
            poll_generation: 0,
            transport_tx,
            route_tx,
            poll_tx,
            inbox: Some(Inbox {
                transport: transport_rx,
                routes: route_rx,
                polls: poll_rx,
            }),
            next_frame_at: None,
            snapshot,
            snapshot_tx,
            epoch: Instant::now(),
            torn_down: false,
            config,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Runs until `cancel` fires or every command sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        let Some(mut inbox) = self.inbox.take() else {
            return;
        };
        self.start().await;
        self.publish();

        loop {
            let deadline = self.next_deadline();
            let wake_at = deadline.map(|ms| self.instant_at(ms));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(envelope) = inbox.transport.recv() => self.handle_transport(envelope),
                Some(outcome) = inbox.routes.recv() => self.handle_route(outcome),
                Some(outcome) = inbox.polls.recv() => self.handle_poll(outcome),
                _ = sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => {
                    self.handle_timers(deadline.unwrap_or_default());
                }
            }
            self.publish();
        }

        self.teardown();
        self.publish();
        if tokio::time::timeout(STORE_FLUSH_TIMEOUT, self.ingestor.flush())
            .await
            .is_err()
        {
            tracing::warn!("pending location writes dropped at shutdown");
        }
    }

    async fn start(&mut self) {
        let key = self.session.key().clone();
        tracing::info!(trip_id = %key.trip_id, share_id = %key.share_id, "tracker starting");

        if let Some(point) = self.ingestor.restore().await {
            tracing::debug!(lat = point.lat, lng = point.lng, "restoring last known location");
            self.center_on(point);
        }
        self.surface.set_zoom(self.zoom.current());

        let (_, id) = self.session.connect();
        self.open_connection(id);
        if self.rider_info.is_some() {
            self.session.arm_polling(self.now_ms());
        }
    }

    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1_000.0
    }

    fn instant_at(&self, ms: f64) -> Instant {
        self.epoch + Duration::from_secs_f64(ms.max(0.0) / 1_000.0)
    }

    fn next_deadline(&self) -> Option<f64> {
        [
            self.session.next_deadline(),
            self.animator.turn_deadline(),
            self.zoom.deadline(),
            self.heading.deadline(),
            self.next_frame_at,
        ]
        .into_iter()
        .flatten()
        .reduce(f64::min)
    }

    fn handle_timers(&mut self, deadline: f64) {
        // the sleep may wake a hair before the f64 deadline
        let now = self.now_ms().max(deadline);

        while let Some(timer) = self.session.due(now) {
            match timer {
                SessionTimer::Connect(id) => self.open_connection(id),
                SessionTimer::Poll => self.start_poll(),
            }
        }

        if self.next_frame_at.is_some_and(|at| now >= at) {
            self.animate_frame(now);
        }

        if let Some(frame) = self.animator.expire_turn(now) {
            self.render_marker(&frame);
        }

        if let Some(level) = self.zoom.fire(now) {
            tracing::debug!(level, "applying zoom");
            self.surface.set_zoom(level);
            self.snapshot.zoom = level;
        }

        if let Some(heading) = self.heading.fire(now) {
            self.surface.set_camera_heading(heading);
        }
    }

    fn handle_command(&mut self, command: Command) {
        let now = self.now_ms();
        match command {
            Command::ChangeSession(key) => self.change_session(key, now),
            Command::Reconnect => {
                tracing::info!("manual refresh");
                let closed = self.session.reconnect(now);
                self.close_connection(closed);
                self.snapshot.last_update = Some(chrono::Utc::now().to_rfc3339());
            }
            Command::ToggleHeadingMode => {
                for command in self.heading.toggle() {
                    match command {
                        CameraCommand::Heading(degrees) => self.surface.set_camera_heading(degrees),
                        CameraCommand::Tilt(degrees) => self.surface.set_tilt(degrees),
                    }
                }
                tracing::info!(enabled = self.heading.is_active(), "heading mode toggled");
            }
            Command::Orientation(reading) => {
                self.heading.on_orientation(reading, now);
            }
        }
    }

    fn handle_transport(&mut self, envelope: TransportEnvelope) {
        let TransportEnvelope { connection, event } = envelope;
        match event {
            TransportEvent::Opened => {
                self.session.on_open(connection);
            }
            TransportEvent::Error(error) => {
                self.session.on_error(connection, &error);
            }
            TransportEvent::Closed => {
                if self.session.on_close(connection, self.now_ms()) {
                    self.connection_task = None;
                }
            }
            TransportEvent::Message(text) => match self.session.on_message(connection, &text) {
                MessageOutcome::Fix(raw) => {
                    if self.handle_raw_fix(&raw) {
                        self.session.on_transport_fix();
                    }
                }
                MessageOutcome::TripClosed(closed) => self.close_trip(closed),
                MessageOutcome::Ignored => {}
                MessageOutcome::Malformed(error) => {
                    tracing::warn!(%connection, "dropping malformed message: {error}");
                }
            },
        }
    }

    fn handle_poll(&mut self, outcome: PollOutcome) {
        if outcome.generation != self.poll_generation {
            return;
        }
        match outcome.result {
            Ok(Some(raw)) => {
                if self.handle_raw_fix(&raw) {
                    self.session.on_poll_success();
                } else {
                    self.fallback_to_last_known();
                }
            }
            Ok(None) => {
                tracing::debug!("rider info had no usable position");
                self.fallback_to_last_known();
            }
            Err(err) => {
                tracing::warn!("rider info poll failed: {err}");
                self.session.on_poll_failure();
                self.fallback_to_last_known();
            }
        }
    }

    /// Runs one raw sample through ingestion. Returns whether it was accepted.
    fn handle_raw_fix(&mut self, raw: &RawFix) -> bool {
        if self.session.trip_closed() {
            return false;
        }
        let fix = match self.ingestor.accept(raw) {
            Ok(fix) => fix,
            Err(rejection) => {
                tracing::debug!(?raw, "fix rejected: {rejection}");
                return false;
            }
        };
        self.snapshot.last_update = Some(fix.received_at.to_rfc3339());

        match self.previous.replace(fix) {
            None => {
                tracing::debug!(lat = fix.point.lat, lng = fix.point.lng, "first fix, snapping");
                self.animator.snap_to(fix.point);
                self.center_on(fix.point);
                self.render_marker(&Frame {
                    position: fix.point,
                    bearing: self.animator.state().smoothed_bearing,
                    turning: false,
                    icon: self.animator.icon(),
                    finished: None,
                });
            }
            Some(previous) if previous.point == fix.point => {
                tracing::debug!(sequence = fix.sequence, "duplicate fix, not animated");
            }
            Some(previous) => {
                if self.animator.cancel() {
                    tracing::debug!("new fix supersedes the running animation");
                }
                self.next_frame_at = None;
                tracing::debug!(
                    from = previous.sequence,
                    to = fix.sequence,
                    "resolving route"
                );
                let lookup = self.resolver.request(previous, fix);
                let route_tx = self.route_tx.clone();
                let task = tokio::spawn(async move {
                    let _ = route_tx.send(lookup.await);
                });
                if let Some(stale) = self.route_task.replace(task) {
                    stale.abort();
                }
            }
        }
        true
    }

    fn handle_route(&mut self, outcome: RouteOutcome) {
        let Some((pending, resolution)) = self.resolver.complete(outcome) else {
            tracing::debug!("stale route result dropped");
            return;
        };
        self.route_task = None;
        let now = self.now_ms();
        match resolution {
            Resolution::Path(path) => self.animator.start_route(path, pending.next, now),
            Resolution::NoRoute => {
                self.animator
                    .start_line(pending.previous.point, pending.next, now)
            }
        }
        self.next_frame_at = Some(now);
    }

    fn animate_frame(&mut self, now: f64) {
        let Some(frame) = self.animator.tick(now) else {
            self.next_frame_at = None;
            return;
        };
        self.render_marker(&frame);
        self.center_on(frame.position);

        let level = if frame.turning {
            self.config.camera.turning_zoom
        } else {
            self.config.camera.driving_zoom
        };
        self.zoom.request(level, now);

        if let Some(target) = frame.finished {
            tracing::debug!(sequence = target.sequence, "animation finished");
            self.previous = Some(target);
            self.next_frame_at = None;
        } else {
            self.next_frame_at = Some(now + self.config.frame_interval.as_secs_f64() * 1_000.0);
        }
    }

    fn render_marker(&mut self, frame: &Frame) {
        self.surface
            .set_marker(frame.position, frame.bearing, frame.icon);
        self.snapshot.marker = Some(MarkerState {
            position: frame.position,
            rotation: frame.bearing,
            icon: frame.icon,
        });
        self.snapshot.turning = frame.turning;
    }

    fn center_on(&mut self, point: GeoPoint) {
        self.surface.set_center(point);
        self.snapshot.center = point;
    }

    fn fallback_to_last_known(&mut self) {
        if let Some(point) = self.ingestor.last_known() {
            self.center_on(point);
        }
    }

    fn change_session(&mut self, key: SessionKey, now: f64) {
        let Some((closed, id)) = self.session.change_key(key.clone()) else {
            return;
        };
        self.close_connection(closed);

        self.ingestor.forget();
        self.animator.reset();
        self.resolver.cancel();
        if let Some(task) = self.route_task.take() {
            task.abort();
        }
        self.stop_polling();
        self.previous = None;
        self.next_frame_at = None;
        self.zoom.clear();

        self.snapshot = TrackerSnapshot {
            heading_mode: self.heading.is_active(),
            heading_degrees: self.heading.heading_degrees(),
            tilt: self.heading.tilt(),
            ..TrackerSnapshot::initial(key, GeoPoint::UNKNOWN, self.zoom.current())
        };
        self.center_on(GeoPoint::UNKNOWN);

        self.open_connection(id);
        if self.rider_info.is_some() {
            self.session.arm_polling(now);
        }
    }

    fn close_trip(&mut self, closed: Option<ConnectionId>) {
        self.close_connection(closed);
        self.stop_polling();
        self.ingestor.forget();
    }

    fn open_connection(&mut self, id: ConnectionId) {
        let task = self
            .transport
            .open(id, self.session.key(), self.transport_tx.clone());
        if let Some(old) = self.connection_task.replace(task) {
            old.abort();
        }
    }

    fn close_connection(&mut self, closed: Option<ConnectionId>) {
        if closed.is_some() {
            if let Some(task) = self.connection_task.take() {
                task.abort();
            }
        }
    }

    fn start_poll(&mut self) {
        let Some(source) = self.rider_info.clone() else {
            self.session.disarm_polling();
            return;
        };
        if self.poll_task.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!("previous rider info poll still running");
            return;
        }
        let generation = self.poll_generation;
        let poll_tx = self.poll_tx.clone();
        self.poll_task = Some(tokio::spawn(async move {
            let result = source.fetch().await;
            let _ = poll_tx.send(PollOutcome { generation, result });
        }));
    }

    fn stop_polling(&mut self) {
        self.session.disarm_polling();
        self.poll_generation += 1;
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }

    fn publish(&mut self) {
        self.snapshot.session = self.session.key().clone();
        self.snapshot.status = self.session.status();
        self.snapshot.trip_closed = self.session.trip_closed();
        self.snapshot.heading_mode = self.heading.is_active();
        self.snapshot.heading_degrees = self.heading.heading_degrees();
        self.snapshot.tilt = self.heading.tilt();
        self.snapshot.awaiting_location = self.snapshot.center.is_unknown();

        let next = &self.snapshot;
        self.snapshot_tx.send_if_modified(|current| {
            if current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
    }

    /// Cancels every timer, task and listener. Safe to call more than once.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let closed = self.session.teardown();
        if closed.is_some() {
            tracing::debug!("closing push connection");
        }
        for task in [
            self.connection_task.take(),
            self.route_task.take(),
            self.poll_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        self.animator.cancel();
        self.resolver.cancel();
        self.zoom.clear();
        self.heading.detach();
        self.next_frame_at = None;
        tracing::info!("tracker stopped");
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Cheap handle to a running tracker.
#[derive(Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<TrackerSnapshot>,
    cancel: CancellationToken,
}

impl TrackerHandle {
    pub async fn send(&self, command: Command) -> Result<(), TrackerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TrackerError::Stopped)
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshot.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Spawns a tracker on the current runtime. The task ends when `cancel` fires.
pub fn spawn(
    config: TrackerConfig,
    key: SessionKey,
    collaborators: Collaborators,
    cancel: CancellationToken,
) -> (TrackerHandle, JoinHandle<()>) {
    let tracker = Tracker::new(config, key, collaborators);
    let snapshot = tracker.subscribe();
    let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(tracker.run(command_rx, cancel.clone()));
    (
        TrackerHandle {
            commands,
            snapshot,
            cancel,
        },
        task,
    )
}
