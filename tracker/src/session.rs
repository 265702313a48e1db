//! Connection lifecycle for one tracked trip.
//!
//! [`SessionManager`] is a plain state machine: it never touches sockets or timers itself.
//! It hands out [`ConnectionId`]s for the caller to open, keeps the reconnect and poll
//! deadlines, and classifies inbound messages. Events from a connection that is no longer
//! current are ignored, which makes a forced close race-free.
//!
//! ```text
//! disconnected --reconnect delay--> connecting --open--> connected
//!      ^                                                   |
//!      +---------------------- close/error ----------------+
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::SessionConfig,
    models::{ConnectionStatus, CoordinateValue, RawFix, SessionKey},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed trip share payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Body of a trip-share push message. `Longtitude` is spelled the way the service sends it.
#[derive(Debug, Deserialize)]
struct TripSharePayload {
    #[serde(rename = "Latitude", default)]
    latitude: Option<CoordinateValue>,
    #[serde(rename = "Longtitude", default)]
    longitude: Option<CoordinateValue>,
    #[serde(rename = "Istripclose", default)]
    trip_closed: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Heartbeat,
    TripClosed,
    Fix(RawFix),
    /// Valid JSON without a usable position.
    Empty,
}

pub fn classify(text: &str) -> Result<InboundMessage, PayloadError> {
    if matches!(text.trim(), "heartbeat" | "pong") {
        return Ok(InboundMessage::Heartbeat);
    }
    let payload: TripSharePayload = serde_json::from_str(text)?;
    if payload.trip_closed.as_ref().is_some_and(is_truthy_flag) {
        return Ok(InboundMessage::TripClosed);
    }

    let non_zero = |value: &Option<CoordinateValue>| {
        value
            .as_ref()
            .and_then(CoordinateValue::to_f64)
            .is_some_and(|v| v != 0.0)
    };
    if non_zero(&payload.latitude) && non_zero(&payload.longitude) {
        Ok(InboundMessage::Fix(RawFix {
            lat: payload.latitude,
            lng: payload.longitude,
        }))
    } else {
        Ok(InboundMessage::Empty)
    }
}

fn is_truthy_flag(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64() == Some(1.0),
        Value::String(s) => matches!(s.trim(), "true" | "True" | "1"),
        _ => false,
    }
}

/// What the caller should do with a message from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Fix(RawFix),
    /// The trip ended: the connection id should be closed and local state cleared.
    TripClosed(Option<ConnectionId>),
    Ignored,
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTimer {
    Connect(ConnectionId),
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct PollSchedule {
    armed: bool,
    next_at: Option<f64>,
}

pub struct SessionManager {
    config: SessionConfig,
    key: SessionKey,
    status: ConnectionStatus,
    trip_closed: bool,
    current: Option<ConnectionId>,
    next_id: u64,
    connect_at: Option<f64>,
    poll: PollSchedule,
}

impl SessionManager {
    pub fn new(key: SessionKey, config: SessionConfig) -> Self {
        Self {
            config,
            key,
            status: ConnectionStatus::Connecting,
            trip_closed: false,
            current: None,
            next_id: 0,
            connect_at: None,
            poll: PollSchedule::default(),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn trip_closed(&self) -> bool {
        self.trip_closed
    }

    pub fn current(&self) -> Option<ConnectionId> {
        self.current
    }

    /// Opens a new connection for the current key. Returns the connection that must be
    /// torn down first, if any, and the id to open.
    pub fn connect(&mut self) -> (Option<ConnectionId>, ConnectionId) {
        let replaced = self.current.take();
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.current = Some(id);
        self.connect_at = None;
        self.status = ConnectionStatus::Connecting;
        tracing::info!(
            connection = %id,
            trip_id = %self.key.trip_id,
            share_id = %self.key.share_id,
            "connecting"
        );
        (replaced, id)
    }

    /// Closes the current connection without scheduling a reconnect.
    pub fn disconnect(&mut self) -> Option<ConnectionId> {
        self.connect_at = None;
        self.status = ConnectionStatus::Disconnected;
        self.current.take()
    }

    /// Manual refresh: drop the connection and reopen it after the refresh delay.
    pub fn reconnect(&mut self, now: f64) -> Option<ConnectionId> {
        let closed = self.disconnect();
        if !self.trip_closed {
            self.connect_at = Some(now + self.config.refresh_delay_ms);
        }
        closed
    }

    /// Switches to `key`. Returns `None` when the key is unchanged, otherwise the connection
    /// to tear down (if any) and the new connection to open.
    pub fn change_key(
        &mut self,
        key: SessionKey,
    ) -> Option<(Option<ConnectionId>, ConnectionId)> {
        if key == self.key {
            return None;
        }
        tracing::info!(
            from_trip = %self.key.trip_id,
            from_share = %self.key.share_id,
            to_trip = %key.trip_id,
            to_share = %key.share_id,
            "session changed"
        );
        let closed = self.disconnect();
        self.key = key;
        self.trip_closed = false;
        let (_, id) = self.connect();
        Some((closed, id))
    }

    pub fn on_open(&mut self, id: ConnectionId) -> bool {
        if !self.is_current(id) {
            return false;
        }
        tracing::info!(connection = %id, "connection established");
        self.status = ConnectionStatus::Connected;
        true
    }

    pub fn on_error(&mut self, id: ConnectionId, error: &str) -> bool {
        if !self.is_current(id) {
            return false;
        }
        tracing::warn!(connection = %id, "connection error: {error}");
        self.status = ConnectionStatus::Disconnected;
        true
    }

    /// The transport closed. Schedules one reconnect and re-arms polling.
    pub fn on_close(&mut self, id: ConnectionId, now: f64) -> bool {
        if !self.is_current(id) {
            return false;
        }
        self.current = None;
        self.status = ConnectionStatus::Disconnected;
        if self.trip_closed {
            return true;
        }
        self.connect_at = Some(now + self.config.reconnect_delay_ms);
        tracing::info!(
            connection = %id,
            retry_in_ms = self.config.reconnect_delay_ms,
            "connection closed"
        );
        self.arm_polling(now + self.config.poll_interval_ms);
        true
    }

    pub fn on_message(&mut self, id: ConnectionId, text: &str) -> MessageOutcome {
        if !self.is_current(id) || self.trip_closed {
            return MessageOutcome::Ignored;
        }
        match classify(text) {
            Ok(InboundMessage::Heartbeat) => {
                tracing::trace!(connection = %id, "heartbeat");
                MessageOutcome::Ignored
            }
            Ok(InboundMessage::TripClosed) => {
                tracing::info!(trip_id = %self.key.trip_id, "trip closed");
                self.trip_closed = true;
                self.disarm_polling();
                MessageOutcome::TripClosed(self.disconnect())
            }
            Ok(InboundMessage::Fix(raw)) => MessageOutcome::Fix(raw),
            Ok(InboundMessage::Empty) => MessageOutcome::Ignored,
            Err(err) => MessageOutcome::Malformed(err.to_string()),
        }
    }

    /// A fix arrived over the live connection: the socket is healthy and polling can stop.
    pub fn on_transport_fix(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.disarm_polling();
    }

    pub fn on_poll_success(&mut self) {
        self.status = ConnectionStatus::Connected;
    }

    pub fn on_poll_failure(&mut self) {
        self.status = ConnectionStatus::Disconnected;
    }

    /// Arms polling with the first request at `first_at`; keeps an already armed schedule.
    pub fn arm_polling(&mut self, first_at: f64) {
        if self.trip_closed || self.poll.armed {
            return;
        }
        self.poll = PollSchedule {
            armed: true,
            next_at: Some(first_at),
        };
    }

    pub fn disarm_polling(&mut self) {
        self.poll = PollSchedule::default();
    }

    pub fn polling_armed(&self) -> bool {
        self.poll.armed
    }

    pub fn next_deadline(&self) -> Option<f64> {
        match (self.connect_at, self.poll.next_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Pops the next elapsed timer. Call repeatedly until it returns `None`.
    pub fn due(&mut self, now: f64) -> Option<SessionTimer> {
        if self.connect_at.is_some_and(|at| now >= at) {
            let (_, id) = self.connect();
            return Some(SessionTimer::Connect(id));
        }
        if self.poll.next_at.is_some_and(|at| now >= at) {
            self.poll.next_at = Some(now + self.config.poll_interval_ms);
            return Some(SessionTimer::Poll);
        }
        None
    }

    /// Drops every deadline and the current connection. Safe to call more than once.
    pub fn teardown(&mut self) -> Option<ConnectionId> {
        self.disarm_polling();
        self.disconnect()
    }

    fn is_current(&self, id: ConnectionId) -> bool {
        self.current == Some(id)
    }
}
