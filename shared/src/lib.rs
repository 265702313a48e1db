use serde::{Deserialize, Serialize};

/// A WGS84 position. The only coordinate type used across the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Camera position used while no location is known.
    pub const UNKNOWN: GeoPoint = GeoPoint { lat: 0.0, lng: 0.0 };

    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Component-wise linear interpolation. Good enough for the short hops between fixes.
    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self {
            lat: self.lat + (other.lat - self.lat) * t,
            lng: self.lng + (other.lng - self.lng) * t,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

/// Identifies the trip being followed; both parts default to `"0"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    #[serde(default = "default_id")]
    pub trip_id: String,
    #[serde(default = "default_id")]
    pub share_id: String,
}

impl SessionKey {
    pub fn new(trip_id: impl Into<String>, share_id: impl Into<String>) -> Self {
        Self {
            trip_id: trip_id.into(),
            share_id: share_id.into(),
        }
    }
}

impl Default for SessionKey {
    fn default() -> Self {
        Self::new(default_id(), default_id())
    }
}

fn default_id() -> String {
    "0".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconVariant {
    #[default]
    Driving,
    Turning,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerState {
    pub position: GeoPoint,
    /// Degrees clockwise from north, in `[0, 360)`.
    pub rotation: f64,
    pub icon: IconVariant,
}

/// Everything the rendering layer needs to draw one state of the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub session: SessionKey,
    pub status: ConnectionStatus,
    pub trip_closed: bool,
    pub center: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<MarkerState>,
    pub turning: bool,
    pub zoom: f64,
    pub heading_mode: bool,
    pub heading_degrees: f64,
    pub tilt: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
    pub awaiting_location: bool,
}

impl TrackerSnapshot {
    pub fn initial(session: SessionKey, center: GeoPoint, zoom: f64) -> Self {
        Self {
            session,
            status: ConnectionStatus::Connecting,
            trip_closed: false,
            center,
            marker: None,
            turning: false,
            zoom,
            heading_mode: false,
            heading_degrees: 0.0,
            tilt: 0.0,
            last_update: None,
            awaiting_location: center.is_unknown(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    Driving,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionsRequest {
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub mode: TravelMode,
    pub alternatives: bool,
}

impl DirectionsRequest {
    pub fn driving(origin: GeoPoint, destination: GeoPoint) -> Self {
        Self {
            origin,
            destination,
            mode: TravelMode::Driving,
            alternatives: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionsResponse {
    pub status: String,
    #[serde(default)]
    pub path: Vec<GeoPoint>,
}

impl DirectionsResponse {
    pub const STATUS_OK: &'static str = "OK";

    pub fn is_ok(&self) -> bool {
        self.status == Self::STATUS_OK
    }
}

/// Heading reading pushed by the device-orientation source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationReading {
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub compass_heading: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}
