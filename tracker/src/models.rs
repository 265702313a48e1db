use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use shared::{
    ApiError, ConnectionStatus, DirectionsRequest, DirectionsResponse, GeoPoint, IconVariant,
    MarkerState, OrientationReading, SessionKey, TrackerSnapshot,
};

/// One accepted position sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub point: GeoPoint,
    /// Strictly increasing across the lifetime of the ingestor.
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
}

/// A coordinate as the upstream services send it: sometimes a number, sometimes a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoordinateValue {
    Number(f64),
    Text(String),
}

impl CoordinateValue {
    /// Parses like a lenient float reader: surrounding whitespace is ignored.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            CoordinateValue::Number(value) => Some(*value),
            CoordinateValue::Text(text) => text.trim().parse::<f64>().ok(),
        }
        .filter(|value| value.is_finite())
    }
}

/// Unvalidated sample as extracted from a transport message or poll response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawFix {
    pub lat: Option<CoordinateValue>,
    pub lng: Option<CoordinateValue>,
}

impl RawFix {
    pub fn from_numbers(lat: f64, lng: f64) -> Self {
        Self {
            lat: Some(CoordinateValue::Number(lat)),
            lng: Some(CoordinateValue::Number(lng)),
        }
    }
}
