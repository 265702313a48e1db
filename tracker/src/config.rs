use std::time::Duration;

/// Marker speed used for every animation, independent of the vehicle's real speed.
pub const MOVEMENT_SPEED_KMH: f64 = 30.0;
const METERS_PER_KM: f64 = 1_000.0;
const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionConfig {
    pub meters_per_ms: f64,
    pub bearing_smoothing: f64,
    /// Degrees of pending rotation above which the marker shows the turning icon.
    pub turn_threshold_deg: f64,
    pub turn_hold_ms: f64,
    /// Upper bound for a single frame's time step (backgrounded or stalled loops).
    pub max_frame_gap_ms: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            meters_per_ms: MOVEMENT_SPEED_KMH * METERS_PER_KM / MS_PER_HOUR,
            bearing_smoothing: 0.1,
            turn_threshold_deg: 15.0,
            turn_hold_ms: 1_000.0,
            max_frame_gap_ms: 250.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraConfig {
    pub driving_zoom: f64,
    pub turning_zoom: f64,
    pub zoom_threshold: f64,
    pub zoom_debounce_ms: f64,
    pub heading_debounce_ms: f64,
    pub heading_mode_tilt: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            driving_zoom: 18.0,
            turning_zoom: 18.0,
            zoom_threshold: 0.5,
            zoom_debounce_ms: 100.0,
            heading_debounce_ms: 100.0,
            heading_mode_tilt: 45.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub reconnect_delay_ms: f64,
    pub poll_interval_ms: f64,
    pub refresh_delay_ms: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5_000.0,
            poll_interval_ms: 10_000.0,
            refresh_delay_ms: 500.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub motion: MotionConfig,
    pub camera: CameraConfig,
    pub session: SessionConfig,
    pub frame_interval: Duration,
    pub route_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            motion: MotionConfig::default(),
            camera: CameraConfig::default(),
            session: SessionConfig::default(),
            frame_interval: Duration::from_millis(16),
            route_timeout: Duration::from_secs(10),
        }
    }
}
