use std::sync::{Arc, Mutex};

use crate::models::{GeoPoint, IconVariant};

/// Drawing primitives of the map the marker lives on.
pub trait MapSurface: Send {
    fn set_center(&mut self, center: GeoPoint);
    fn set_zoom(&mut self, level: f64);
    fn set_marker(&mut self, position: GeoPoint, rotation: f64, icon: IconVariant);
    fn set_camera_heading(&mut self, degrees: f64);
    fn set_tilt(&mut self, degrees: f64);
}

/// Surface for headless runs: every call becomes a trace event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSurface;

impl MapSurface for TracingSurface {
    fn set_center(&mut self, center: GeoPoint) {
        tracing::trace!(lat = center.lat, lng = center.lng, "camera center");
    }

    fn set_zoom(&mut self, level: f64) {
        tracing::debug!(level, "camera zoom");
    }

    fn set_marker(&mut self, position: GeoPoint, rotation: f64, icon: IconVariant) {
        tracing::trace!(
            lat = position.lat,
            lng = position.lng,
            rotation,
            ?icon,
            "marker"
        );
    }

    fn set_camera_heading(&mut self, degrees: f64) {
        tracing::debug!(degrees, "camera heading");
    }

    fn set_tilt(&mut self, degrees: f64) {
        tracing::debug!(degrees, "camera tilt");
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceCall {
    Center(GeoPoint),
    Zoom(f64),
    Marker {
        position: GeoPoint,
        rotation: f64,
        icon: IconVariant,
    },
    CameraHeading(f64),
    Tilt(f64),
}

/// Surface that keeps every call; clones share the same log.
#[derive(Debug, Default, Clone)]
pub struct RecordingSurface {
    calls: Arc<Mutex<Vec<SurfaceCall>>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn centers(&self) -> Vec<GeoPoint> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Center(center) => Some(center),
                _ => None,
            })
            .collect()
    }

    pub fn markers(&self) -> Vec<(GeoPoint, f64, IconVariant)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Marker {
                    position,
                    rotation,
                    icon,
                } => Some((position, rotation, icon)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn push(&self, call: SurfaceCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl MapSurface for RecordingSurface {
    fn set_center(&mut self, center: GeoPoint) {
        self.push(SurfaceCall::Center(center));
    }

    fn set_zoom(&mut self, level: f64) {
        self.push(SurfaceCall::Zoom(level));
    }

    fn set_marker(&mut self, position: GeoPoint, rotation: f64, icon: IconVariant) {
        self.push(SurfaceCall::Marker {
            position,
            rotation,
            icon,
        });
    }

    fn set_camera_heading(&mut self, degrees: f64) {
        self.push(SurfaceCall::CameraHeading(degrees));
    }

    fn set_tilt(&mut self, degrees: f64) {
        self.push(SurfaceCall::Tilt(degrees));
    }
}
