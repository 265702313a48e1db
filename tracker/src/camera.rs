use crate::{
    config::CameraConfig,
    geometry::normalize_degrees,
    models::OrientationReading,
};

/// Coalesces the per-frame zoom requests into at most one `set_zoom` per quiet window.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoomDebouncer {
    threshold: f64,
    window_ms: f64,
    current: f64,
    pending: Option<PendingZoom>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingZoom {
    due: f64,
    level: f64,
}

impl ZoomDebouncer {
    pub fn new(initial: f64, threshold: f64, window_ms: f64) -> Self {
        Self {
            threshold,
            window_ms,
            current: initial,
            pending: None,
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(
            config.driving_zoom,
            config.zoom_threshold,
            config.zoom_debounce_ms,
        )
    }

    /// Requests `level`; replaces any request still inside its window.
    pub fn request(&mut self, level: f64, now: f64) {
        self.pending = Some(PendingZoom {
            due: now + self.window_ms,
            level,
        });
    }

    pub fn deadline(&self) -> Option<f64> {
        self.pending.map(|p| p.due)
    }

    /// Returns the zoom to apply once the window elapsed and the change is large enough.
    pub fn fire(&mut self, now: f64) -> Option<f64> {
        let pending = self.pending.filter(|p| now >= p.due)?;
        self.pending = None;
        if (self.current - pending.level).abs() > self.threshold {
            self.current = pending.level;
            Some(pending.level)
        } else {
            None
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraCommand {
    Heading(f64),
    Tilt(f64),
}

/// Compass mode: rotates the camera with the device heading.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadingControl {
    debounce_ms: f64,
    active_tilt: f64,
    active: bool,
    heading_degrees: f64,
    pending: Option<(f64, f64)>,
}

impl HeadingControl {
    pub fn new(debounce_ms: f64, active_tilt: f64) -> Self {
        Self {
            debounce_ms,
            active_tilt,
            active: false,
            heading_degrees: 0.0,
            pending: None,
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(config.heading_debounce_ms, config.heading_mode_tilt)
    }

    /// Flips compass mode. Both directions reset the camera heading to north.
    pub fn toggle(&mut self) -> Vec<CameraCommand> {
        self.active = !self.active;
        self.heading_degrees = 0.0;
        self.pending = None;
        vec![CameraCommand::Heading(0.0), CameraCommand::Tilt(self.tilt())]
    }

    /// Handles one orientation reading. Returns `true` when `heading_degrees` changed.
    pub fn on_orientation(&mut self, reading: OrientationReading, now: f64) -> bool {
        if !self.active {
            return false;
        }
        let Some(alpha) = reading.alpha.filter(|a| a.is_finite()) else {
            return false;
        };
        let heading = normalize_degrees(
            reading
                .compass_heading
                .filter(|h| h.is_finite())
                .unwrap_or(alpha),
        );
        self.heading_degrees = heading;
        self.pending = Some((now + self.debounce_ms, heading));
        true
    }

    pub fn deadline(&self) -> Option<f64> {
        self.pending.map(|(due, _)| due)
    }

    /// Heading to push to the camera once the debounce window elapsed.
    pub fn fire(&mut self, now: f64) -> Option<f64> {
        let (due, heading) = self.pending?;
        if now < due {
            return None;
        }
        self.pending = None;
        Some(heading)
    }

    /// Stops listening to orientation readings and drops any pending camera update.
    pub fn detach(&mut self) {
        self.active = false;
        self.pending = None;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn heading_degrees(&self) -> f64 {
        self.heading_degrees
    }

    pub fn tilt(&self) -> f64 {
        if self.active { self.active_tilt } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_applies_after_quiet_window() {
        let mut zoom = ZoomDebouncer::new(15.0, 0.5, 100.0);
        zoom.request(18.0, 0.0);
        zoom.request(18.0, 16.0);
        assert_eq!(zoom.deadline(), Some(116.0));
        assert_eq!(zoom.fire(100.0), None);
        assert_eq!(zoom.fire(116.0), Some(18.0));
        assert_eq!(zoom.current(), 18.0);
        assert_eq!(zoom.deadline(), None);
    }

    #[test]
    fn small_zoom_changes_are_ignored() {
        let mut zoom = ZoomDebouncer::new(18.0, 0.5, 100.0);
        zoom.request(18.4, 0.0);
        assert_eq!(zoom.fire(200.0), None);
        assert_eq!(zoom.current(), 18.0);
        assert_eq!(zoom.deadline(), None);
    }

    #[test]
    fn heading_mode_toggle_commands() {
        let mut heading = HeadingControl::new(100.0, 45.0);
        assert_eq!(
            heading.toggle(),
            vec![CameraCommand::Heading(0.0), CameraCommand::Tilt(45.0)]
        );
        assert!(heading.is_active());
        assert_eq!(
            heading.toggle(),
            vec![CameraCommand::Heading(0.0), CameraCommand::Tilt(0.0)]
        );
        assert!(!heading.is_active());
    }

    #[test]
    fn orientation_ignored_while_inactive() {
        let mut heading = HeadingControl::new(100.0, 45.0);
        let reading = OrientationReading {
            alpha: Some(90.0),
            compass_heading: None,
        };
        assert!(!heading.on_orientation(reading, 0.0));
        assert_eq!(heading.deadline(), None);
    }

    #[test]
    fn compass_heading_wins_and_is_debounced() {
        let mut heading = HeadingControl::new(100.0, 45.0);
        heading.toggle();
        let reading = OrientationReading {
            alpha: Some(90.0),
            compass_heading: Some(270.0),
        };
        assert!(heading.on_orientation(reading, 0.0));
        assert_eq!(heading.heading_degrees(), 270.0);

        let reading = OrientationReading {
            alpha: Some(10.0),
            compass_heading: None,
        };
        heading.on_orientation(reading, 50.0);
        assert_eq!(heading.fire(100.0), None);
        assert_eq!(heading.fire(150.0), Some(10.0));
        assert_eq!(heading.fire(300.0), None);
    }

    #[test]
    fn reading_without_alpha_is_dropped() {
        let mut heading = HeadingControl::new(100.0, 45.0);
        heading.toggle();
        assert!(!heading.on_orientation(OrientationReading::default(), 0.0));
    }

    #[test]
    fn detach_clears_pending_update() {
        let mut heading = HeadingControl::new(100.0, 45.0);
        heading.toggle();
        heading.on_orientation(
            OrientationReading {
                alpha: Some(45.0),
                compass_heading: None,
            },
            0.0,
        );
        heading.detach();
        assert_eq!(heading.deadline(), None);
        assert!(!heading.is_active());
        assert_eq!(heading.tilt(), 0.0);
    }
}
