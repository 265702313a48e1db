//! Marker animation between fixes.
//!
//! The animator owns the single live [`AnimationState`]. A run either follows a
//! [`WaypointPath`] segment by segment or interpolates a straight line; both advance at a
//! constant speed so that the marker moves at the same visual pace whatever the fix
//! cadence. Time is always passed in explicitly (milliseconds on a monotonic clock), so
//! every behaviour here can be driven deterministically from tests.

use crate::{
    config::MotionConfig,
    geometry::{angle_delta, bearing, distance_m, lerp_point, smooth_bearing},
    models::{Fix, GeoPoint, IconVariant},
    route::WaypointPath,
};

/// Output of one animation tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub position: GeoPoint,
    pub bearing: f64,
    pub turning: bool,
    pub icon: IconVariant,
    /// Set on the frame that completes a run: the fix the run was heading to.
    pub finished: Option<Fix>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    Idle,
    FollowingRoute { index: usize, waypoints: usize },
    FollowingLine { progress: f64 },
}

#[derive(Debug, Clone, PartialEq)]
enum Motion {
    Idle,
    FollowingRoute { path: Vec<GeoPoint>, index: usize },
    FollowingLine { start: GeoPoint, end: GeoPoint, total_m: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnimationState {
    pub position: Option<GeoPoint>,
    pub smoothed_bearing: f64,
    pub target_bearing: f64,
    /// Meters covered inside the current segment (or along the whole line).
    pub traveled_m: f64,
    pub turning: bool,
    pub last_frame_ms: f64,
}

/// Keeps the turning icon up for a minimum time after the last sharp heading change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnIndicator {
    threshold_deg: f64,
    hold_ms: f64,
    hold_until: Option<f64>,
}

impl TurnIndicator {
    pub fn new(threshold_deg: f64, hold_ms: f64) -> Self {
        Self {
            threshold_deg,
            hold_ms,
            hold_until: None,
        }
    }

    /// Feeds the pending rotation of this frame and returns whether the marker is turning.
    pub fn observe(&mut self, pending_rotation_deg: f64, now: f64) -> bool {
        if pending_rotation_deg.abs() > self.threshold_deg {
            self.hold_until = Some(now + self.hold_ms);
        }
        self.is_active(now)
    }

    pub fn is_active(&self, now: f64) -> bool {
        self.hold_until.is_some_and(|until| now < until)
    }

    pub fn deadline(&self) -> Option<f64> {
        self.hold_until
    }

    /// Drops an elapsed hold. Returns `true` when the indicator just switched off.
    pub fn expire(&mut self, now: f64) -> bool {
        match self.hold_until {
            Some(until) if now >= until => {
                self.hold_until = None;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.hold_until = None;
    }
}

pub struct Animator {
    config: MotionConfig,
    motion: Motion,
    target: Option<Fix>,
    state: AnimationState,
    turn: TurnIndicator,
}

impl Animator {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            motion: Motion::Idle,
            target: None,
            state: AnimationState::default(),
            turn: TurnIndicator::new(config.turn_threshold_deg, config.turn_hold_ms),
        }
    }

    /// Follows `path` toward `target`, replacing any run in progress.
    pub fn start_route(&mut self, path: WaypointPath, target: Fix, now: f64) {
        let path = path.into_points();
        tracing::debug!(waypoints = path.len(), "animating along route");
        self.begin(now, target);
        self.motion = Motion::FollowingRoute { path, index: 0 };
    }

    /// Interpolates a straight line from `start` to `target`, replacing any run in progress.
    pub fn start_line(&mut self, start: GeoPoint, target: Fix, now: f64) {
        let end = target.point;
        let total_m = distance_m(start, end);
        tracing::debug!(distance_m = total_m, "animating straight line");
        self.begin(now, target);
        if total_m > 0.0 {
            self.state.target_bearing = bearing(start, end);
        }
        self.motion = Motion::FollowingLine {
            start,
            end,
            total_m,
        };
    }

    fn begin(&mut self, now: f64, target: Fix) {
        self.target = Some(target);
        self.state.traveled_m = 0.0;
        self.state.last_frame_ms = now;
    }

    /// Abandons the current run, leaving the marker where it is. Returns whether a run
    /// was actually in progress.
    pub fn cancel(&mut self) -> bool {
        let was_active = self.is_active();
        self.motion = Motion::Idle;
        self.target = None;
        self.state.traveled_m = 0.0;
        was_active
    }

    /// Forgets everything, including position, heading and the turn hold.
    pub fn reset(&mut self) {
        self.cancel();
        self.state = AnimationState::default();
        self.turn.clear();
    }

    /// Places the marker without animating (first fix of a session).
    pub fn snap_to(&mut self, point: GeoPoint) {
        self.cancel();
        self.state.position = Some(point);
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.motion, Motion::Idle)
    }

    pub fn phase(&self) -> Phase {
        match &self.motion {
            Motion::Idle => Phase::Idle,
            Motion::FollowingRoute { path, index } => Phase::FollowingRoute {
                index: *index,
                waypoints: path.len(),
            },
            Motion::FollowingLine { total_m, .. } => Phase::FollowingLine {
                progress: line_progress(self.state.traveled_m, *total_m),
            },
        }
    }

    pub fn state(&self) -> &AnimationState {
        &self.state
    }

    pub fn icon(&self) -> IconVariant {
        icon_for(self.state.turning)
    }

    pub fn turn_deadline(&self) -> Option<f64> {
        self.turn.deadline()
    }

    /// Switches the icon back once the turn hold elapsed. Only yields a frame while idle;
    /// a running animation picks the change up on its next tick.
    pub fn expire_turn(&mut self, now: f64) -> Option<Frame> {
        if !self.turn.expire(now) {
            return None;
        }
        self.state.turning = false;
        if self.is_active() {
            return None;
        }
        let position = self.state.position?;
        Some(Frame {
            position,
            bearing: self.state.smoothed_bearing,
            turning: false,
            icon: IconVariant::Driving,
            finished: None,
        })
    }

    /// Advances the run to `now`. Returns `None` while idle.
    pub fn tick(&mut self, now: f64) -> Option<Frame> {
        let dt = (now - self.state.last_frame_ms).clamp(0.0, self.config.max_frame_gap_ms);
        self.state.last_frame_ms = now;

        let state = &mut self.state;
        let (position, done) = match &mut self.motion {
            Motion::Idle => return None,
            Motion::FollowingRoute { path, index } => {
                state.traveled_m += dt * self.config.meters_per_ms;
                advance_along(path, index, state)
            }
            Motion::FollowingLine {
                start,
                end,
                total_m,
            } => {
                state.traveled_m += dt * self.config.meters_per_ms;
                let progress = line_progress(state.traveled_m, *total_m);
                (lerp_point(*start, *end, progress), progress >= 1.0)
            }
        };

        let pending_rotation = angle_delta(self.state.smoothed_bearing, self.state.target_bearing);
        let turning = self.turn.observe(pending_rotation, now);
        self.state.smoothed_bearing = smooth_bearing(
            self.state.smoothed_bearing,
            self.state.target_bearing,
            self.config.bearing_smoothing,
        );
        self.state.position = Some(position);
        self.state.turning = turning;

        let finished = if done {
            self.motion = Motion::Idle;
            self.state.traveled_m = 0.0;
            self.target.take()
        } else {
            None
        };

        Some(Frame {
            position,
            bearing: self.state.smoothed_bearing,
            turning,
            icon: icon_for(turning),
            finished,
        })
    }
}

/// Moves the route cursor past every segment already covered. Zero-length segments are
/// skipped without touching the target bearing.
fn advance_along(path: &[GeoPoint], index: &mut usize, state: &mut AnimationState) -> (GeoPoint, bool) {
    let last = path.len() - 1;
    while *index < last {
        let from = path[*index];
        let to = path[*index + 1];
        let segment_m = distance_m(from, to);
        if segment_m > 0.0 {
            state.target_bearing = bearing(from, to);
            if state.traveled_m < segment_m {
                return (lerp_point(from, to, state.traveled_m / segment_m), false);
            }
        }
        state.traveled_m -= segment_m;
        *index += 1;
    }
    (path[last], true)
}

fn line_progress(traveled_m: f64, total_m: f64) -> f64 {
    if total_m > 0.0 {
        (traveled_m / total_m).min(1.0)
    } else {
        1.0
    }
}

fn icon_for(turning: bool) -> IconVariant {
    if turning {
        IconVariant::Turning
    } else {
        IconVariant::Driving
    }
}
