use crate::models::GeoPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Initial great-circle bearing from `a` to `b`, in degrees `[0, 360)`.
pub fn bearing(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let y = dlng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();
    normalize_degrees(y.atan2(x).to_degrees())
}

/// Haversine distance in meters.
pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlng = (dlng / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Linear interpolation between two points, `t` clamped to `[0, 1]`.
pub fn lerp_point(a: GeoPoint, b: GeoPoint, t: f64) -> GeoPoint {
    a.interpolate(b, t.clamp(0.0, 1.0))
}

/// Signed shortest rotation from `current` to `target`, in `[-180, 180)`.
pub fn angle_delta(current: f64, target: f64) -> f64 {
    (target - current + 540.0).rem_euclid(360.0) - 180.0
}

/// Moves `current` toward `target` by `factor` of the shortest angular difference.
pub fn smooth_bearing(current: f64, target: f64, factor: f64) -> f64 {
    let factor = factor.clamp(0.0, 1.0);
    normalize_degrees(current + angle_delta(current, target) * factor)
}

pub fn normalize_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}
