//! Great-circle distance and constant-speed ETA estimation

use crate::domain::types::{Location, TransportMode};

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Assumed average speed per transport mode (km/h)
pub fn speed_kmh(mode: TransportMode) -> f64 {
    match mode {
        TransportMode::Walk => 5.0,
        TransportMode::Bus => 25.0,
        TransportMode::Train => 40.0,
        TransportMode::Car => 30.0,
        TransportMode::Unknown => 25.0,
    }
}

/// Haversine distance between two points in meters
pub fn distance(p1: &Location, p2: &Location) -> f64 {
    let lat1 = p1.lat.to_radians();
    let lat2 = p2.lat.to_radians();
    let delta_lat = (p2.lat - p1.lat).to_radians();
    let delta_lng = (p2.lng - p1.lng).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1 for antipodal points
    let a = a.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Estimated travel time in milliseconds at the mode's constant speed.
/// No traffic modelling.
pub fn estimate_arrival(distance_m: f64, mode: TransportMode) -> u64 {
    if distance_m <= 0.0 || !distance_m.is_finite() {
        return 0;
    }
    let hours = (distance_m / 1000.0) / speed_kmh(mode);
    (hours * 3_600_000.0).round() as u64
}

/// Human-readable distance: meters below 1 km, otherwise one decimal of km
pub fn format_distance(distance_m: f64) -> String {
    if distance_m < 1000.0 {
        format!("{:.0} m", distance_m.max(0.0))
    } else {
        format!("{:.1} km", distance_m / 1000.0)
    }
}

/// Human-readable ETA
pub fn format_eta(eta_ms: u64) -> String {
    let minutes = eta_ms / 60_000;
    if minutes < 1 {
        "less than a minute".to_string()
    } else if minutes < 60 {
        format!("{} min", minutes)
    } else {
        let hours = minutes / 60;
        let rest = minutes % 60;
        if rest == 0 {
            format!("{} h", hours)
        } else {
            format!("{} h {} min", hours, rest)
        }
    }
}
