//! Great-circle geometry.
//!
//! Distances between epicenters and stations, in degrees or kilometers.

use std::f64::consts::PI;

/// Earth radius in kilometers for haversine calculations.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in degrees of arc.
#[must_use]
pub fn distance_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1 * PI / 180.0;
    let lat2_rad = lat2 * PI / 180.0;
    let delta_lat = (lat2 - lat1) * PI / 180.0;
    let delta_lon = (lon2 - lon1) * PI / 180.0;

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair above 1 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    c * 180.0 / PI
}

/// Convert degrees of arc to kilometers along the surface.
#[must_use]
pub fn deg_to_km(deg: f64) -> f64 {
    deg * EARTH_RADIUS_KM * PI / 180.0
}

/// Great-circle distance between two points in kilometers.
#[must_use]
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    deg_to_km(distance_deg(lat1, lon1, lat2, lon2))
}
