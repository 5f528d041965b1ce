//! # field-geo
//!
//! Shared geographic primitives for the Fieldtrace platform.
//!
//! These types are used by:
//! - `backend`: proximity checks, session distance aggregation, view cones
//! - API payloads: every coordinate on the wire is a [`LatLng`]
//!
//! ## Conventions
//!
//! - Coordinates are WGS-84 degrees, `lat ∈ [-90, 90]`, `lng ∈ [-180, 180]`
//! - All math is over a spherical Earth, R = 6 371 000 m
//! - Bearings are compass degrees in `[0, 360)`, clockwise from true north
//! - Relative angles are normalized into `(-180, 180]`

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters (WGS-84 sphere).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

// ── Coordinate type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are inside their WGS-84 ranges.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

// ── Distance & bearing ────────────────────────────────────────────────────────

/// Great-circle distance between two points in meters (haversine).
pub fn haversine_m(a: LatLng, b: LatLng) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let delta_phi = (b.lat - a.lat).to_radians();
    let delta_lambda = (b.lng - a.lng).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` to `b` in degrees `[0, 360)`.
///
/// Undefined for identical points; callers that care must special-case
/// zero distance (this returns 0.0 there).
pub fn initial_bearing(a: LatLng, b: LatLng) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let delta_lambda = (b.lng - a.lng).to_radians();

    let x = delta_lambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    (x.atan2(y).to_degrees() + 360.0) % 360.0
}

/// Destination point starting at `from`, moving `distance_m` along
/// `bearing_deg`.
pub fn destination(from: LatLng, bearing_deg: f64, distance_m: f64) -> LatLng {
    let phi1 = from.lat.to_radians();
    let lambda1 = from.lng.to_radians();
    let theta = bearing_deg.to_radians();
    let delta = distance_m / EARTH_RADIUS_M;

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    LatLng {
        lat: phi2.to_degrees(),
        lng: normalize_lng(lambda2.to_degrees()),
    }
}

fn normalize_lng(lng: f64) -> f64 {
    let mut l = lng;
    while l > 180.0 {
        l -= 360.0;
    }
    while l < -180.0 {
        l += 360.0;
    }
    l
}

/// Normalize an angle difference into `(-180, 180]`.
pub fn normalize_relative_angle(angle_deg: f64) -> f64 {
    let mut a = angle_deg % 360.0;
    if a > 180.0 {
        a -= 360.0;
    } else if a <= -180.0 {
        a += 360.0;
    }
    a
}

// ── Cone containment ──────────────────────────────────────────────────────────

/// Result of a cone containment test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeCheck {
    pub inside: bool,
    pub distance_m: f64,
    /// Bearing to the point relative to the cone heading, `(-180, 180]`.
    pub relative_angle_deg: f64,
}

/// Test whether `point` falls inside the circular sector with apex at `apex`,
/// centered on `heading_deg`, half-angle `aperture_deg / 2`, radius `range_m`.
///
/// A point at zero distance from the apex is inside by definition (its
/// bearing is undefined).
pub fn point_in_cone(
    apex: LatLng,
    heading_deg: f64,
    aperture_deg: f64,
    range_m: f64,
    point: LatLng,
) -> ConeCheck {
    let distance_m = haversine_m(apex, point);

    if distance_m == 0.0 {
        return ConeCheck {
            inside: true,
            distance_m: 0.0,
            relative_angle_deg: 0.0,
        };
    }

    if distance_m > range_m {
        return ConeCheck {
            inside: false,
            distance_m,
            relative_angle_deg: 0.0,
        };
    }

    let bearing = initial_bearing(apex, point);
    let relative_angle_deg = normalize_relative_angle(bearing - heading_deg);
    let inside = relative_angle_deg.abs() <= aperture_deg / 2.0;

    ConeCheck {
        inside,
        distance_m,
        relative_angle_deg,
    }
}
