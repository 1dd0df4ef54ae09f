//! Great-circle distance and circular zone membership.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Result of placing a point against a zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneClassification {
    pub in_zone: bool,
    pub distance_m: f64,
}

impl ZoneClassification {
    /// The answer given when geodata is missing: outside, at distance zero.
    pub const UNKNOWN: ZoneClassification = ZoneClassification {
        in_zone: false,
        distance_m: 0.0,
    };
}

/// Haversine distance in meters between two points given in degrees.
pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points.
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());

    EARTH_RADIUS_M * c
}

/// Classifies `point` against the zone of `radius_m` meters around `center`.
///
/// Any missing or non-finite input yields [`ZoneClassification::UNKNOWN`];
/// this never fails.
pub fn classify(
    point: Option<GeoPoint>,
    center: Option<GeoPoint>,
    radius_m: Option<f64>,
) -> ZoneClassification {
    let (Some(point), Some(center), Some(radius)) = (point, center, radius_m) else {
        return ZoneClassification::UNKNOWN;
    };
    if !point.is_finite() || !center.is_finite() || !radius.is_finite() {
        return ZoneClassification::UNKNOWN;
    }

    let distance = distance_m(point, center);
    ZoneClassification {
        in_zone: distance <= radius,
        distance_m: distance,
    }
}
