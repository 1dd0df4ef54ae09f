use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geofence::GeoPoint;

/// Where a sample came from, after normalizing client labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    MobileApp,
    Manual,
    System,
}

impl SampleSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleSource::MobileApp => "mobile_app",
            SampleSource::Manual => "manual",
            SampleSource::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mobile_app" => Some(SampleSource::MobileApp),
            "manual" => Some(SampleSource::Manual),
            "system" => Some(SampleSource::System),
            _ => None,
        }
    }

    /// Maps a raw client label onto a source. The mobile client tags samples
    /// with the screen that produced them; all of those are `mobile_app`.
    pub fn normalize(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some("manual") => SampleSource::Manual,
            Some("system") => SampleSource::System,
            _ => SampleSource::MobileApp,
        }
    }
}

/// One stored GPS reading and its zone classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub id: String,
    pub agent_id: String,
    pub round_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub source: SampleSource,
    pub in_zone: bool,
    pub distance_m: f64,
    pub received_at: DateTime<Utc>,
}

impl PositionSample {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}
