use serde::{Deserialize, Serialize};

use crate::geofence::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Planned,
    Active,
    Completed,
}

impl RoundStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoundStatus::Planned => "planned",
            RoundStatus::Active => "active",
            RoundStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planned" => Some(RoundStatus::Planned),
            "active" => Some(RoundStatus::Active),
            "completed" => Some(RoundStatus::Completed),
            _ => None,
        }
    }
}

/// A named circular zone an agent must patrol.
///
/// Geodata is optional: a round without a center or radius is still a valid
/// round, it just never classifies a sample as in-zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub name: String,
    pub site_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_m: Option<f64>,
    pub status: RoundStatus,
}

impl Round {
    pub fn center(&self) -> Option<GeoPoint> {
        Some(GeoPoint::new(self.latitude?, self.longitude?))
    }

    /// Checks coordinate ranges and radius sign for the geodata that is present.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(format!("round {}: latitude {lat} out of range", self.id));
            }
        }
        if let Some(lon) = self.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(format!("round {}: longitude {lon} out of range", self.id));
            }
        }
        if let Some(radius) = self.radius_m {
            if radius.is_nan() || radius < 0.0 {
                return Err(format!("round {}: radius {radius} must be positive", self.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_round() -> Round {
        Round {
            id: "R-1".into(),
            name: "North gate".into(),
            site_id: Some("S-1".into()),
            latitude: Some(10.0),
            longitude: Some(10.0),
            radius_m: Some(50.0),
            status: RoundStatus::Active,
        }
    }

    #[test]
    fn center_requires_both_coordinates() {
        let mut round = sample_round();
        assert!(round.center().is_some());
        round.longitude = None;
        assert!(round.center().is_none());
    }

    #[test]
    fn validate_rejects_bad_geodata() {
        let mut round = sample_round();
        assert!(round.validate().is_ok());

        round.latitude = Some(91.0);
        assert!(round.validate().is_err());

        round = sample_round();
        round.radius_m = Some(-1.0);
        assert!(round.validate().is_err());

        round = sample_round();
        round.radius_m = Some(f64::NAN);
        assert!(round.validate().is_err());
    }

    #[test]
    fn missing_geodata_is_valid() {
        let mut round = sample_round();
        round.latitude = None;
        round.longitude = None;
        round.radius_m = None;
        assert!(round.validate().is_ok());
    }
}
