use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an assignment.
///
/// Flows through: SCHEDULED → ACTIVE → COMPLETED, with CANCELLED reachable
/// from the first two and left only by a manual re-plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Scheduled => "scheduled",
            AssignmentStatus::Active => "active",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(AssignmentStatus::Scheduled),
            "active" => Some(AssignmentStatus::Active),
            "completed" => Some(AssignmentStatus::Completed),
            "cancelled" => Some(AssignmentStatus::Cancelled),
            _ => None,
        }
    }

    /// Open assignments are the only ones attendance can still be recorded against.
    pub fn is_open(self) -> bool {
        matches!(self, AssignmentStatus::Scheduled | AssignmentStatus::Active)
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Binds one agent to one round for the closed window `[start, end]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub agent_id: String,
    pub round_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: AssignmentStatus,
}

impl Assignment {
    /// Whether `at` falls inside the window, bounds included.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    /// Rejects windows that end before they start.
    pub fn validate(&self) -> Result<(), String> {
        if self.start > self.end {
            return Err(format!(
                "assignment {} starts after it ends ({} > {})",
                self.id, self.start, self.end
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample_assignment() -> Assignment {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        Assignment {
            id: "AF-1".into(),
            agent_id: "AG-1".into(),
            round_id: "R-1".into(),
            start,
            end: start + Duration::hours(8),
            status: AssignmentStatus::Scheduled,
        }
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let a = sample_assignment();
        assert!(a.covers(a.start));
        assert!(a.covers(a.end));
        assert!(!a.covers(a.start - Duration::seconds(1)));
        assert!(!a.covers(a.end + Duration::seconds(1)));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let mut a = sample_assignment();
        a.end = a.start - Duration::minutes(1);
        assert!(a.validate().is_err());
    }

    #[test]
    fn status_codes_parse_back() {
        for status in [
            AssignmentStatus::Scheduled,
            AssignmentStatus::Active,
            AssignmentStatus::Completed,
            AssignmentStatus::Cancelled,
        ] {
            assert_eq!(AssignmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AssignmentStatus::parse("en_cours"), None);
    }

    #[test]
    fn status_display() {
        assert_eq!(AssignmentStatus::Active.to_string(), "ACTIVE");
        assert_eq!(AssignmentStatus::Cancelled.to_string(), "CANCELLED");
    }
}
