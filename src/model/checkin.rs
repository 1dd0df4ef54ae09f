use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInKind {
    Arrival,
    Departure,
}

impl CheckInKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckInKind::Arrival => "arrival",
            CheckInKind::Departure => "departure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "arrival" => Some(CheckInKind::Arrival),
            "departure" => Some(CheckInKind::Departure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInState {
    Auto,
    Confirmed,
    Cancelled,
}

impl CheckInState {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckInState::Auto => "auto",
            CheckInState::Confirmed => "confirmed",
            CheckInState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(CheckInState::Auto),
            "confirmed" => Some(CheckInState::Confirmed),
            "cancelled" => Some(CheckInState::Cancelled),
            _ => None,
        }
    }

    pub fn is_live(self) -> bool {
        self != CheckInState::Cancelled
    }
}

/// Operator actions on a recorded check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInAction {
    Confirm,
    Cancel,
}

impl CheckInAction {
    /// The state `action` leads to from `state`, if the move is allowed.
    ///
    /// - `Confirm` only promotes an automatic check-in.
    /// - `Cancel` retires any live check-in; a cancelled one stays cancelled.
    pub fn target(self, state: CheckInState) -> Option<CheckInState> {
        match (self, state) {
            (CheckInAction::Confirm, CheckInState::Auto) => Some(CheckInState::Confirmed),
            (CheckInAction::Cancel, CheckInState::Auto | CheckInState::Confirmed) => {
                Some(CheckInState::Cancelled)
            }
            _ => None,
        }
    }
}

/// An arrival or departure against one assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: String,
    pub agent_id: String,
    pub assignment_id: String,
    pub round_id: String,
    pub kind: CheckInKind,
    pub timestamp: DateTime<Utc>,
    pub state: CheckInState,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub created_at: DateTime<Utc>,
}
