use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const NO_ARRIVAL_REASON: &str = "no arrival check-in";

/// A no-show: an assignment that expired without any arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Absence {
    pub id: String,
    pub agent_id: String,
    pub assignment_id: String,
    pub round_id: String,
    pub date: NaiveDate,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}
