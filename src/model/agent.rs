use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived presence of an agent, recomputed from its latest live check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Present,
    Absent,
}

impl Presence {
    pub fn as_str(self) -> &'static str {
        match self {
            Presence::Present => "present",
            Presence::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(Presence::Present),
            "absent" => Some(Presence::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub presence: Presence,
    pub current_assignment_id: Option<String>,
    pub last_check_in_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// A freshly registered agent, absent until its first arrival.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active: true,
            presence: Presence::Absent,
            current_assignment_id: None,
            last_check_in_at: None,
        }
    }
}

/// Head count over active agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub total: u64,
    pub present: u64,
    pub absent: u64,
}
