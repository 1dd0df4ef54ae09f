use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    /// An open assignment whose window started without an arrival.
    #[serde(rename = "non_pointage")]
    MissingCheckIn,
    /// An active round with an open assignment past its end.
    #[serde(rename = "round_en_retard")]
    OverdueRound,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::MissingCheckIn => "non_pointage",
            AlertKind::OverdueRound => "round_en_retard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "non_pointage" => Some(AlertKind::MissingCheckIn),
            "round_en_retard" => Some(AlertKind::OverdueRound),
            _ => None,
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            AlertKind::MissingCheckIn => Severity::Critical,
            AlertKind::OverdueRound => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "critique")]
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critique",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warning" => Some(Severity::Warning),
            "critique" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Active,
    Resolved,
    Ignored,
}

impl AlertState {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertState::Active => "active",
            AlertState::Resolved => "resolved",
            AlertState::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AlertState::Active),
            "resolved" => Some(AlertState::Resolved),
            "ignored" => Some(AlertState::Ignored),
            _ => None,
        }
    }
}

/// Operator actions on an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    Resolve,
    Ignore,
    Reopen,
}

impl AlertAction {
    pub fn target(self, state: AlertState) -> Option<AlertState> {
        match (self, state) {
            (AlertAction::Resolve, AlertState::Active) => Some(AlertState::Resolved),
            (AlertAction::Ignore, AlertState::Active) => Some(AlertState::Ignored),
            (AlertAction::Reopen, AlertState::Resolved | AlertState::Ignored) => {
                Some(AlertState::Active)
            }
            _ => None,
        }
    }
}

/// What an alert is about. Its key, together with the alert kind, forms the
/// dedup key of active alerts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertSubject {
    AgentRound { agent_id: String, round_id: String },
    Round { round_id: String },
}

impl AlertSubject {
    pub fn subject_type(&self) -> &'static str {
        match self {
            AlertSubject::AgentRound { .. } => "agent_round",
            AlertSubject::Round { .. } => "round",
        }
    }

    pub fn key(&self) -> String {
        match self {
            AlertSubject::AgentRound { agent_id, round_id } => format!("{agent_id}@{round_id}"),
            AlertSubject::Round { round_id } => round_id.clone(),
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        match self {
            AlertSubject::AgentRound { agent_id, .. } => Some(agent_id),
            AlertSubject::Round { .. } => None,
        }
    }

    pub fn round_id(&self) -> &str {
        match self {
            AlertSubject::AgentRound { round_id, .. } | AlertSubject::Round { round_id } => round_id,
        }
    }
}

impl fmt::Display for AlertSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type(), self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub subject: AlertSubject,
    pub state: AlertState,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_carry_their_severity() {
        assert_eq!(AlertKind::MissingCheckIn.severity(), Severity::Critical);
        assert_eq!(AlertKind::OverdueRound.severity(), Severity::Warning);
        assert_eq!(AlertKind::MissingCheckIn.as_str(), "non_pointage");
        assert_eq!(Severity::Critical.as_str(), "critique");
    }

    #[test]
    fn only_closed_alerts_reopen() {
        assert_eq!(AlertAction::Reopen.target(AlertState::Active), None);
        assert_eq!(
            AlertAction::Reopen.target(AlertState::Ignored),
            Some(AlertState::Active)
        );
        assert_eq!(AlertAction::Resolve.target(AlertState::Ignored), None);
    }

    #[test]
    fn subject_keys_separate_agents() {
        let a = AlertSubject::AgentRound {
            agent_id: "AG-1".into(),
            round_id: "R-1".into(),
        };
        let b = AlertSubject::AgentRound {
            agent_id: "AG-2".into(),
            round_id: "R-1".into(),
        };
        assert_ne!(a.key(), b.key());
        assert_eq!(a.to_string(), "agent_round:AG-1@R-1");
        assert_eq!(AlertSubject::Round { round_id: "R-1".into() }.key(), "R-1");
    }
}
