//! Directory fixtures: agents, rounds and assignments loaded from TOML.
//!
//! ```toml
//! [[agents]]
//! id = "AG-1"
//! name = "Amina Benali"
//!
//! [[rounds]]
//! id = "R-1"
//! name = "North gate"
//! latitude = 33.5731
//! longitude = -7.5898
//! radius_m = 50.0
//! status = "active"
//!
//! [[assignments]]
//! id = "AF-1"
//! agent_id = "AG-1"
//! round_id = "R-1"
//! start = "2026-03-02T08:00:00Z"
//! end = "2026-03-02T16:00:00Z"
//! ```
//!
//! The whole fixture is validated before anything is written.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PatrolError, Result};
use crate::model::{Agent, Assignment, AssignmentStatus, Round};
use crate::store::Store;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub agents: Vec<AgentFixture>,
    #[serde(default)]
    pub rounds: Vec<Round>,
    #[serde(default)]
    pub assignments: Vec<AssignmentFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentFixture {
    pub id: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentFixture {
    pub id: String,
    pub agent_id: String,
    pub round_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default = "default_status")]
    pub status: AssignmentStatus,
}

fn default_status() -> AssignmentStatus {
    AssignmentStatus::Scheduled
}

impl From<&AssignmentFixture> for Assignment {
    fn from(f: &AssignmentFixture) -> Self {
        Assignment {
            id: f.id.clone(),
            agent_id: f.agent_id.clone(),
            round_id: f.round_id.clone(),
            start: f.start,
            end: f.end,
            status: f.status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub agents: usize,
    pub rounds: usize,
    pub assignments: usize,
}

impl Fixture {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates every record against itself, the rest of the fixture and
    /// the store, then writes it all.
    pub fn apply(&self, store: &Store) -> Result<SeedReport> {
        let assignments: Vec<Assignment> = self.assignments.iter().map(Assignment::from).collect();
        self.validate(store, &assignments)?;

        for agent in &self.agents {
            let mut record = Agent::new(agent.id.clone(), agent.name.clone());
            record.active = agent.active;
            store.upsert_agent(&record)?;
        }
        for round in &self.rounds {
            store.upsert_round(round)?;
        }
        for assignment in &assignments {
            store.upsert_assignment(assignment)?;
        }

        let report = SeedReport {
            agents: self.agents.len(),
            rounds: self.rounds.len(),
            assignments: assignments.len(),
        };
        info!(
            agents = report.agents,
            rounds = report.rounds,
            assignments = report.assignments,
            "fixture applied"
        );
        Ok(report)
    }

    fn validate(&self, store: &Store, assignments: &[Assignment]) -> Result<()> {
        for round in &self.rounds {
            round.validate().map_err(PatrolError::Validation)?;
        }

        let agents: HashSet<&str> = self.agents.iter().map(|a| a.id.as_str()).collect();
        let rounds: HashSet<&str> = self.rounds.iter().map(|r| r.id.as_str()).collect();

        for (i, a) in assignments.iter().enumerate() {
            a.validate().map_err(PatrolError::Validation)?;

            if !agents.contains(a.agent_id.as_str()) && store.find_agent(&a.agent_id)?.is_none() {
                return Err(PatrolError::not_found("agent", a.agent_id.clone()));
            }
            if !rounds.contains(a.round_id.as_str()) && store.find_round(&a.round_id)?.is_none() {
                return Err(PatrolError::not_found("round", a.round_id.clone()));
            }

            if !a.status.is_open() {
                continue;
            }
            let clash_in_fixture = assignments[..i]
                .iter()
                .any(|b| b.status.is_open() && overlaps(a, b));
            if clash_in_fixture
                || store.agent_has_overlap(&a.agent_id, a.start, a.end, Some(&a.id))?
            {
                return Err(PatrolError::Validation(format!(
                    "agent {} is already assigned from {} to {} (assignment {})",
                    a.agent_id, a.start, a.end, a.id
                )));
            }
        }
        Ok(())
    }
}

fn overlaps(a: &Assignment, b: &Assignment) -> bool {
    a.agent_id == b.agent_id && a.start <= b.end && b.start <= a.end
}
