//! Terminal output for the `patrol` binary.
//!
//! Uses `console` styles: green for facts written, yellow for no-ops and
//! skips, red for rejections. Machine-readable payloads are printed as JSON.

use console::Style;
use serde::Serialize;

use crate::attendance::AttendanceOutcome;
use crate::ingest::IngestReceipt;
use crate::model::{Agent, AgentStats, Alert, PositionSample, Severity};
use crate::scheduler::{JobKind, JobSummary};

pub struct Report {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }
}

impl Report {
    pub fn receipt(&self, receipt: &IngestReceipt) {
        let zone = if receipt.in_zone {
            self.green.apply_to("in zone")
        } else {
            self.yellow.apply_to("out of zone")
        };
        println!(
            "  {} sample {} {zone} ({:.1} m, round {})",
            self.green.apply_to("✓"),
            receipt.sample_id,
            receipt.distance_m,
            receipt.round_id.as_deref().unwrap_or("unresolved"),
        );
    }

    pub fn rejected(&self, what: &str, reason: &dyn std::fmt::Display) {
        println!("  {} {what} rejected: {reason}", self.red.apply_to("✗"));
    }

    pub fn outcome(&self, outcome: &AttendanceOutcome) {
        match outcome {
            AttendanceOutcome::NoAssignment => {
                println!("  {} no covering assignment", self.yellow.apply_to("·"));
            }
            AttendanceOutcome::ArrivalRecorded {
                assignment_id,
                change,
                ..
            } => println!(
                "  {} arrival recorded on {assignment_id}{}",
                self.green.apply_to("✓"),
                change.map(|c| format!(" ({c})")).unwrap_or_default()
            ),
            AttendanceOutcome::DepartureRecorded {
                assignment_id,
                anchored_at,
                change,
                ..
            } => println!(
                "  {} departure recorded on {assignment_id} at {anchored_at}{}",
                self.green.apply_to("✓"),
                change.map(|c| format!(" ({c})")).unwrap_or_default()
            ),
            AttendanceOutcome::Skipped {
                assignment_id,
                reason,
            } => println!(
                "  {} {assignment_id}: {reason}",
                self.yellow.apply_to("·")
            ),
        }
    }

    pub fn job(&self, kind: JobKind, summary: &JobSummary) {
        println!("  {} {kind}: {summary}", self.green.apply_to("✓"));
    }

    pub fn action(&self, subject: &str, applied: &str) {
        println!("  {} {subject}: {applied}", self.green.apply_to("✓"));
    }

    pub fn status(&self, stats: &AgentStats, alerts: &[Alert]) {
        println!("{}", self.dim.apply_to("─── Presence ───"));
        println!(
            "  agents {}  present {}  absent {}",
            stats.total,
            self.green.apply_to(stats.present),
            self.yellow.apply_to(stats.absent)
        );
        println!("{}", self.dim.apply_to("─── Active alerts ───"));
        if alerts.is_empty() {
            println!("  none");
        }
        for alert in alerts {
            let style = match alert.severity {
                Severity::Critical => &self.red,
                Severity::Warning => &self.yellow,
            };
            println!(
                "  {} {} {} {}",
                style.apply_to(alert.severity.as_str()),
                self.dim.apply_to(&alert.id),
                alert.title,
                self.dim.apply_to(alert.created_at.format("%Y-%m-%d %H:%M"))
            );
        }
    }

    pub fn agent(&self, agent: &Agent, last: Option<&PositionSample>) {
        println!("{}", self.dim.apply_to("─── Agent ───"));
        self.json(&AgentView { agent, last_position: last });
    }

    pub fn json<T: Serialize>(&self, value: &T) {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    }
}

#[derive(Serialize)]
struct AgentView<'a> {
    #[serde(flatten)]
    agent: &'a Agent,
    last_position: Option<&'a PositionSample>,
}
