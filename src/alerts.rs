//! Periodic attendance audits that raise deduplicated alerts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::model::{AlertKind, AlertSubject, Assignment, Round};
use crate::store::{NewAlert, Store};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertReport {
    pub raised: usize,
    /// Candidates already covered by an active alert.
    pub suppressed: usize,
    pub failures: usize,
}

impl AlertReport {
    fn tally(&mut self, raised: Result<bool>, subject: &AlertSubject) {
        match raised {
            Ok(true) => self.raised += 1,
            Ok(false) => self.suppressed += 1,
            Err(e) => {
                self.failures += 1;
                warn!(%subject, error = %e, "alert audit failed");
            }
        }
    }
}

pub struct AlertEngine {
    store: Store,
}

impl AlertEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Runs both audits.
    pub fn run(&self, now: DateTime<Utc>) -> Result<AlertReport> {
        let mut report = AlertReport::default();

        for assignment in self.store.started_assignments_without_arrival(now)? {
            let subject = AlertSubject::AgentRound {
                agent_id: assignment.agent_id.clone(),
                round_id: assignment.round_id.clone(),
            };
            let raised = self.missing_check_in(&assignment, subject.clone(), now);
            report.tally(raised, &subject);
        }

        for round in self.store.overdue_active_rounds(now)? {
            let subject = AlertSubject::Round {
                round_id: round.id.clone(),
            };
            let raised = self.overdue_round(&round, subject.clone(), now);
            report.tally(raised, &subject);
        }

        if report.raised > 0 {
            info!(
                raised = report.raised,
                suppressed = report.suppressed,
                "alerts raised"
            );
        }
        Ok(report)
    }

    fn missing_check_in(
        &self,
        assignment: &Assignment,
        subject: AlertSubject,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let agent = self
            .store
            .find_agent(&assignment.agent_id)?
            .map(|a| a.name)
            .unwrap_or_else(|| assignment.agent_id.clone());
        let round = self.round_name(&assignment.round_id)?;
        let new = NewAlert {
            kind: AlertKind::MissingCheckIn,
            subject,
            title: format!("Missing check-in: {agent}"),
            description: format!(
                "{agent} has not checked in at {round} (assignment {}, started {})",
                assignment.id,
                assignment.start.format("%Y-%m-%d %H:%M UTC")
            ),
        };
        self.raise(&new, now)
    }

    fn overdue_round(&self, round: &Round, subject: AlertSubject, now: DateTime<Utc>) -> Result<bool> {
        let new = NewAlert {
            kind: AlertKind::OverdueRound,
            subject,
            title: format!("Round overdue: {}", round.name),
            description: format!(
                "{} is still active with an open assignment past its end",
                round.name
            ),
        };
        self.raise(&new, now)
    }

    fn raise(&self, new: &NewAlert, now: DateTime<Utc>) -> Result<bool> {
        let alert = self.store.raise_alert(new, now)?;
        if let Some(alert) = &alert {
            info!(
                alert_id = %alert.id,
                kind = alert.kind.as_str(),
                severity = alert.severity.as_str(),
                subject = %alert.subject,
                "alert raised"
            );
        }
        Ok(alert.is_some())
    }

    fn round_name(&self, round_id: &str) -> Result<String> {
        Ok(self
            .store
            .find_round(round_id)?
            .map(|r| r.name)
            .unwrap_or_else(|| round_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Lifecycle;
    use crate::model::{AlertAction, AlertState, CheckInKind, Severity};
    use crate::store::NewCheckIn;
    use crate::store::testing::*;

    use chrono::Duration;

    #[test]
    fn nothing_to_report_before_start() {
        let (_dir, store) = seeded_store();
        let report = AlertEngine::new(store.clone())
            .run(t0() - Duration::minutes(1))
            .unwrap();
        assert_eq!(report, AlertReport::default());
    }

    #[test]
    fn missing_check_in_is_raised_once() {
        let (_dir, store) = seeded_store();
        let engine = AlertEngine::new(store.clone());
        let now = t0() + Duration::minutes(15);

        let first = engine.run(now).unwrap();
        assert_eq!(first.raised, 1);
        let second = engine.run(now + Duration::minutes(1)).unwrap();
        assert_eq!(second.raised, 0);
        assert_eq!(second.suppressed, 1);

        let active = store.list_alerts(Some(AlertState::Active)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].kind, AlertKind::MissingCheckIn);
        assert_eq!(active[0].severity, Severity::Critical);
        assert!(active[0].title.contains("Amina Benali"));
    }

    #[test]
    fn arrival_silences_the_audit() {
        let (_dir, store) = seeded_store();
        let at = t0() + Duration::minutes(2);
        store
            .record_check_in(
                &NewCheckIn {
                    agent_id: "AG-1".into(),
                    assignment_id: "AF-1".into(),
                    round_id: "R-1".into(),
                    kind: CheckInKind::Arrival,
                    timestamp: at,
                    latitude: None,
                    longitude: None,
                    accuracy: None,
                },
                Lifecycle::on_arrival,
                at,
            )
            .unwrap();

        let report = AlertEngine::new(store.clone())
            .run(t0() + Duration::minutes(15))
            .unwrap();
        assert_eq!(report.raised, 0);
    }

    #[test]
    fn overdue_round_raises_warning() {
        let (_dir, store) = seeded_store();
        let end = assignment("AF-1", "AG-1", "R-1").end;
        let report = AlertEngine::new(store.clone())
            .run(end + Duration::minutes(1))
            .unwrap();
        // The missing arrival and the overdue round.
        assert_eq!(report.raised, 2);

        let overdue: Vec<_> = store
            .list_alerts(Some(AlertState::Active))
            .unwrap()
            .into_iter()
            .filter(|a| a.kind == AlertKind::OverdueRound)
            .collect();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].severity, Severity::Warning);
        assert_eq!(
            overdue[0].subject,
            AlertSubject::Round {
                round_id: "R-1".into()
            }
        );
    }

    #[test]
    fn resolved_alert_is_raised_again_while_condition_holds() {
        let (_dir, store) = seeded_store();
        let engine = AlertEngine::new(store.clone());
        let now = t0() + Duration::minutes(15);
        engine.run(now).unwrap();

        let alert = store.list_alerts(None).unwrap().remove(0);
        store
            .apply_alert_action(&alert.id, AlertAction::Resolve, now)
            .unwrap();

        assert_eq!(engine.run(now).unwrap().raised, 1);
        assert_eq!(store.list_alerts(None).unwrap().len(), 2);
    }
}
