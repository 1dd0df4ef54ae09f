//! Time-based reconciliation of assignments.
//!
//! The sweep closes out active assignments whose window ended recently:
//! no arrival means a no-show (absence + CANCELLED), an arrival without a
//! departure gets a departure synthesized at the window end (COMPLETED).
//! The status refresh walks open assignments through their window.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::lifecycle::Lifecycle;
use crate::model::{Assignment, AssignmentStatus, CheckInKind, NO_ARRIVAL_REASON};
use crate::store::{CheckInWrite, NewCheckIn, NoShowWrite, Store};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub absences: usize,
    pub departures: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub examined: usize,
    pub changed: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closure {
    Absence,
    Departure,
    Untouched,
}

pub struct Sweep {
    store: Store,
    window: Duration,
}

impl Sweep {
    pub fn new(store: Store, window: Duration) -> Self {
        Self { store, window }
    }

    /// One sweep pass. A failure on one assignment is logged and counted;
    /// the others are still processed.
    pub fn run(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let candidates = self
            .store
            .active_assignments_ended_between(now - self.window, now)?;
        let mut report = SweepReport {
            examined: candidates.len(),
            ..Default::default()
        };

        for assignment in &candidates {
            match self.close_out(assignment, now) {
                Ok(Closure::Absence) => report.absences += 1,
                Ok(Closure::Departure) => report.departures += 1,
                Ok(Closure::Untouched) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(assignment_id = %assignment.id, error = %e, "sweep failed for assignment");
                }
            }
        }

        if report.absences + report.departures + report.failures > 0 {
            info!(
                examined = report.examined,
                absences = report.absences,
                departures = report.departures,
                failures = report.failures,
                "sweep finished"
            );
        }
        Ok(report)
    }

    fn close_out(&self, assignment: &Assignment, now: DateTime<Utc>) -> Result<Closure> {
        let arrival = self
            .store
            .live_check_in(&assignment.id, CheckInKind::Arrival)?;
        if arrival.is_none() {
            return match self
                .store
                .record_no_show(&assignment.id, NO_ARRIVAL_REASON, now)?
            {
                NoShowWrite::Recorded { absence, change } => {
                    info!(
                        assignment_id = %assignment.id,
                        agent_id = %assignment.agent_id,
                        date = %absence.date,
                        change = ?change,
                        "no-show recorded"
                    );
                    Ok(Closure::Absence)
                }
                other => {
                    debug!(assignment_id = %assignment.id, outcome = ?other, "no-show not written");
                    Ok(Closure::Untouched)
                }
            };
        }

        if self
            .store
            .live_check_in(&assignment.id, CheckInKind::Departure)?
            .is_some()
        {
            return Ok(Closure::Untouched);
        }

        let departure = NewCheckIn {
            agent_id: assignment.agent_id.clone(),
            assignment_id: assignment.id.clone(),
            round_id: assignment.round_id.clone(),
            kind: CheckInKind::Departure,
            timestamp: assignment.end,
            latitude: None,
            longitude: None,
            accuracy: None,
        };
        match self
            .store
            .record_check_in(&departure, Lifecycle::on_departure, now)?
        {
            CheckInWrite::Recorded { change, .. } => {
                info!(
                    assignment_id = %assignment.id,
                    agent_id = %assignment.agent_id,
                    at = %assignment.end,
                    change = ?change,
                    "departure synthesized"
                );
                Ok(Closure::Departure)
            }
            other => {
                debug!(assignment_id = %assignment.id, outcome = ?other, "departure not written");
                Ok(Closure::Untouched)
            }
        }
    }

    /// Moves open assignments to the status their window implies.
    ///
    /// An assignment whose window ended inside the sweep window is left for
    /// the sweep to close; a scheduled one is only opened so the sweep sees it.
    pub fn refresh_statuses(&self, now: DateTime<Utc>) -> Result<RefreshReport> {
        let open = self.store.open_assignments()?;
        let mut report = RefreshReport {
            examined: open.len(),
            ..Default::default()
        };

        for assignment in &open {
            let Some(target) = self.refresh_target(assignment, now) else {
                continue;
            };
            match self
                .store
                .compare_and_set_status(&assignment.id, assignment.status, target)
            {
                Ok(true) => {
                    report.changed += 1;
                    debug!(
                        assignment_id = %assignment.id,
                        from = %assignment.status,
                        to = %target,
                        "status refreshed"
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(assignment_id = %assignment.id, error = %e, "status refresh failed");
                }
            }
        }
        Ok(report)
    }

    fn refresh_target(&self, assignment: &Assignment, now: DateTime<Utc>) -> Option<AssignmentStatus> {
        let target = Lifecycle::refresh(assignment, now)?;
        let awaiting_sweep = target == AssignmentStatus::Completed && assignment.end >= now - self.window;
        if !awaiting_sweep {
            return Some(target);
        }
        (assignment.status == AssignmentStatus::Scheduled).then_some(AssignmentStatus::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Absence, CheckInState};
    use crate::store::testing::*;

    fn sweep(store: &Store) -> Sweep {
        Sweep::new(store.clone(), Duration::hours(2))
    }

    fn activate(store: &Store) {
        store
            .compare_and_set_status("AF-1", AssignmentStatus::Scheduled, AssignmentStatus::Active)
            .unwrap();
    }

    fn end() -> DateTime<Utc> {
        assignment("AF-1", "AG-1", "R-1").end
    }

    fn arrive(store: &Store) {
        let at = t0() + Duration::minutes(5);
        let arrival = NewCheckIn {
            agent_id: "AG-1".into(),
            assignment_id: "AF-1".into(),
            round_id: "R-1".into(),
            kind: CheckInKind::Arrival,
            timestamp: at,
            latitude: Some(10.0),
            longitude: Some(10.0),
            accuracy: None,
        };
        store
            .record_check_in(&arrival, Lifecycle::on_arrival, at)
            .unwrap();
    }

    #[test]
    fn expired_assignment_without_arrival_is_a_no_show() {
        let (_dir, store) = seeded_store();
        activate(&store);

        let report = sweep(&store).run(end() + Duration::minutes(90)).unwrap();
        assert_eq!(report.absences, 1);
        assert_eq!(report.departures, 0);

        let absences: Vec<Absence> = store.list_absences().unwrap();
        assert_eq!(absences.len(), 1);
        assert_eq!(absences[0].assignment_id, "AF-1");
        let a = store.find_assignment("AF-1").unwrap().unwrap();
        assert_eq!(a.status, AssignmentStatus::Cancelled);
    }

    #[test]
    fn arrival_without_departure_is_closed_at_window_end() {
        let (_dir, store) = seeded_store();
        arrive(&store);

        let report = sweep(&store).run(end() + Duration::minutes(10)).unwrap();
        assert_eq!(report.departures, 1);

        let departure = store
            .live_check_in("AF-1", CheckInKind::Departure)
            .unwrap()
            .unwrap();
        assert_eq!(departure.timestamp, end());
        assert_eq!(departure.state, CheckInState::Auto);
        let a = store.find_assignment("AF-1").unwrap().unwrap();
        assert_eq!(a.status, AssignmentStatus::Completed);
    }

    #[test]
    fn second_pass_changes_nothing() {
        let (_dir, store) = seeded_store();
        activate(&store);
        let now = end() + Duration::minutes(30);

        sweep(&store).run(now).unwrap();
        let again = sweep(&store).run(now).unwrap();
        assert_eq!(again, SweepReport::default());
        assert_eq!(store.list_absences().unwrap().len(), 1);
    }

    #[test]
    fn assignments_outside_the_window_are_left_alone() {
        let (_dir, store) = seeded_store();
        activate(&store);

        let too_late = sweep(&store).run(end() + Duration::hours(3)).unwrap();
        assert_eq!(too_late.examined, 0);
        let too_early = sweep(&store).run(end() - Duration::minutes(1)).unwrap();
        assert_eq!(too_early.examined, 0);
        assert!(store.list_absences().unwrap().is_empty());
    }

    #[test]
    fn one_broken_assignment_does_not_block_the_rest() {
        let (_dir, store) = seeded_store();
        store.upsert_agent(&crate::model::Agent::new("AG-2", "Yann Moreau")).unwrap();
        let mut second = assignment("AF-2", "AG-2", "R-1");
        second.status = AssignmentStatus::Active;
        store.upsert_assignment(&second).unwrap();
        activate(&store);
        execute_raw(
            &store,
            "INSERT INTO check_in (id, agent_id, assignment_id, round_id, kind, timestamp_ms,
                                   state, created_at_ms)
             VALUES ('C-bad', 'AG-1', 'AF-1', 'R-1', 'arrival', 'not a time', 'auto', 0)",
        );

        let report = sweep(&store).run(end() + Duration::minutes(30)).unwrap();
        assert_eq!(
            report,
            SweepReport {
                examined: 2,
                absences: 1,
                departures: 0,
                failures: 1,
            }
        );
        let a = store.find_assignment("AF-2").unwrap().unwrap();
        assert_eq!(a.status, AssignmentStatus::Cancelled);
        let a = store.find_assignment("AF-1").unwrap().unwrap();
        assert_eq!(a.status, AssignmentStatus::Active);
    }

    #[test]
    fn refresh_opens_and_closes_windows() {
        let (_dir, store) = seeded_store();
        let sweep = sweep(&store);

        let report = sweep.refresh_statuses(t0() + Duration::minutes(1)).unwrap();
        assert_eq!(report.changed, 1);
        let a = store.find_assignment("AF-1").unwrap().unwrap();
        assert_eq!(a.status, AssignmentStatus::Active);

        // Still inside the sweep window: left for the sweep.
        let report = sweep.refresh_statuses(end() + Duration::minutes(30)).unwrap();
        assert_eq!(report.changed, 0);

        let report = sweep.refresh_statuses(end() + Duration::hours(3)).unwrap();
        assert_eq!(report.changed, 1);
        let a = store.find_assignment("AF-1").unwrap().unwrap();
        assert_eq!(a.status, AssignmentStatus::Completed);
    }

    #[test]
    fn refresh_hands_missed_scheduled_assignments_to_the_sweep() {
        let (_dir, store) = seeded_store();
        let now = end() + Duration::minutes(30);
        let sweep = sweep(&store);

        sweep.refresh_statuses(now).unwrap();
        let a = store.find_assignment("AF-1").unwrap().unwrap();
        assert_eq!(a.status, AssignmentStatus::Active);

        let report = sweep.run(now).unwrap();
        assert_eq!(report.absences, 1);
    }

    #[test]
    fn refresh_skips_cancelled() {
        let (_dir, store) = seeded_store();
        store
            .compare_and_set_status("AF-1", AssignmentStatus::Scheduled, AssignmentStatus::Cancelled)
            .unwrap();
        let report = sweep(&store).refresh_statuses(t0()).unwrap();
        assert_eq!(report.examined, 0);
    }
}
