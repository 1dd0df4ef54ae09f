//! Real-time attendance: turns one classified sample into at most one
//! check-in and at most one assignment transition.
//!
//! Every decision is re-derived from stored state, so processing the same
//! sample twice (or two equivalent samples at once) is safe.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::{PatrolError, Result};
use crate::lifecycle::{Lifecycle, StatusChange, StatusRule};
use crate::model::{Assignment, AssignmentStatus, CheckInKind, PositionSample};
use crate::store::{CheckInWrite, NewCheckIn, Store};

/// Why a sample produced no attendance fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// In zone, but the assignment already has a live arrival.
    AlreadyArrived,
    /// In zone, but outside the assignment window.
    OutsideWindow,
    /// Out of zone with nothing to depart from.
    NoArrival,
    /// Out of zone, but the assignment already has a live departure.
    AlreadyDeparted,
    /// Out of zone with no in-zone sample inside the debounce window.
    NoAnchor,
    /// The assignment was closed between lookup and write.
    AssignmentClosed(AssignmentStatus),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyArrived => write!(f, "arrival already recorded"),
            SkipReason::OutsideWindow => write!(f, "sample outside assignment window"),
            SkipReason::NoArrival => write!(f, "no arrival to depart from"),
            SkipReason::AlreadyDeparted => write!(f, "departure already recorded"),
            SkipReason::NoAnchor => write!(f, "no in-zone anchor in debounce window"),
            SkipReason::AssignmentClosed(status) => write!(f, "assignment closed ({status})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceOutcome {
    /// No open assignment covers the sample.
    NoAssignment,
    ArrivalRecorded {
        assignment_id: String,
        check_in_id: String,
        change: Option<StatusChange>,
    },
    DepartureRecorded {
        assignment_id: String,
        check_in_id: String,
        /// The last in-zone moment, used as the departure time.
        anchored_at: DateTime<Utc>,
        change: Option<StatusChange>,
    },
    Skipped {
        assignment_id: String,
        reason: SkipReason,
    },
}

impl AttendanceOutcome {
    fn skipped(assignment: &Assignment, reason: SkipReason) -> Self {
        AttendanceOutcome::Skipped {
            assignment_id: assignment.id.clone(),
            reason,
        }
    }
}

pub struct AttendanceEngine {
    store: Store,
    debounce: Duration,
}

impl AttendanceEngine {
    pub fn new(store: Store, debounce: Duration) -> Self {
        Self { store, debounce }
    }

    /// Processes a stored, classified sample.
    pub fn process_sample(&self, sample_id: &str, now: DateTime<Utc>) -> Result<AttendanceOutcome> {
        let sample = self
            .store
            .find_sample(sample_id)?
            .ok_or_else(|| PatrolError::not_found("sample", sample_id))?;

        let Some(assignment) = self.store.covering_assignment(
            &sample.agent_id,
            sample.round_id.as_deref(),
            sample.timestamp,
        )?
        else {
            debug!(sample_id, agent_id = %sample.agent_id, "no covering assignment");
            return Ok(AttendanceOutcome::NoAssignment);
        };

        if sample.round_id.is_none() {
            self.store.backfill_sample_round(&sample.id, &assignment.round_id)?;
        }

        let outcome = if sample.in_zone {
            self.on_in_zone(&sample, &assignment, now)?
        } else {
            self.on_out_of_zone(&sample, &assignment, now)?
        };
        log_outcome(&sample, &outcome);
        Ok(outcome)
    }

    fn on_in_zone(
        &self,
        sample: &PositionSample,
        assignment: &Assignment,
        now: DateTime<Utc>,
    ) -> Result<AttendanceOutcome> {
        if self
            .store
            .live_check_in(&assignment.id, CheckInKind::Arrival)?
            .is_some()
        {
            return Ok(AttendanceOutcome::skipped(assignment, SkipReason::AlreadyArrived));
        }
        if !assignment.covers(sample.timestamp) {
            return Ok(AttendanceOutcome::skipped(assignment, SkipReason::OutsideWindow));
        }

        let new = check_in_from(sample, assignment, CheckInKind::Arrival, sample.timestamp);
        self.write(assignment, &new, Lifecycle::on_arrival, now, None)
    }

    fn on_out_of_zone(
        &self,
        sample: &PositionSample,
        assignment: &Assignment,
        now: DateTime<Utc>,
    ) -> Result<AttendanceOutcome> {
        let Some(arrival) = self
            .store
            .live_check_in(&assignment.id, CheckInKind::Arrival)?
        else {
            return Ok(AttendanceOutcome::skipped(assignment, SkipReason::NoArrival));
        };
        if self
            .store
            .live_check_in(&assignment.id, CheckInKind::Departure)?
            .is_some()
        {
            return Ok(AttendanceOutcome::skipped(assignment, SkipReason::AlreadyDeparted));
        }

        // A departure never predates the arrival it closes, even when samples
        // arrive out of order.
        let from = (sample.timestamp - self.debounce).max(arrival.timestamp);
        let Some(anchor) = self.store.latest_in_zone_anchor(
            &sample.agent_id,
            &assignment.round_id,
            from,
            sample.timestamp,
        )?
        else {
            return Ok(AttendanceOutcome::skipped(assignment, SkipReason::NoAnchor));
        };

        let new = check_in_from(&anchor, assignment, CheckInKind::Departure, anchor.timestamp);
        self.write(assignment, &new, Lifecycle::on_departure, now, Some(anchor.timestamp))
    }

    fn write(
        &self,
        assignment: &Assignment,
        new: &NewCheckIn,
        rule: StatusRule,
        now: DateTime<Utc>,
        anchored_at: Option<DateTime<Utc>>,
    ) -> Result<AttendanceOutcome> {
        let outcome = match self.store.record_check_in(new, rule, now)? {
            CheckInWrite::Recorded { check_in, change } => match anchored_at {
                Some(anchored_at) => AttendanceOutcome::DepartureRecorded {
                    assignment_id: assignment.id.clone(),
                    check_in_id: check_in.id,
                    anchored_at,
                    change,
                },
                None => AttendanceOutcome::ArrivalRecorded {
                    assignment_id: assignment.id.clone(),
                    check_in_id: check_in.id,
                    change,
                },
            },
            // Lost a race with a concurrent writer: already satisfied.
            CheckInWrite::AlreadyRecorded => {
                let reason = match new.kind {
                    CheckInKind::Arrival => SkipReason::AlreadyArrived,
                    CheckInKind::Departure => SkipReason::AlreadyDeparted,
                };
                AttendanceOutcome::skipped(assignment, reason)
            }
            CheckInWrite::MissingArrival => {
                AttendanceOutcome::skipped(assignment, SkipReason::NoArrival)
            }
            CheckInWrite::AssignmentClosed(status) => {
                AttendanceOutcome::skipped(assignment, SkipReason::AssignmentClosed(status))
            }
        };
        Ok(outcome)
    }
}

fn check_in_from(
    sample: &PositionSample,
    assignment: &Assignment,
    kind: CheckInKind,
    at: DateTime<Utc>,
) -> NewCheckIn {
    NewCheckIn {
        agent_id: assignment.agent_id.clone(),
        assignment_id: assignment.id.clone(),
        round_id: assignment.round_id.clone(),
        kind,
        timestamp: at,
        latitude: Some(sample.latitude),
        longitude: Some(sample.longitude),
        accuracy: sample.accuracy,
    }
}

fn log_outcome(sample: &PositionSample, outcome: &AttendanceOutcome) {
    match outcome {
        AttendanceOutcome::ArrivalRecorded {
            assignment_id,
            change,
            ..
        } => info!(
            agent_id = %sample.agent_id,
            assignment_id = %assignment_id,
            at = %sample.timestamp,
            change = ?change,
            "arrival recorded"
        ),
        AttendanceOutcome::DepartureRecorded {
            assignment_id,
            anchored_at,
            change,
            ..
        } => info!(
            agent_id = %sample.agent_id,
            assignment_id = %assignment_id,
            at = %anchored_at,
            change = ?change,
            "departure recorded"
        ),
        AttendanceOutcome::Skipped {
            assignment_id,
            reason,
        } => debug!(
            sample_id = %sample.id,
            assignment_id = %assignment_id,
            %reason,
            "sample skipped"
        ),
        AttendanceOutcome::NoAssignment => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CheckInState, SampleSource};
    use crate::store::testing::*;

    fn engine(store: &Store) -> AttendanceEngine {
        AttendanceEngine::new(store.clone(), Duration::minutes(5))
    }

    /// Stores an already-classified sample at `offset` minutes after t0.
    fn classified(store: &Store, id: &str, offset: i64, in_zone: bool) -> String {
        let at = t0() + Duration::minutes(offset);
        store
            .insert_sample(&PositionSample {
                id: id.into(),
                agent_id: "AG-1".into(),
                round_id: Some("R-1".into()),
                latitude: 10.0,
                longitude: if in_zone { 10.0 } else { 10.01 },
                accuracy: Some(4.0),
                altitude: None,
                timestamp: at,
                source: SampleSource::MobileApp,
                in_zone,
                distance_m: if in_zone { 0.0 } else { 1095.0 },
                received_at: at,
            })
            .unwrap();
        id.to_string()
    }

    fn now() -> DateTime<Utc> {
        t0() + Duration::hours(1)
    }

    #[test]
    fn in_zone_sample_records_arrival() {
        let (_dir, store) = seeded_store();
        let id = classified(&store, "S-1", 10, true);

        let outcome = engine(&store).process_sample(&id, now()).unwrap();
        assert!(matches!(
            outcome,
            AttendanceOutcome::ArrivalRecorded {
                change: Some(StatusChange {
                    to: AssignmentStatus::Active,
                    ..
                }),
                ..
            }
        ));

        let arrival = store
            .live_check_in("AF-1", CheckInKind::Arrival)
            .unwrap()
            .unwrap();
        assert_eq!(arrival.timestamp, t0() + Duration::minutes(10));
        assert_eq!(arrival.state, CheckInState::Auto);
    }

    #[test]
    fn reprocessing_is_idempotent() {
        let (_dir, store) = seeded_store();
        let id = classified(&store, "S-1", 10, true);
        let engine = engine(&store);

        engine.process_sample(&id, now()).unwrap();
        let again = engine.process_sample(&id, now()).unwrap();
        assert_eq!(
            again,
            AttendanceOutcome::Skipped {
                assignment_id: "AF-1".into(),
                reason: SkipReason::AlreadyArrived,
            }
        );
        assert_eq!(store.check_ins_for_assignment("AF-1").unwrap().len(), 1);
    }

    #[test]
    fn out_of_zone_without_arrival_is_ignored() {
        let (_dir, store) = seeded_store();
        let id = classified(&store, "S-1", 10, false);

        let outcome = engine(&store).process_sample(&id, now()).unwrap();
        assert!(matches!(
            outcome,
            AttendanceOutcome::Skipped {
                reason: SkipReason::NoArrival,
                ..
            }
        ));
        let a = store.find_assignment("AF-1").unwrap().unwrap();
        assert_eq!(a.status, AssignmentStatus::Scheduled);
    }

    #[test]
    fn departure_is_stamped_at_the_anchor() {
        let (_dir, store) = seeded_store();
        let engine = engine(&store);
        engine
            .process_sample(&classified(&store, "S-1", 10, true), now())
            .unwrap();
        classified(&store, "S-2", 20, true);

        let outcome = engine
            .process_sample(&classified(&store, "S-3", 24, false), now())
            .unwrap();
        let AttendanceOutcome::DepartureRecorded {
            anchored_at,
            change,
            ..
        } = outcome
        else {
            panic!("expected a departure, got {outcome:?}");
        };
        assert_eq!(anchored_at, t0() + Duration::minutes(20));
        assert_eq!(change.map(|c| c.to), Some(AssignmentStatus::Completed));

        let departure = store
            .live_check_in("AF-1", CheckInKind::Departure)
            .unwrap()
            .unwrap();
        assert_eq!(departure.timestamp, anchored_at);
    }

    #[test]
    fn stale_anchor_does_not_count() {
        let (_dir, store) = seeded_store();
        let engine = engine(&store);
        engine
            .process_sample(&classified(&store, "S-1", 10, true), now())
            .unwrap();

        let outcome = engine
            .process_sample(&classified(&store, "S-2", 16, false), now())
            .unwrap();
        assert!(matches!(
            outcome,
            AttendanceOutcome::Skipped {
                reason: SkipReason::NoAnchor,
                ..
            }
        ));
        assert!(
            store
                .live_check_in("AF-1", CheckInKind::Departure)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn late_samples_cannot_anchor_before_the_arrival() {
        let (_dir, store) = seeded_store();
        let engine = engine(&store);
        engine
            .process_sample(&classified(&store, "S-1", 10, true), now())
            .unwrap();
        // Delivered late: both predate the recorded arrival.
        engine
            .process_sample(&classified(&store, "S-2", 1, true), now())
            .unwrap();
        let outcome = engine
            .process_sample(&classified(&store, "S-3", 3, false), now())
            .unwrap();

        assert!(matches!(
            outcome,
            AttendanceOutcome::Skipped {
                reason: SkipReason::NoAnchor,
                ..
            }
        ));
        assert!(
            store
                .live_check_in("AF-1", CheckInKind::Departure)
                .unwrap()
                .is_none()
        );
        let a = store.find_assignment("AF-1").unwrap().unwrap();
        assert_eq!(a.status, AssignmentStatus::Active);
        let agent = store.find_agent("AG-1").unwrap().unwrap();
        assert_eq!(agent.presence, crate::model::Presence::Present);
    }

    #[test]
    fn arrival_sample_itself_can_anchor_the_departure() {
        let (_dir, store) = seeded_store();
        let engine = engine(&store);
        engine
            .process_sample(&classified(&store, "S-1", 10, true), now())
            .unwrap();

        let outcome = engine
            .process_sample(&classified(&store, "S-2", 13, false), now())
            .unwrap();
        assert!(matches!(
            outcome,
            AttendanceOutcome::DepartureRecorded { anchored_at, .. }
                if anchored_at == t0() + Duration::minutes(10)
        ));
    }

    #[test]
    fn sample_outside_any_window_is_a_no_op() {
        let (_dir, store) = seeded_store();
        let id = classified(&store, "S-1", -30, true);
        assert_eq!(
            engine(&store).process_sample(&id, now()).unwrap(),
            AttendanceOutcome::NoAssignment
        );
    }

    #[test]
    fn missing_round_is_backfilled() {
        let (_dir, store) = seeded_store();
        let at = t0() + Duration::minutes(5);
        store
            .insert_sample(&PositionSample {
                id: "S-1".into(),
                agent_id: "AG-1".into(),
                round_id: None,
                latitude: 0.0,
                longitude: 0.0,
                accuracy: None,
                altitude: None,
                timestamp: at,
                source: SampleSource::Manual,
                in_zone: false,
                distance_m: 0.0,
                received_at: at,
            })
            .unwrap();

        engine(&store).process_sample("S-1", now()).unwrap();
        let sample = store.find_sample("S-1").unwrap().unwrap();
        assert_eq!(sample.round_id.as_deref(), Some("R-1"));
    }

    #[test]
    fn unknown_sample_is_not_found() {
        let (_dir, store) = seeded_store();
        let err = engine(&store).process_sample("S-404", now()).unwrap_err();
        assert!(matches!(err, PatrolError::NotFound { kind: "sample", .. }));
    }
}
