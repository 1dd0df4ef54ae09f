//! Position ingestion: validate, persist, classify, hand off.
//!
//! The pipeline is explicit and ordered. Validation failures write nothing.
//! Once the sample row exists it is never rolled back: classification and
//! attendance run as later steps that can be replayed with
//! [`IngestService::reprocess`].

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attendance::{AttendanceEngine, AttendanceOutcome};
use crate::error::{PatrolError, Result};
use crate::geofence;
use crate::model::{PositionSample, Round, SampleSource};
use crate::store::Store;

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// A position as reported by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub agent_id: String,
    #[serde(default, alias = "round_id_hint")]
    pub round_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    /// ISO-8601. Without a zone designator the configured local offset applies.
    pub timestamp: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// What the ingesting caller learns about its own sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReceipt {
    pub sample_id: String,
    pub round_id: Option<String>,
    pub in_zone: bool,
    pub distance_m: f64,
}

pub struct IngestService {
    store: Store,
    engine: AttendanceEngine,
    local_offset: FixedOffset,
}

impl IngestService {
    pub fn new(store: Store, engine: AttendanceEngine, local_offset: FixedOffset) -> Self {
        Self {
            store,
            engine,
            local_offset,
        }
    }

    /// Accepts or rejects one report. Attendance effects are not part of the
    /// answer; they are observable through later reads.
    pub fn ingest(&self, report: &PositionReport, now: DateTime<Utc>) -> Result<IngestReceipt> {
        let timestamp = validate(report, self.local_offset)?;

        let mut sample = PositionSample {
            id: Uuid::new_v4().to_string(),
            agent_id: report.agent_id.trim().to_string(),
            round_id: report
                .round_id
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            latitude: report.latitude,
            longitude: report.longitude,
            accuracy: usable_accuracy(report.accuracy),
            altitude: report.altitude.filter(|a| a.is_finite()),
            timestamp,
            source: SampleSource::normalize(report.source.as_deref()),
            in_zone: false,
            distance_m: 0.0,
            received_at: now,
        };
        self.store.insert_sample(&sample)?;

        let round = self.resolve_round(&sample)?;
        let classification = geofence::classify(
            Some(sample.point()),
            round.as_ref().and_then(Round::center),
            round.as_ref().and_then(|r| r.radius_m),
        );
        let round_id = round.map(|r| r.id);
        self.store.set_classification(
            &sample.id,
            round_id.as_deref(),
            classification.in_zone,
            classification.distance_m,
        )?;
        sample.in_zone = classification.in_zone;
        sample.distance_m = classification.distance_m;
        if sample.round_id.is_none() {
            sample.round_id = round_id;
        }
        debug!(
            sample_id = %sample.id,
            agent_id = %sample.agent_id,
            in_zone = sample.in_zone,
            distance_m = sample.distance_m,
            "sample classified"
        );

        self.hand_off(&sample, now)?;

        Ok(IngestReceipt {
            sample_id: sample.id,
            round_id: sample.round_id,
            in_zone: sample.in_zone,
            distance_m: sample.distance_m,
        })
    }

    /// Re-runs attendance for a stored sample.
    pub fn reprocess(&self, sample_id: &str, now: DateTime<Utc>) -> Result<AttendanceOutcome> {
        self.engine.process_sample(sample_id, now)
    }

    /// The round to classify against: the hinted one, else the round of the
    /// assignment covering the sample. Unknown rounds leave it unresolved.
    fn resolve_round(&self, sample: &PositionSample) -> Result<Option<Round>> {
        let round_id = match &sample.round_id {
            Some(hint) => Some(hint.clone()),
            None => self
                .store
                .covering_assignment(&sample.agent_id, None, sample.timestamp)?
                .map(|a| a.round_id),
        };
        let Some(round_id) = round_id else {
            return Ok(None);
        };
        let round = self.store.find_round(&round_id)?;
        if round.is_none() {
            warn!(
                sample_id = %sample.id,
                round_id = %round_id,
                "unknown round, sample left unclassified"
            );
        }
        Ok(round)
    }

    /// Runs attendance unless the agent is unknown or inactive. Attendance
    /// failures are logged and leave the sample retryable.
    fn hand_off(&self, sample: &PositionSample, now: DateTime<Utc>) -> Result<()> {
        match self.store.find_agent(&sample.agent_id)? {
            None => {
                warn!(
                    agent_id = %sample.agent_id,
                    sample_id = %sample.id,
                    "unknown agent, attendance skipped"
                );
                return Ok(());
            }
            Some(agent) if !agent.active => {
                info!(
                    agent_id = %agent.id,
                    sample_id = %sample.id,
                    "inactive agent, attendance skipped"
                );
                return Ok(());
            }
            Some(_) => {}
        }

        if let Err(e) = self.engine.process_sample(&sample.id, now) {
            warn!(
                sample_id = %sample.id,
                error = %e,
                transient = e.is_transient(),
                "attendance processing failed"
            );
        }
        Ok(())
    }
}

/// Checks a report and returns its timestamp in UTC. Accuracy and altitude
/// are never grounds for rejection.
pub fn validate(report: &PositionReport, local_offset: FixedOffset) -> Result<DateTime<Utc>> {
    if report.agent_id.trim().is_empty() {
        return Err(PatrolError::Validation("agent_id is empty".into()));
    }
    if !report.latitude.is_finite() || !(-90.0..=90.0).contains(&report.latitude) {
        return Err(PatrolError::Validation(format!(
            "latitude out of range: {}",
            report.latitude
        )));
    }
    if !report.longitude.is_finite() || !(-180.0..=180.0).contains(&report.longitude) {
        return Err(PatrolError::Validation(format!(
            "longitude out of range: {}",
            report.longitude
        )));
    }
    parse_timestamp(&report.timestamp, local_offset)
}

/// Negative accuracy is how some devices flag a fix without an error
/// estimate; such values are stored as unknown.
fn usable_accuracy(accuracy: Option<f64>) -> Option<f64> {
    accuracy.filter(|a| a.is_finite() && *a >= 0.0)
}

/// Parses an ISO-8601 timestamp. Zone-less values are read in `local_offset`.
pub fn parse_timestamp(raw: &str, local_offset: FixedOffset) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| local_offset.from_local_datetime(&naive).single())
        .map(|ts| ts.with_timezone(&Utc))
        .ok_or_else(|| PatrolError::Validation(format!("unparseable timestamp: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::*;

    use chrono::Duration;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn service(store: &Store) -> IngestService {
        let engine = AttendanceEngine::new(store.clone(), Duration::minutes(5));
        IngestService::new(store.clone(), engine, utc())
    }

    fn report(lat: f64, lon: f64, at: DateTime<Utc>) -> PositionReport {
        PositionReport {
            agent_id: "AG-1".into(),
            round_id: None,
            latitude: lat,
            longitude: lon,
            accuracy: Some(5.0),
            altitude: None,
            timestamp: at.to_rfc3339(),
            source: Some("Background GPS".into()),
        }
    }

    #[test]
    fn timestamps_with_and_without_offset() {
        let plus_one = FixedOffset::east_opt(3600).unwrap();
        let expected = t0();

        assert_eq!(parse_timestamp("2026-03-02T08:00:00Z", plus_one).unwrap(), expected);
        assert_eq!(
            parse_timestamp("2026-03-02T09:00:00+01:00", utc()).unwrap(),
            expected
        );
        assert_eq!(parse_timestamp("2026-03-02T09:00:00", plus_one).unwrap(), expected);
        assert_eq!(
            parse_timestamp("2026-03-02 09:00:00.250", plus_one).unwrap(),
            expected + Duration::milliseconds(250)
        );
        assert!(parse_timestamp("yesterday", utc()).is_err());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        for (lat, lon) in [(90.5, 0.0), (0.0, -180.1), (f64::NAN, 0.0)] {
            let err = validate(&report(lat, lon, t0()), utc()).unwrap_err();
            assert!(matches!(err, PatrolError::Validation(_)));
        }
        assert!(validate(&report(-90.0, 180.0, t0()), utc()).is_ok());
    }

    #[test]
    fn negative_accuracy_is_stored_as_unknown() {
        let (_dir, store) = seeded_store();
        let at = t0() + Duration::minutes(3);
        let mut r = report(10.0, 10.0, at);
        r.accuracy = Some(-1.0);
        r.altitude = Some(f64::INFINITY);

        let receipt = service(&store).ingest(&r, at).unwrap();
        let stored = store.find_sample(&receipt.sample_id).unwrap().unwrap();
        assert_eq!(stored.accuracy, None);
        assert_eq!(stored.altitude, None);
        assert!(stored.in_zone);
    }

    #[test]
    fn invalid_report_writes_nothing() {
        let (_dir, store) = seeded_store();
        let mut bad = report(10.0, 10.0, t0());
        bad.timestamp = "not a time".into();

        assert!(service(&store).ingest(&bad, t0()).is_err());
        assert!(store.samples_for_agent("AG-1").unwrap().is_empty());
    }

    #[test]
    fn round_resolved_from_covering_assignment() {
        let (_dir, store) = seeded_store();
        let at = t0() + Duration::minutes(3);
        let receipt = service(&store).ingest(&report(10.0, 10.0, at), at).unwrap();

        assert_eq!(receipt.round_id.as_deref(), Some("R-1"));
        assert!(receipt.in_zone);
        assert_eq!(receipt.distance_m, 0.0);

        let stored = store.find_sample(&receipt.sample_id).unwrap().unwrap();
        assert_eq!(stored.source, SampleSource::MobileApp);
        assert!(stored.in_zone);
        assert!(
            store
                .live_check_in("AF-1", crate::model::CheckInKind::Arrival)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn unknown_agent_is_accepted_without_attendance() {
        let (_dir, store) = seeded_store();
        let mut r = report(10.0, 10.0, t0());
        r.agent_id = "AG-404".into();
        r.round_id = Some("R-1".into());

        let receipt = service(&store).ingest(&r, t0()).unwrap();
        assert!(receipt.in_zone);
        assert!(store.check_ins_for_assignment("AF-1").unwrap().is_empty());
    }

    #[test]
    fn attendance_failure_keeps_the_classified_sample() {
        let (_dir, store) = seeded_store();
        let svc = service(&store);
        let mut r = report(10.0, 10.0, t0() + Duration::minutes(2));
        r.round_id = Some("R-1".into());
        execute_raw(&store, "UPDATE assignment SET end_ms = 'garbled' WHERE id = 'AF-1'");

        let receipt = svc.ingest(&r, t0()).unwrap();
        let stored = store.find_sample(&receipt.sample_id).unwrap().unwrap();
        assert!(stored.in_zone);
        assert_eq!(stored.distance_m, 0.0);
        assert!(store.check_ins_for_assignment("AF-1").unwrap().is_empty());

        let end_ms = (t0() + Duration::hours(8)).timestamp_millis();
        execute_raw(
            &store,
            &format!("UPDATE assignment SET end_ms = {end_ms} WHERE id = 'AF-1'"),
        );
        let outcome = svc.reprocess(&receipt.sample_id, t0()).unwrap();
        assert!(matches!(outcome, AttendanceOutcome::ArrivalRecorded { .. }));
        assert!(
            store
                .live_check_in("AF-1", crate::model::CheckInKind::Arrival)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn unknown_round_stays_unclassified() {
        let (_dir, store) = seeded_store();
        let mut r = report(10.0, 10.0, t0());
        r.round_id = Some("R-404".into());

        let receipt = service(&store).ingest(&r, t0()).unwrap();
        assert!(!receipt.in_zone);
        assert_eq!(receipt.distance_m, 0.0);
    }

    #[test]
    fn report_deserializes_with_optional_fields() {
        let json = r#"{"agent_id":"AG-1","latitude":1.5,"longitude":2.5,"timestamp":"2026-03-02T08:00:00Z"}"#;
        let r: PositionReport = serde_json::from_str(json).unwrap();
        assert!(r.round_id.is_none());
        assert!(r.source.is_none());
        assert_eq!(validate(&r, utc()).unwrap(), t0());
    }
}
