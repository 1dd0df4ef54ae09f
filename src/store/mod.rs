//! SQLite persistence for attendance state.
//!
//! A single database file holds the directory tables the engine reads
//! (agents, rounds, assignments) and the facts it writes (samples,
//! check-ins, absences, alerts):
//!
//! ```text
//! agent(id, name, active, presence, current_assignment_id, last_check_in_ms)
//! round(id, name, site_id, latitude, longitude, radius_m, status)
//! assignment(id, agent_id, round_id, start_ms, end_ms, status)
//! position_sample(id, agent_id, round_id, latitude, longitude, accuracy, altitude,
//!                 timestamp_ms, source, in_zone, distance_m, received_at_ms)
//! check_in(id, agent_id, assignment_id, round_id, kind, timestamp_ms, state, ...)
//! absence(id, agent_id, assignment_id, round_id, absence_date, reason, created_at_ms)
//! alert(id, kind, severity, subject_type, subject_key, agent_id, round_id, state, ...)
//! ```
//!
//! Every operation opens its own connection, so concurrent callers behave
//! like independent writers. Writes that must be atomic with a preceding
//! read run in `BEGIN IMMEDIATE` transactions; partial unique indexes back
//! the check-in and alert invariants.

mod absences;
mod alerts;
mod checkins;
mod codec;
mod directory;
mod samples;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::StoreError;

pub use absences::NoShowWrite;
pub use alerts::NewAlert;
pub use checkins::{CheckInUpdate, CheckInWrite, NewCheckIn};

pub type Result<T> = core::result::Result<T, StoreError>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agent (
    id                    TEXT PRIMARY KEY,
    name                  TEXT NOT NULL,
    active                INTEGER NOT NULL DEFAULT 1,
    presence              TEXT NOT NULL DEFAULT 'absent',
    current_assignment_id TEXT,
    last_check_in_ms      INTEGER
);

CREATE TABLE IF NOT EXISTS round (
    id        TEXT PRIMARY KEY,
    name      TEXT NOT NULL,
    site_id   TEXT,
    latitude  REAL,
    longitude REAL,
    radius_m  REAL,
    status    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS assignment (
    id       TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    round_id TEXT NOT NULL,
    start_ms INTEGER NOT NULL,
    end_ms   INTEGER NOT NULL,
    status   TEXT NOT NULL,
    CHECK (start_ms <= end_ms)
);
CREATE INDEX IF NOT EXISTS idx_assignment_agent ON assignment(agent_id, status, start_ms);
CREATE INDEX IF NOT EXISTS idx_assignment_status ON assignment(status, end_ms);

CREATE TABLE IF NOT EXISTS position_sample (
    id             TEXT PRIMARY KEY,
    agent_id       TEXT NOT NULL,
    round_id       TEXT,
    latitude       REAL NOT NULL,
    longitude      REAL NOT NULL,
    accuracy       REAL,
    altitude       REAL,
    timestamp_ms   INTEGER NOT NULL,
    source         TEXT NOT NULL,
    in_zone        INTEGER NOT NULL DEFAULT 0,
    distance_m     REAL NOT NULL DEFAULT 0,
    received_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sample_anchor
    ON position_sample(agent_id, round_id, in_zone, timestamp_ms);

CREATE TABLE IF NOT EXISTS check_in (
    id            TEXT PRIMARY KEY,
    agent_id      TEXT NOT NULL,
    assignment_id TEXT NOT NULL,
    round_id      TEXT NOT NULL,
    kind          TEXT NOT NULL,
    timestamp_ms  INTEGER NOT NULL,
    state         TEXT NOT NULL,
    latitude      REAL,
    longitude     REAL,
    accuracy      REAL,
    created_at_ms INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_check_in_live
    ON check_in(assignment_id, kind) WHERE state != 'cancelled';
CREATE INDEX IF NOT EXISTS idx_check_in_agent ON check_in(agent_id, timestamp_ms);

CREATE TABLE IF NOT EXISTS absence (
    id            TEXT PRIMARY KEY,
    agent_id      TEXT NOT NULL,
    assignment_id TEXT NOT NULL UNIQUE,
    round_id      TEXT NOT NULL,
    absence_date  TEXT NOT NULL,
    reason        TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS alert (
    id             TEXT PRIMARY KEY,
    kind           TEXT NOT NULL,
    severity       TEXT NOT NULL,
    subject_type   TEXT NOT NULL,
    subject_key    TEXT NOT NULL,
    agent_id       TEXT,
    round_id       TEXT NOT NULL,
    state          TEXT NOT NULL,
    title          TEXT NOT NULL,
    description    TEXT NOT NULL,
    created_at_ms  INTEGER NOT NULL,
    resolved_at_ms INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_alert_active
    ON alert(subject_type, subject_key, kind) WHERE state = 'active';
";

/// Handle on the attendance database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Opens (creating if needed) the database at `path` and ensures the schema.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { path };
        let conn = store.connect()?;
        // journal_mode answers with the resulting mode, so it must be queried.
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        conn.execute_batch(SCHEMA)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    use super::Store;
    use crate::model::{Agent, Assignment, AssignmentStatus, Round, RoundStatus};

    pub fn test_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("patrol.sqlite")).unwrap();
        (dir, store)
    }

    /// 2026-03-02 08:00 UTC, the start of every test assignment.
    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    pub fn round(id: &str) -> Round {
        Round {
            id: id.into(),
            name: format!("Round {id}"),
            site_id: Some("S-1".into()),
            latitude: Some(10.0),
            longitude: Some(10.0),
            radius_m: Some(50.0),
            status: RoundStatus::Active,
        }
    }

    pub fn assignment(id: &str, agent_id: &str, round_id: &str) -> Assignment {
        Assignment {
            id: id.into(),
            agent_id: agent_id.into(),
            round_id: round_id.into(),
            start: t0(),
            end: t0() + Duration::hours(8),
            status: AssignmentStatus::Scheduled,
        }
    }

    /// Runs SQL against the database behind the store's back, for tests that
    /// need rows the typed API refuses to write.
    pub fn execute_raw(store: &Store, sql: &str) {
        let conn = rusqlite::Connection::open(store.path()).unwrap();
        conn.execute_batch(sql).unwrap();
    }

    /// One agent `AG-1`, one round `R-1` at (10, 10) r=50m, one assignment
    /// `AF-1` covering 08:00–16:00.
    pub fn seeded_store() -> (TempDir, Store) {
        let (dir, store) = test_store();
        store.upsert_agent(&Agent::new("AG-1", "Amina Benali")).unwrap();
        store.upsert_round(&round("R-1")).unwrap();
        store.upsert_assignment(&assignment("AF-1", "AG-1", "R-1")).unwrap();
        (dir, store)
    }
}
