use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use uuid::Uuid;

use crate::error::StoreError;
use crate::lifecycle::{StatusChange, StatusRule};
use crate::model::{AssignmentStatus, CheckIn, CheckInAction, CheckInKind, CheckInState, Presence};

use super::codec::timestamp;
use super::directory::load_assignment;
use super::{Result, Store, is_constraint_violation, to_ms};

const CHECK_IN_COLUMNS: &str = "id, agent_id, assignment_id, round_id, kind, timestamp_ms, \
     state, latitude, longitude, accuracy, created_at_ms";

fn check_in_from_row(row: &Row<'_>) -> rusqlite::Result<CheckIn> {
    Ok(CheckIn {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        assignment_id: row.get(2)?,
        round_id: row.get(3)?,
        kind: row.get(4)?,
        timestamp: timestamp(row, 5)?,
        state: row.get(6)?,
        latitude: row.get(7)?,
        longitude: row.get(8)?,
        accuracy: row.get(9)?,
        created_at: timestamp(row, 10)?,
    })
}

/// A check-in the engine wants written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCheckIn {
    pub agent_id: String,
    pub assignment_id: String,
    pub round_id: String,
    pub kind: CheckInKind,
    pub timestamp: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
}

/// Result of an atomic check-in write.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckInWrite {
    /// The check-in was inserted; `change` is the status transition it caused.
    Recorded {
        check_in: CheckIn,
        change: Option<StatusChange>,
    },
    /// A live check-in of the same kind already exists.
    AlreadyRecorded,
    /// A departure was requested without a live arrival.
    MissingArrival,
    /// The assignment left the open states before the write.
    AssignmentClosed(AssignmentStatus),
}

/// Result of an operator action on a check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInUpdate {
    Applied(CheckInState),
    Refused(&'static str),
}

pub(super) fn has_live_check_in(
    conn: &Connection,
    assignment_id: &str,
    kind: CheckInKind,
) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM check_in
                        WHERE assignment_id = ?1 AND kind = ?2 AND state != 'cancelled')",
        params![assignment_id, kind],
        |row| row.get(0),
    )?)
}

/// Recomputes the agent's cached presence from its latest live check-in.
/// On a timestamp tie the departure wins.
pub(super) fn refresh_presence(conn: &Connection, agent_id: &str) -> Result<()> {
    let latest: Option<(String, CheckInKind, i64)> = conn
        .query_row(
            "SELECT assignment_id, kind, timestamp_ms FROM check_in
             WHERE agent_id = ?1 AND state != 'cancelled'
             ORDER BY timestamp_ms DESC, kind DESC LIMIT 1",
            [agent_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let (presence, assignment_id, last_ms) = match latest {
        Some((assignment_id, CheckInKind::Arrival, ms)) => {
            (Presence::Present, Some(assignment_id), Some(ms))
        }
        Some((_, CheckInKind::Departure, ms)) => (Presence::Absent, None, Some(ms)),
        None => (Presence::Absent, None, None),
    };
    conn.execute(
        "UPDATE agent SET presence = ?2, current_assignment_id = ?3, last_check_in_ms = ?4
         WHERE id = ?1",
        params![agent_id, presence, assignment_id, last_ms],
    )?;
    Ok(())
}

/// Inserts a check-in and applies `rule` to the assignment status inside an
/// open transaction. The caller commits.
pub(super) fn insert_check_in(
    conn: &Connection,
    new: &NewCheckIn,
    rule: StatusRule,
    now: DateTime<Utc>,
) -> Result<CheckInWrite> {
    let assignment =
        load_assignment(conn, &new.assignment_id)?.ok_or_else(|| StoreError::NotFound {
            kind: "assignment",
            id: new.assignment_id.clone(),
        })?;
    if !assignment.status.is_open() {
        return Ok(CheckInWrite::AssignmentClosed(assignment.status));
    }
    if has_live_check_in(conn, &new.assignment_id, new.kind)? {
        return Ok(CheckInWrite::AlreadyRecorded);
    }
    if new.kind == CheckInKind::Departure
        && !has_live_check_in(conn, &new.assignment_id, CheckInKind::Arrival)?
    {
        return Ok(CheckInWrite::MissingArrival);
    }

    let check_in = CheckIn {
        id: Uuid::new_v4().to_string(),
        agent_id: new.agent_id.clone(),
        assignment_id: new.assignment_id.clone(),
        round_id: new.round_id.clone(),
        kind: new.kind,
        timestamp: new.timestamp,
        state: CheckInState::Auto,
        latitude: new.latitude,
        longitude: new.longitude,
        accuracy: new.accuracy,
        created_at: now,
    };
    let inserted = conn.execute(
        &format!(
            "INSERT INTO check_in ({CHECK_IN_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            check_in.id,
            check_in.agent_id,
            check_in.assignment_id,
            check_in.round_id,
            check_in.kind,
            to_ms(check_in.timestamp),
            check_in.state,
            check_in.latitude,
            check_in.longitude,
            check_in.accuracy,
            to_ms(check_in.created_at),
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(err) if is_constraint_violation(&err) => return Ok(CheckInWrite::AlreadyRecorded),
        Err(err) => return Err(err.into()),
    }

    let mut change = None;
    if let Some(to) = rule(assignment.status) {
        let rows = conn.execute(
            "UPDATE assignment SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to, assignment.id, assignment.status],
        )?;
        if rows == 1 {
            change = Some(StatusChange {
                from: assignment.status,
                to,
            });
        }
    }
    refresh_presence(conn, &check_in.agent_id)?;

    Ok(CheckInWrite::Recorded { check_in, change })
}

impl Store {
    /// Writes a check-in atomically with respect to other writers.
    ///
    /// Inside one `BEGIN IMMEDIATE` transaction the assignment status is
    /// re-read, the live check-in invariants are checked, the row is
    /// inserted, `rule` is applied to the re-read status, and the agent's
    /// presence is recomputed. Anything short of `Recorded` writes nothing.
    pub fn record_check_in(
        &self,
        new: &NewCheckIn,
        rule: StatusRule,
        now: DateTime<Utc>,
    ) -> Result<CheckInWrite> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = insert_check_in(&tx, new, rule, now)?;
        if matches!(outcome, CheckInWrite::Recorded { .. }) {
            tx.commit()?;
        }
        Ok(outcome)
    }

    pub fn live_check_in(
        &self,
        assignment_id: &str,
        kind: CheckInKind,
    ) -> Result<Option<CheckIn>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {CHECK_IN_COLUMNS} FROM check_in
                     WHERE assignment_id = ?1 AND kind = ?2 AND state != 'cancelled'"
                ),
                params![assignment_id, kind],
                check_in_from_row,
            )
            .optional()?)
    }

    pub fn find_check_in(&self, id: &str) -> Result<Option<CheckIn>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                &format!("SELECT {CHECK_IN_COLUMNS} FROM check_in WHERE id = ?1"),
                [id],
                check_in_from_row,
            )
            .optional()?)
    }

    /// Every check-in of an assignment, cancelled ones included.
    pub fn check_ins_for_assignment(&self, assignment_id: &str) -> Result<Vec<CheckIn>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECK_IN_COLUMNS} FROM check_in
             WHERE assignment_id = ?1 ORDER BY timestamp_ms, created_at_ms"
        ))?;
        let rows = stmt
            .query_map([assignment_id], check_in_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Confirms or cancels a check-in. Cancelling an arrival that still has a
    /// live departure is refused so a departure never outlives its arrival.
    pub fn apply_check_in_action(&self, id: &str, action: CheckInAction) -> Result<CheckInUpdate> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let check_in = tx
            .query_row(
                &format!("SELECT {CHECK_IN_COLUMNS} FROM check_in WHERE id = ?1"),
                [id],
                check_in_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                kind: "check-in",
                id: id.to_string(),
            })?;

        let Some(target) = action.target(check_in.state) else {
            return Ok(CheckInUpdate::Refused("transition not allowed from current state"));
        };
        if !target.is_live()
            && check_in.kind == CheckInKind::Arrival
            && has_live_check_in(&tx, &check_in.assignment_id, CheckInKind::Departure)?
        {
            return Ok(CheckInUpdate::Refused("arrival still has a live departure"));
        }

        tx.execute(
            "UPDATE check_in SET state = ?2 WHERE id = ?1",
            params![id, target],
        )?;
        refresh_presence(&tx, &check_in.agent_id)?;
        tx.commit()?;
        Ok(CheckInUpdate::Applied(target))
    }
}
