use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use uuid::Uuid;

use crate::error::StoreError;
use crate::lifecycle::{Lifecycle, StatusChange};
use crate::model::{Absence, AssignmentStatus, CheckInKind};

use super::checkins::has_live_check_in;
use super::codec::timestamp;
use super::directory::load_assignment;
use super::{Result, Store, to_ms};

const ABSENCE_COLUMNS: &str =
    "id, agent_id, assignment_id, round_id, absence_date, reason, created_at_ms";
const DATE_FORMAT: &str = "%Y-%m-%d";

fn absence_from_row(row: &Row<'_>) -> rusqlite::Result<Absence> {
    let date: String = row.get(4)?;
    let date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Absence {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        assignment_id: row.get(2)?,
        round_id: row.get(3)?,
        date,
        reason: row.get(5)?,
        created_at: timestamp(row, 6)?,
    })
}

fn absence_for(conn: &Connection, assignment_id: &str) -> Result<Option<Absence>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ABSENCE_COLUMNS} FROM absence WHERE assignment_id = ?1"),
            [assignment_id],
            absence_from_row,
        )
        .optional()?)
}

/// Result of closing out a no-show.
#[derive(Debug, Clone, PartialEq)]
pub enum NoShowWrite {
    /// The absence exists and the assignment was cancelled.
    Recorded {
        absence: Absence,
        change: Option<StatusChange>,
    },
    /// A live arrival showed up before the write; nothing was written.
    ArrivalFound,
    /// The assignment was no longer active; nothing was written.
    NotActive(AssignmentStatus),
}

impl Store {
    /// Records the absence for an active assignment without a live arrival and
    /// cancels it, in one transaction. An existing absence for the assignment
    /// is reused rather than duplicated.
    pub fn record_no_show(
        &self,
        assignment_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<NoShowWrite> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let assignment = load_assignment(&tx, assignment_id)?.ok_or_else(|| {
            StoreError::NotFound {
                kind: "assignment",
                id: assignment_id.to_string(),
            }
        })?;

        let Some(to) = Lifecycle::on_no_show(assignment.status) else {
            return Ok(NoShowWrite::NotActive(assignment.status));
        };
        if has_live_check_in(&tx, assignment_id, CheckInKind::Arrival)? {
            return Ok(NoShowWrite::ArrivalFound);
        }

        let absence = match absence_for(&tx, assignment_id)? {
            Some(existing) => existing,
            None => {
                let absence = Absence {
                    id: Uuid::new_v4().to_string(),
                    agent_id: assignment.agent_id.clone(),
                    assignment_id: assignment.id.clone(),
                    round_id: assignment.round_id.clone(),
                    date: assignment.start.date_naive(),
                    reason: reason.to_string(),
                    created_at: now,
                };
                tx.execute(
                    &format!(
                        "INSERT INTO absence ({ABSENCE_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                    ),
                    params![
                        absence.id,
                        absence.agent_id,
                        absence.assignment_id,
                        absence.round_id,
                        absence.date.format(DATE_FORMAT).to_string(),
                        absence.reason,
                        to_ms(absence.created_at),
                    ],
                )?;
                absence
            }
        };

        let rows = tx.execute(
            "UPDATE assignment SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to, assignment.id, assignment.status],
        )?;
        tx.commit()?;

        let change = (rows == 1).then_some(StatusChange {
            from: assignment.status,
            to,
        });
        Ok(NoShowWrite::Recorded { absence, change })
    }

    pub fn list_absences(&self) -> Result<Vec<Absence>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ABSENCE_COLUMNS} FROM absence ORDER BY created_at_ms, id"
        ))?;
        let rows = stmt
            .query_map([], absence_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
