//! Directory tables: agents, rounds and assignments.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};

use crate::error::StoreError;
use crate::lifecycle::{Lifecycle, ManualAction, StatusChange};
use crate::model::{
    Agent, AgentStats, Assignment, AssignmentStatus, PositionSample, Presence, Round,
};

use super::codec::{opt_timestamp, timestamp};
use super::{Result, Store, to_ms};

const AGENT_COLUMNS: &str =
    "id, name, active, presence, current_assignment_id, last_check_in_ms";
const ROUND_COLUMNS: &str = "id, name, site_id, latitude, longitude, radius_m, status";
pub(super) const ASSIGNMENT_COLUMNS: &str = "id, agent_id, round_id, start_ms, end_ms, status";

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        active: row.get(2)?,
        presence: row.get(3)?,
        current_assignment_id: row.get(4)?,
        last_check_in_at: opt_timestamp(row, 5)?,
    })
}

fn round_from_row(row: &Row<'_>) -> rusqlite::Result<Round> {
    Ok(Round {
        id: row.get(0)?,
        name: row.get(1)?,
        site_id: row.get(2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        radius_m: row.get(5)?,
        status: row.get(6)?,
    })
}

pub(super) fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        round_id: row.get(2)?,
        start: timestamp(row, 3)?,
        end: timestamp(row, 4)?,
        status: row.get(5)?,
    })
}

pub(super) fn load_assignment(
    conn: &rusqlite::Connection,
    id: &str,
) -> Result<Option<Assignment>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignment WHERE id = ?1"),
            [id],
            assignment_from_row,
        )
        .optional()?)
}

impl Store {
    // ── Agents ──

    /// Inserts or replaces an agent's directory fields. Derived presence is
    /// left untouched for existing agents.
    pub fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO agent (id, name, active, presence) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, active = excluded.active",
            params![agent.id, agent.name, agent.active, agent.presence],
        )?;
        Ok(())
    }

    pub fn find_agent(&self, id: &str) -> Result<Option<Agent>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                &format!("SELECT {AGENT_COLUMNS} FROM agent WHERE id = ?1"),
                [id],
                agent_from_row,
            )
            .optional()?)
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!("SELECT {AGENT_COLUMNS} FROM agent ORDER BY id"))?;
        let agents = stmt
            .query_map([], agent_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(agents)
    }

    /// Head count of active agents by derived presence.
    pub fn agent_stats(&self) -> Result<AgentStats> {
        let conn = self.connect()?;
        let (total, present): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(presence = ?1), 0) FROM agent WHERE active = 1",
            params![Presence::Present],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let total = u64::try_from(total).unwrap_or_default();
        let present = u64::try_from(present).unwrap_or_default();
        Ok(AgentStats {
            total,
            present,
            absent: total.saturating_sub(present),
        })
    }

    /// The agent's most recent sample by sample time.
    pub fn last_position(&self, agent_id: &str) -> Result<Option<PositionSample>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM position_sample WHERE agent_id = ?1
                     ORDER BY timestamp_ms DESC LIMIT 1",
                    super::samples::SAMPLE_COLUMNS
                ),
                [agent_id],
                super::samples::sample_from_row,
            )
            .optional()?)
    }

    // ── Rounds ──

    pub fn upsert_round(&self, round: &Round) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO round (id, name, site_id, latitude, longitude, radius_m, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, site_id = excluded.site_id,
                latitude = excluded.latitude, longitude = excluded.longitude,
                radius_m = excluded.radius_m, status = excluded.status",
            params![
                round.id,
                round.name,
                round.site_id,
                round.latitude,
                round.longitude,
                round.radius_m,
                round.status,
            ],
        )?;
        Ok(())
    }

    pub fn find_round(&self, id: &str) -> Result<Option<Round>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                &format!("SELECT {ROUND_COLUMNS} FROM round WHERE id = ?1"),
                [id],
                round_from_row,
            )
            .optional()?)
    }

    /// Active rounds holding an open assignment whose window ended before `now`.
    pub fn overdue_active_rounds(&self, now: DateTime<Utc>) -> Result<Vec<Round>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROUND_COLUMNS} FROM round r
             WHERE r.status = 'active'
               AND EXISTS (
                   SELECT 1 FROM assignment a
                   WHERE a.round_id = r.id
                     AND a.status IN ('scheduled', 'active')
                     AND a.end_ms < ?1)
             ORDER BY r.id"
        ))?;
        let rounds = stmt
            .query_map([to_ms(now)], round_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rounds)
    }

    // ── Assignments ──

    pub fn upsert_assignment(&self, assignment: &Assignment) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO assignment (id, agent_id, round_id, start_ms, end_ms, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                agent_id = excluded.agent_id, round_id = excluded.round_id,
                start_ms = excluded.start_ms, end_ms = excluded.end_ms,
                status = excluded.status",
            params![
                assignment.id,
                assignment.agent_id,
                assignment.round_id,
                to_ms(assignment.start),
                to_ms(assignment.end),
                assignment.status,
            ],
        )?;
        Ok(())
    }

    pub fn find_assignment(&self, id: &str) -> Result<Option<Assignment>> {
        let conn = self.connect()?;
        load_assignment(&conn, id)
    }

    /// The agent's open assignment whose window contains `at`. A round hint
    /// restricts the search to that round.
    pub fn covering_assignment(
        &self,
        agent_id: &str,
        round_hint: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<Assignment>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM assignment
                     WHERE agent_id = ?1
                       AND status IN ('scheduled', 'active')
                       AND start_ms <= ?2 AND end_ms >= ?2
                       AND (?3 IS NULL OR round_id = ?3)
                     ORDER BY start_ms, id LIMIT 1"
                ),
                params![agent_id, to_ms(at), round_hint],
                assignment_from_row,
            )
            .optional()?)
    }

    /// All scheduled or active assignments.
    pub fn open_assignments(&self) -> Result<Vec<Assignment>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignment
             WHERE status IN ('scheduled', 'active') ORDER BY start_ms, id"
        ))?;
        let rows = stmt
            .query_map([], assignment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Active assignments whose end lies in `[from, to]`.
    pub fn active_assignments_ended_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Assignment>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignment
             WHERE status = 'active' AND end_ms >= ?1 AND end_ms <= ?2
             ORDER BY end_ms, id"
        ))?;
        let rows = stmt
            .query_map([to_ms(from), to_ms(to)], assignment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Open assignments already started by `now` with no auto or confirmed arrival.
    pub fn started_assignments_without_arrival(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignment a
             WHERE a.status IN ('scheduled', 'active')
               AND a.start_ms <= ?1
               AND NOT EXISTS (
                   SELECT 1 FROM check_in c
                   WHERE c.assignment_id = a.id
                     AND c.kind = 'arrival'
                     AND c.state IN ('auto', 'confirmed'))
             ORDER BY a.start_ms, a.id"
        ))?;
        let rows = stmt
            .query_map([to_ms(now)], assignment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Whether the agent holds another open assignment overlapping `[start, end]`.
    pub fn agent_has_overlap(
        &self,
        agent_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_id: Option<&str>,
    ) -> Result<bool> {
        let conn = self.connect()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM assignment
                WHERE agent_id = ?1
                  AND status IN ('scheduled', 'active')
                  AND start_ms <= ?3 AND end_ms >= ?2
                  AND (?4 IS NULL OR id != ?4))",
            params![agent_id, to_ms(start), to_ms(end), exclude_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Sets `status` to `to` only if it still reads `from`.
    pub fn compare_and_set_status(
        &self,
        id: &str,
        from: AssignmentStatus,
        to: AssignmentStatus,
    ) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn.execute(
            "UPDATE assignment SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to, id, from],
        )?;
        Ok(rows == 1)
    }

    /// Applies an operator transition against the status read at write time.
    /// Returns `None` when the action does not apply.
    pub fn apply_manual_action(
        &self,
        id: &str,
        action: ManualAction,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusChange>> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let assignment = load_assignment(&tx, id)?.ok_or_else(|| StoreError::NotFound {
            kind: "assignment",
            id: id.to_string(),
        })?;

        let Some(to) = Lifecycle::manual(&assignment, action, now) else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE assignment SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to, id, assignment.status],
        )?;
        tx.commit()?;
        Ok(Some(StatusChange {
            from: assignment.status,
            to,
        }))
    }
}
