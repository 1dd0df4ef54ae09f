use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Alert, AlertAction, AlertKind, AlertState, AlertSubject};

use super::codec::{opt_timestamp, timestamp};
use super::{Result, Store, is_constraint_violation, to_ms};

const ALERT_COLUMNS: &str = "id, kind, severity, subject_type, agent_id, round_id, state, \
     title, description, created_at_ms, resolved_at_ms";

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    let subject_type: String = row.get(3)?;
    let agent_id: Option<String> = row.get(4)?;
    let round_id: String = row.get(5)?;
    let subject = match (subject_type.as_str(), agent_id) {
        ("agent_round", Some(agent_id)) => AlertSubject::AgentRound { agent_id, round_id },
        ("round", _) => AlertSubject::Round { round_id },
        (other, _) => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("bad alert subject: {other}").into(),
            ));
        }
    };
    Ok(Alert {
        id: row.get(0)?,
        kind: row.get(1)?,
        severity: row.get(2)?,
        subject,
        state: row.get(6)?,
        title: row.get(7)?,
        description: row.get(8)?,
        created_at: timestamp(row, 9)?,
        resolved_at: opt_timestamp(row, 10)?,
    })
}

fn active_exists(conn: &Connection, kind: AlertKind, subject: &AlertSubject) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM alert
                        WHERE subject_type = ?1 AND subject_key = ?2 AND kind = ?3
                          AND state = 'active')",
        params![subject.subject_type(), subject.key(), kind],
        |row| row.get(0),
    )?)
}

/// An alert the audit wants raised.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub kind: AlertKind,
    pub subject: AlertSubject,
    pub title: String,
    pub description: String,
}

impl Store {
    /// Raises an alert unless one is already active for the same subject and
    /// kind. Returns the new alert, or `None` when deduplicated.
    pub fn raise_alert(&self, new: &NewAlert, now: DateTime<Utc>) -> Result<Option<Alert>> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if active_exists(&tx, new.kind, &new.subject)? {
            return Ok(None);
        }

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            kind: new.kind,
            severity: new.kind.severity(),
            subject: new.subject.clone(),
            state: AlertState::Active,
            title: new.title.clone(),
            description: new.description.clone(),
            created_at: now,
            resolved_at: None,
        };
        let inserted = tx.execute(
            "INSERT INTO alert (id, kind, severity, subject_type, subject_key, agent_id, round_id,
                                state, title, description, created_at_ms, resolved_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL)",
            params![
                alert.id,
                alert.kind,
                alert.severity,
                alert.subject.subject_type(),
                alert.subject.key(),
                alert.subject.agent_id(),
                alert.subject.round_id(),
                alert.state,
                alert.title,
                alert.description,
                to_ms(alert.created_at),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        tx.commit()?;
        Ok(Some(alert))
    }

    /// Alerts newest first, optionally filtered by state.
    pub fn list_alerts(&self, state: Option<AlertState>) -> Result<Vec<Alert>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM alert
             WHERE (?1 IS NULL OR state = ?1)
             ORDER BY created_at_ms DESC, id"
        ))?;
        let rows = stmt
            .query_map([state], alert_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn find_alert(&self, id: &str) -> Result<Option<Alert>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                &format!("SELECT {ALERT_COLUMNS} FROM alert WHERE id = ?1"),
                [id],
                alert_from_row,
            )
            .optional()?)
    }

    /// Applies an operator action. Returns the new state, or `None` when the
    /// action does not apply (including a reopen that would duplicate an
    /// already active alert).
    pub fn apply_alert_action(
        &self,
        id: &str,
        action: AlertAction,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertState>> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let alert = tx
            .query_row(
                &format!("SELECT {ALERT_COLUMNS} FROM alert WHERE id = ?1"),
                [id],
                alert_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                kind: "alert",
                id: id.to_string(),
            })?;

        let Some(target) = action.target(alert.state) else {
            return Ok(None);
        };
        let resolved_at = match target {
            AlertState::Resolved => Some(to_ms(now)),
            AlertState::Active => {
                if active_exists(&tx, alert.kind, &alert.subject)? {
                    return Ok(None);
                }
                None
            }
            AlertState::Ignored => None,
        };
        tx.execute(
            "UPDATE alert SET state = ?2, resolved_at_ms = ?3 WHERE id = ?1",
            params![id, target, resolved_at],
        )?;
        tx.commit()?;
        Ok(Some(target))
    }
}
