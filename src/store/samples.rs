use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use crate::model::PositionSample;

use super::codec::timestamp;
use super::{Result, Store, to_ms};

pub(super) const SAMPLE_COLUMNS: &str = "id, agent_id, round_id, latitude, longitude, accuracy, \
     altitude, timestamp_ms, source, in_zone, distance_m, received_at_ms";

pub(super) fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<PositionSample> {
    Ok(PositionSample {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        round_id: row.get(2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        accuracy: row.get(5)?,
        altitude: row.get(6)?,
        timestamp: timestamp(row, 7)?,
        source: row.get(8)?,
        in_zone: row.get(9)?,
        distance_m: row.get(10)?,
        received_at: timestamp(row, 11)?,
    })
}

impl Store {
    pub fn insert_sample(&self, sample: &PositionSample) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            &format!(
                "INSERT INTO position_sample ({SAMPLE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                sample.id,
                sample.agent_id,
                sample.round_id,
                sample.latitude,
                sample.longitude,
                sample.accuracy,
                sample.altitude,
                to_ms(sample.timestamp),
                sample.source,
                sample.in_zone,
                sample.distance_m,
                to_ms(sample.received_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_sample(&self, id: &str) -> Result<Option<PositionSample>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                &format!("SELECT {SAMPLE_COLUMNS} FROM position_sample WHERE id = ?1"),
                [id],
                sample_from_row,
            )
            .optional()?)
    }

    /// Writes the zone classification. A resolved round fills an unknown
    /// `round_id` but never overwrites a known one.
    pub fn set_classification(
        &self,
        id: &str,
        round_id: Option<&str>,
        in_zone: bool,
        distance_m: f64,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE position_sample
             SET round_id = COALESCE(round_id, ?2), in_zone = ?3, distance_m = ?4
             WHERE id = ?1",
            params![id, round_id, in_zone, distance_m],
        )?;
        Ok(())
    }

    /// Fills the round of a sample that had none. Returns whether it changed.
    pub fn backfill_sample_round(&self, id: &str, round_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn.execute(
            "UPDATE position_sample SET round_id = ?2 WHERE id = ?1 AND round_id IS NULL",
            params![id, round_id],
        )?;
        Ok(rows == 1)
    }

    /// The most recent in-zone sample for the agent and round with a
    /// timestamp in `[from, before)`.
    pub fn latest_in_zone_anchor(
        &self,
        agent_id: &str,
        round_id: &str,
        from: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Option<PositionSample>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {SAMPLE_COLUMNS} FROM position_sample
                     WHERE agent_id = ?1 AND round_id = ?2 AND in_zone = 1
                       AND timestamp_ms >= ?3 AND timestamp_ms < ?4
                     ORDER BY timestamp_ms DESC LIMIT 1"
                ),
                params![agent_id, round_id, to_ms(from), to_ms(before)],
                sample_from_row,
            )
            .optional()?)
    }

    /// Samples received for an agent, oldest first.
    pub fn samples_for_agent(&self, agent_id: &str) -> Result<Vec<PositionSample>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM position_sample
             WHERE agent_id = ?1 ORDER BY timestamp_ms, received_at_ms"
        ))?;
        let rows = stmt
            .query_map([agent_id], sample_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
