use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;

use crate::memory::types::format_timestamp;

/// Response from memory_stats.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_memories: u64,
    pub by_status: HashMap<String, u64>,
    /// Approved memories currently inside a cooldown window.
    pub cooling_down: u64,
    /// Approved memories in the candidate pool right now.
    pub eligible_now: u64,
    pub total_engagement: u64,
    pub interactions_by_type: HashMap<String, u64>,
}

/// Compute content store statistics for one patient at `now`.
pub fn memory_stats(
    conn: &Connection,
    patient_id: &str,
    now: DateTime<Utc>,
) -> Result<StatsResponse> {
    let by_status = count_grouped(
        conn,
        "SELECT status, COUNT(*) FROM memories WHERE patient_id = ?1 GROUP BY status",
        patient_id,
    )?;
    let total_memories = by_status.values().sum();

    let now = format_timestamp(now);
    let cooling_down: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memories \
         WHERE patient_id = ?1 AND status = 'approved' AND cooldown_until > ?2",
        params![patient_id, now],
        |row| row.get(0),
    )?;
    let eligible_now: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memories \
         WHERE patient_id = ?1 AND status = 'approved' \
           AND (cooldown_until IS NULL OR cooldown_until <= ?2)",
        params![patient_id, now],
        |row| row.get(0),
    )?;
    let total_engagement: i64 = conn.query_row(
        "SELECT COALESCE(SUM(engagement_count), 0) FROM memories WHERE patient_id = ?1",
        params![patient_id],
        |row| row.get(0),
    )?;

    let interactions_by_type = count_grouped(
        conn,
        "SELECT interaction_type, COUNT(*) FROM interactions WHERE patient_id = ?1 \
         GROUP BY interaction_type",
        patient_id,
    )?;

    Ok(StatsResponse {
        total_memories,
        by_status,
        cooling_down: cooling_down as u64,
        eligible_now: eligible_now as u64,
        total_engagement: total_engagement as u64,
        interactions_by_type,
    })
}

fn count_grouped(conn: &Connection, sql: &str, patient_id: &str) -> Result<HashMap<String, u64>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![patient_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(|(k, v)| (k, v as u64)).collect())
}
