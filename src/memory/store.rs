//! Content store and interaction log: the SQLite side of the scheduler.
//!
//! Every mutator here is a single statement, so each cooldown write, engagement
//! increment, and log append is independently atomic. Nothing spans rows: a
//! failure in one write never leaves another half-applied.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;

use crate::memory::types::{
    format_timestamp, parse_timestamp, ApprovalStatus, Interaction, InteractionType, MediaType,
    Memory,
};

/// Column list matching [`row_to_memory`].
pub(crate) const MEMORY_COLUMNS: &str = "id, patient_id, media_type, media_url, status, script, \
     audio_url, cooldown_until, engagement_count, created_at, updated_at";

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(idx, e))
}

/// Map a row selected with [`MEMORY_COLUMNS`] into a [`Memory`].
pub(crate) fn row_to_memory(row: &Row) -> rusqlite::Result<Memory> {
    let media_type: String = row.get(2)?;
    let status: String = row.get(4)?;
    let cooldown_until = match row.get::<_, Option<String>>(7)? {
        Some(raw) => Some(parse_timestamp(&raw).map_err(|e| conversion_error(7, e))?),
        None => None,
    };

    Ok(Memory {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        media_type: media_type
            .parse::<MediaType>()
            .map_err(|e| conversion_error(2, e))?,
        media_url: row.get(3)?,
        status: status
            .parse::<ApprovalStatus>()
            .map_err(|e| conversion_error(4, e))?,
        script: row.get(5)?,
        audio_url: row.get(6)?,
        cooldown_until,
        engagement_count: row.get(8)?,
        created_at: timestamp_column(row, 9)?,
        updated_at: timestamp_column(row, 10)?,
    })
}

/// Insert a freshly uploaded memory in the `processing` state.
pub fn insert_memory(
    conn: &Connection,
    patient_id: &str,
    media_type: MediaType,
    media_url: &str,
) -> Result<Memory> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = format_timestamp(Utc::now());

    conn.execute(
        "INSERT INTO memories (id, patient_id, media_type, media_url, status, engagement_count, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, 'processing', 0, ?5, ?5)",
        params![id, patient_id, media_type.as_str(), media_url, now],
    )?;

    get_memory(conn, &id)
}

/// Fetch a single memory by ID.
pub fn get_memory(conn: &Connection, memory_id: &str) -> Result<Memory> {
    let memory = conn
        .query_row(
            &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
            params![memory_id],
            row_to_memory,
        )
        .optional()?;

    match memory {
        Some(m) => Ok(m),
        None => bail!("memory not found: {memory_id}"),
    }
}

/// The normal candidate pool: approved memories whose cooldown is unset or has lapsed.
pub fn list_eligible(
    conn: &Connection,
    patient_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Memory>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMORY_COLUMNS} FROM memories \
         WHERE patient_id = ?1 AND status = 'approved' \
           AND (cooldown_until IS NULL OR cooldown_until <= ?2) \
         ORDER BY created_at"
    ))?;

    let memories = stmt
        .query_map(params![patient_id, format_timestamp(now)], row_to_memory)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(memories)
}

/// Set or clear (`None`) a memory's suppression window.
pub fn update_cooldown(
    conn: &Connection,
    memory_id: &str,
    until: Option<DateTime<Utc>>,
) -> Result<()> {
    let rows = conn.execute(
        "UPDATE memories SET cooldown_until = ?1, updated_at = ?2 WHERE id = ?3",
        params![
            until.map(format_timestamp),
            format_timestamp(Utc::now()),
            memory_id
        ],
    )?;
    if rows == 0 {
        bail!("memory not found: {memory_id}");
    }
    Ok(())
}

/// Increment `engagement_count` by one in place. Returns the new count.
pub fn increment_engagement(conn: &Connection, memory_id: &str) -> Result<u32> {
    let count: Option<u32> = conn
        .query_row(
            "UPDATE memories SET engagement_count = engagement_count + 1, updated_at = ?1 \
             WHERE id = ?2 RETURNING engagement_count",
            params![format_timestamp(Utc::now()), memory_id],
            |row| row.get(0),
        )
        .optional()?;

    match count {
        Some(c) => Ok(c),
        None => bail!("memory not found: {memory_id}"),
    }
}

/// Write generated narration back to the memory so later views reuse it.
pub fn save_narration(
    conn: &Connection,
    memory_id: &str,
    script: &str,
    audio_url: &str,
) -> Result<()> {
    let rows = conn.execute(
        "UPDATE memories SET script = ?1, audio_url = ?2, updated_at = ?3 WHERE id = ?4",
        params![script, audio_url, format_timestamp(Utc::now()), memory_id],
    )?;
    if rows == 0 {
        bail!("memory not found: {memory_id}");
    }
    Ok(())
}

/// Append an entry to the interaction log. Returns the log row ID.
pub fn append_interaction(
    conn: &Connection,
    memory_id: &str,
    patient_id: &str,
    interaction_type: InteractionType,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO interactions (memory_id, patient_id, interaction_type, created_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            memory_id,
            patient_id,
            interaction_type.as_str(),
            format_timestamp(Utc::now())
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// IDs of every memory this patient has ever marked as recalled.
pub fn list_recalled(conn: &Connection, patient_id: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT memory_id FROM interactions \
         WHERE patient_id = ?1 AND interaction_type = 'recall'",
    )?;
    let ids = stmt
        .query_map(params![patient_id], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

/// Full interaction history for one memory, oldest first.
pub fn list_interactions(conn: &Connection, memory_id: &str) -> Result<Vec<Interaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, memory_id, patient_id, interaction_type, created_at FROM interactions \
         WHERE memory_id = ?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map(params![memory_id], |row| {
            let kind: String = row.get(3)?;
            Ok(Interaction {
                id: row.get(0)?,
                memory_id: row.get(1)?,
                patient_id: row.get(2)?,
                interaction_type: kind
                    .parse::<InteractionType>()
                    .map_err(|e| conversion_error(3, e))?,
                created_at: timestamp_column(row, 4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_db() -> Connection {
        crate::db::open_memory_database().unwrap()
    }

    fn approved(conn: &Connection, url: &str) -> Memory {
        let memory = insert_memory(conn, "p1", MediaType::Photo, url).unwrap();
        conn.execute(
            "UPDATE memories SET status = 'approved' WHERE id = ?1",
            params![memory.id],
        )
        .unwrap();
        get_memory(conn, &memory.id).unwrap()
    }

    #[test]
    fn test_insert_starts_processing() {
        let conn = test_db();
        let memory = insert_memory(&conn, "p1", MediaType::Video, "https://x/v.mp4").unwrap();
        assert_eq!(memory.status, ApprovalStatus::Processing);
        assert_eq!(memory.media_type, MediaType::Video);
        assert_eq!(memory.engagement_count, 0);
        assert!(memory.cooldown_until.is_none());
    }

    #[test]
    fn test_eligible_excludes_future_cooldown() {
        let conn = test_db();
        let now = Utc::now();
        let fresh = approved(&conn, "https://x/a.jpg");
        let cooling = approved(&conn, "https://x/b.jpg");
        let lapsed = approved(&conn, "https://x/c.jpg");
        let _pending = insert_memory(&conn, "p1", MediaType::Photo, "https://x/d.jpg").unwrap();

        update_cooldown(&conn, &cooling.id, Some(now + Duration::hours(2))).unwrap();
        update_cooldown(&conn, &lapsed.id, Some(now - Duration::hours(2))).unwrap();

        let ids: HashSet<String> = list_eligible(&conn, "p1", now)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&fresh.id));
        assert!(ids.contains(&lapsed.id));
    }

    #[test]
    fn test_eligible_is_scoped_to_patient() {
        let conn = test_db();
        approved(&conn, "https://x/a.jpg");
        assert!(list_eligible(&conn, "someone-else", Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_increment_engagement_returns_new_count() {
        let conn = test_db();
        let memory = approved(&conn, "https://x/a.jpg");
        assert_eq!(increment_engagement(&conn, &memory.id).unwrap(), 1);
        assert_eq!(increment_engagement(&conn, &memory.id).unwrap(), 2);
        assert_eq!(get_memory(&conn, &memory.id).unwrap().engagement_count, 2);
    }

    #[test]
    fn test_cooldown_can_be_cleared() {
        let conn = test_db();
        let memory = approved(&conn, "https://x/a.jpg");
        update_cooldown(&conn, &memory.id, Some(Utc::now() + Duration::hours(24))).unwrap();
        update_cooldown(&conn, &memory.id, None).unwrap();
        assert!(get_memory(&conn, &memory.id).unwrap().cooldown_until.is_none());
    }

    #[test]
    fn test_writes_to_missing_memory_fail() {
        let conn = test_db();
        let err = update_cooldown(&conn, "nope", None).unwrap_err();
        assert!(err.to_string().contains("memory not found"));
        assert!(increment_engagement(&conn, "nope").is_err());
        assert!(save_narration(&conn, "nope", "s", "a").is_err());
    }

    #[test]
    fn test_list_recalled_only_counts_recall_entries() {
        let conn = test_db();
        let a = approved(&conn, "https://x/a.jpg");
        let b = approved(&conn, "https://x/b.jpg");

        append_interaction(&conn, &a.id, "p1", InteractionType::Recall).unwrap();
        append_interaction(&conn, &a.id, "p1", InteractionType::Recall).unwrap();
        append_interaction(&conn, &b.id, "p1", InteractionType::Like).unwrap();

        let recalled = list_recalled(&conn, "p1").unwrap();
        assert_eq!(recalled.len(), 1);
        assert!(recalled.contains(&a.id));
        assert!(list_recalled(&conn, "p2").unwrap().is_empty());
    }

    #[test]
    fn test_interactions_are_listed_in_order() {
        let conn = test_db();
        let memory = approved(&conn, "https://x/a.jpg");
        append_interaction(&conn, &memory.id, "p1", InteractionType::Like).unwrap();
        append_interaction(&conn, &memory.id, "p1", InteractionType::Skip).unwrap();

        let log = list_interactions(&conn, &memory.id).unwrap();
        let kinds: Vec<InteractionType> = log.iter().map(|i| i.interaction_type).collect();
        assert_eq!(kinds, vec![InteractionType::Like, InteractionType::Skip]);
    }

    #[test]
    fn test_save_narration_round_trips() {
        let conn = test_db();
        let memory = approved(&conn, "https://x/a.jpg");
        save_narration(&conn, &memory.id, "A sunny day at the lake.", "https://x/a.mp3").unwrap();
        let stored = get_memory(&conn, &memory.id).unwrap();
        assert_eq!(stored.script.as_deref(), Some("A sunny day at the lake."));
        assert_eq!(stored.audio_url.as_deref(), Some("https://x/a.mp3"));
        assert!(!stored.needs_narration());
    }
}
