//! Caregiver curation lifecycle.
//!
//! Uploads enter as `processing`, move to `needs_review` once analysis has produced a
//! script, and join the patient feed only after a caregiver approves them. Rejection
//! hard-deletes a memory that never reached the feed.

use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;

use super::store::{self, row_to_memory, MEMORY_COLUMNS};
use crate::memory::types::{format_timestamp, ApprovalStatus, MediaType, Memory};

/// Result returned from a reject operation.
#[derive(Debug, Serialize)]
pub struct RejectResult {
    pub id: String,
    /// Interaction log rows removed with the memory.
    pub interactions_removed: usize,
}

/// Register a newly uploaded photo or video. Starts in `processing`.
pub fn ingest(
    conn: &Connection,
    patient_id: &str,
    media_type: MediaType,
    media_url: &str,
) -> Result<Memory> {
    if media_url.trim().is_empty() {
        bail!("media url must not be empty");
    }
    let memory = store::insert_memory(conn, patient_id, media_type, media_url)?;
    tracing::info!(memory_id = %memory.id, media_type = %media_type, "memory ingested");
    Ok(memory)
}

/// Record the analysis script and hand the memory to the caregiver review queue.
pub fn mark_needs_review(conn: &Connection, memory_id: &str, script: &str) -> Result<Memory> {
    let memory = store::get_memory(conn, memory_id)?;
    if memory.status != ApprovalStatus::Processing {
        bail!(
            "memory {memory_id} is {}, expected {}",
            memory.status,
            ApprovalStatus::Processing
        );
    }

    conn.execute(
        "UPDATE memories SET script = ?1, status = 'needs_review', updated_at = ?2 WHERE id = ?3",
        params![script, format_timestamp(Utc::now()), memory_id],
    )?;
    store::get_memory(conn, memory_id)
}

/// Approve a reviewed memory, making it schedulable.
pub fn approve(conn: &Connection, memory_id: &str) -> Result<Memory> {
    let memory = store::get_memory(conn, memory_id)?;
    match memory.status {
        ApprovalStatus::NeedsReview => {}
        ApprovalStatus::Approved => return Ok(memory),
        ApprovalStatus::Processing => {
            bail!("memory {memory_id} is still processing and cannot be approved yet")
        }
    }

    conn.execute(
        "UPDATE memories SET status = 'approved', updated_at = ?1 WHERE id = ?2",
        params![format_timestamp(Utc::now()), memory_id],
    )?;
    tracing::info!(memory_id = %memory_id, "memory approved");
    store::get_memory(conn, memory_id)
}

/// Replace the narration text. The cached audio no longer matches, so it is dropped
/// and will be regenerated the next time the memory is shown.
pub fn update_script(conn: &Connection, memory_id: &str, script: &str) -> Result<Memory> {
    if script.trim().is_empty() {
        bail!("script must not be empty");
    }
    let rows = conn.execute(
        "UPDATE memories SET script = ?1, audio_url = NULL, updated_at = ?2 WHERE id = ?3",
        params![script, format_timestamp(Utc::now()), memory_id],
    )?;
    if rows == 0 {
        bail!("memory not found: {memory_id}");
    }
    store::get_memory(conn, memory_id)
}

/// Reject a memory from the review queue. Approved memories are not rejectable.
pub fn reject(conn: &mut Connection, memory_id: &str) -> Result<RejectResult> {
    let tx = conn.transaction()?;

    let memory = store::get_memory(&tx, memory_id)?;
    if memory.status == ApprovalStatus::Approved {
        bail!("memory {memory_id} is already approved; only queued memories can be rejected");
    }

    let interactions_removed = tx.execute(
        "DELETE FROM interactions WHERE memory_id = ?1",
        params![memory_id],
    )?;
    tx.execute("DELETE FROM memories WHERE id = ?1", params![memory_id])?;
    tx.commit()?;

    tracing::info!(memory_id = %memory_id, "memory rejected");
    Ok(RejectResult {
        id: memory_id.to_string(),
        interactions_removed,
    })
}

/// Memories waiting on analysis or caregiver review, newest first.
pub fn review_queue(conn: &Connection, patient_id: &str) -> Result<Vec<Memory>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMORY_COLUMNS} FROM memories \
         WHERE patient_id = ?1 AND status IN ('processing', 'needs_review') \
         ORDER BY created_at DESC, id DESC"
    ))?;
    let queue = stmt
        .query_map(params![patient_id], row_to_memory)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(queue)
}
