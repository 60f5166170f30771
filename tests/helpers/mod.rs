#![allow(dead_code)]

use chrono::{DateTime, Utc};
use echo::db;
use echo::feed::mode::SundowningSchedule;
use echo::feed::FeedSettings;
use echo::memory::types::{InteractionType, MediaType, Memory};
use echo::memory::{curation, store};
use rusqlite::{params, Connection};

pub const PATIENT: &str = "patient-1";

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Ingest, review and approve a photo in one go.
pub fn approved_photo(conn: &Connection, url: &str) -> Memory {
    approved(conn, MediaType::Photo, url, Some("A day to remember."))
}

/// Approved photo with no cached narration.
pub fn unnarrated_photo(conn: &Connection, url: &str) -> Memory {
    approved(conn, MediaType::Photo, url, None)
}

fn approved(conn: &Connection, media_type: MediaType, url: &str, script: Option<&str>) -> Memory {
    let memory = curation::ingest(conn, PATIENT, media_type, url).unwrap();
    curation::mark_needs_review(conn, &memory.id, "pending caregiver edit").unwrap();
    curation::approve(conn, &memory.id).unwrap();
    match script {
        Some(text) => {
            store::save_narration(conn, &memory.id, text, &format!("{url}.mp3")).unwrap();
        }
        None => {
            conn.execute(
                "UPDATE memories SET script = NULL, audio_url = NULL WHERE id = ?1",
                params![memory.id],
            )
            .unwrap();
        }
    }
    store::get_memory(conn, &memory.id).unwrap()
}

/// Record a recall from an earlier session.
pub fn recalled_before(conn: &Connection, memory_id: &str) {
    store::append_interaction(conn, memory_id, PATIENT, InteractionType::Recall).unwrap();
}

pub fn set_engagement(conn: &Connection, memory_id: &str, count: u32) {
    conn.execute(
        "UPDATE memories SET engagement_count = ?1 WHERE id = ?2",
        params![count, memory_id],
    )
    .unwrap();
}

pub fn set_cooldown(conn: &Connection, memory_id: &str, until: Option<DateTime<Utc>>) {
    store::update_cooldown(conn, memory_id, until).unwrap();
}

/// Default feed settings for [`PATIENT`] with the wall-clock sundowning check off.
pub fn feed_settings() -> FeedSettings {
    FeedSettings {
        patient_id: PATIENT.to_string(),
        sundowning: SundowningSchedule::disabled(),
        ..FeedSettings::default()
    }
}
