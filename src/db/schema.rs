//! SQL DDL for all Echo tables.
//!
//! Defines the `memories` (content store with cooldown and engagement state),
//! `interactions` (append-only interaction log), and `schema_meta` tables. All
//! DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for Echo's core tables.
const SCHEMA_SQL: &str = r#"
-- Curated media memories and their scheduling state
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    media_type TEXT NOT NULL CHECK(media_type IN ('photo','video')),
    media_url TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'processing' CHECK(status IN ('processing','needs_review','approved')),
    script TEXT,
    audio_url TEXT,
    cooldown_until TEXT,
    engagement_count INTEGER NOT NULL DEFAULT 0 CHECK(engagement_count >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_patient ON memories(patient_id);
CREATE INDEX IF NOT EXISTS idx_memories_status ON memories(status);
CREATE INDEX IF NOT EXISTS idx_memories_cooldown ON memories(cooldown_until);

-- Append-only interaction log
CREATE TABLE IF NOT EXISTS interactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    patient_id TEXT NOT NULL,
    interaction_type TEXT NOT NULL CHECK(interaction_type IN ('like','recall','skip','video_generated')),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_interactions_memory ON interactions(memory_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
