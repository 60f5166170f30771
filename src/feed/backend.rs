//! Collaborator seams the feed depends on, plus the SQLite adapter.
//!
//! The traits are synchronous like the rest of the storage layer. Async callers go
//! through [`blocking`], which hops onto `tokio::task::spawn_blocking`.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::memory::store;
use crate::memory::types::{InteractionType, Memory};

/// Failure reported by a [`ContentStore`] or [`InteractionLog`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("memory not found: {0}")]
    NotFound(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether repeating the same write could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    fn from_anyhow(err: anyhow::Error, memory_id: &str) -> Self {
        let message = format!("{err:#}");
        if message.starts_with("memory not found") {
            Self::NotFound(memory_id.to_string())
        } else {
            Self::Backend(message)
        }
    }
}

/// Approved memories plus their suppression and engagement state.
pub trait ContentStore: Send + Sync {
    /// Approved memories whose cooldown is unset or at/before `now`.
    fn list_eligible(&self, patient_id: &str, now: DateTime<Utc>)
        -> Result<Vec<Memory>, StoreError>;

    fn update_cooldown(
        &self,
        memory_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Returns the new engagement count.
    fn increment_engagement(&self, memory_id: &str) -> Result<u32, StoreError>;

    fn save_narration(
        &self,
        memory_id: &str,
        script: &str,
        audio_ref: &str,
    ) -> Result<(), StoreError>;
}

/// Append-only record of patient interactions.
pub trait InteractionLog: Send + Sync {
    fn append(
        &self,
        memory_id: &str,
        patient_id: &str,
        interaction_type: InteractionType,
    ) -> Result<(), StoreError>;

    /// Every memory the patient has recalled in any session.
    fn list_recalled(&self, patient_id: &str) -> Result<HashSet<String>, StoreError>;
}

/// Everything the feed controller needs from storage.
pub trait FeedStore: ContentStore + InteractionLog {}

impl<T: ContentStore + InteractionLog> FeedStore for T {}

/// Run a synchronous store call on the blocking pool.
pub async fn blocking<T, F>(store: &Arc<dyn FeedStore>, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn FeedStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(&*store))
        .await
        .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
}

/// [`FeedStore`] backed by the local SQLite database.
#[derive(Clone)]
pub struct SqliteBackend {
    db: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    /// Shared handle to the underlying connection.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db
            .lock()
            .map_err(|e| StoreError::Backend(format!("db lock poisoned: {e}")))
    }
}

impl ContentStore for SqliteBackend {
    fn list_eligible(
        &self,
        patient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Memory>, StoreError> {
        let conn = self.lock()?;
        store::list_eligible(&conn, patient_id, now)
            .map_err(|e| StoreError::Backend(format!("{e:#}")))
    }

    fn update_cooldown(
        &self,
        memory_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        store::update_cooldown(&conn, memory_id, until)
            .map_err(|e| StoreError::from_anyhow(e, memory_id))
    }

    fn increment_engagement(&self, memory_id: &str) -> Result<u32, StoreError> {
        let conn = self.lock()?;
        store::increment_engagement(&conn, memory_id)
            .map_err(|e| StoreError::from_anyhow(e, memory_id))
    }

    fn save_narration(
        &self,
        memory_id: &str,
        script: &str,
        audio_ref: &str,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        store::save_narration(&conn, memory_id, script, audio_ref)
            .map_err(|e| StoreError::from_anyhow(e, memory_id))
    }
}

impl InteractionLog for SqliteBackend {
    fn append(
        &self,
        memory_id: &str,
        patient_id: &str,
        interaction_type: InteractionType,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        store::append_interaction(&conn, memory_id, patient_id, interaction_type)
            .map(|_| ())
            .map_err(|e| StoreError::from_anyhow(e, memory_id))
    }

    fn list_recalled(&self, patient_id: &str) -> Result<HashSet<String>, StoreError> {
        let conn = self.lock()?;
        store::list_recalled(&conn, patient_id).map_err(|e| StoreError::Backend(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_memory_maps_to_not_found() {
        let backend = SqliteBackend::new(crate::db::open_memory_database().unwrap());
        let err = backend.increment_engagement("ghost").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref id) if id == "ghost"));
        assert!(!err.is_transient());
    }

    #[test]
    fn backend_errors_are_transient() {
        assert!(StoreError::Backend("disk I/O error".into()).is_transient());
    }

    #[tokio::test]
    async fn blocking_runs_store_calls() {
        let store: Arc<dyn FeedStore> =
            Arc::new(SqliteBackend::new(crate::db::open_memory_database().unwrap()));
        let recalled = blocking(&store, |s| s.list_recalled("p1")).await.unwrap();
        assert!(recalled.is_empty());
    }
}
