//! Echo: an adaptive reminiscence feed for people living with dementia.
//!
//! Caregivers upload photos and videos ("memories"), review their narration, and
//! approve them. The patient sees a feed that favors what they have seen least,
//! hides liked memories for a while, asks "do you remember this?" about memories
//! they recalled before, and switches to voice control when taps keep missing.
//!
//! # Architecture
//!
//! - **Storage**: SQLite (WAL) holding memories and an append-only interaction log
//! - **Scheduling**: novelty-weighted random sampling with cooldown windows
//! - **Runtime**: a tokio-driven controller; persistence and narration never block navigation
//!
//! # Modules
//!
//! - [`config`]: configuration from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, and health checks
//! - [`memory`]: data model, content store, interaction log, caregiver curation, stats
//! - [`feed`]: the adaptive feed scheduler

pub mod config;
pub mod db;
pub mod feed;
pub mod memory;
