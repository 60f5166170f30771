//! CLI `feed` command: preview a novelty-weighted sample of the eligible pool.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;

use echo::config::EchoConfig;
use echo::feed::policy::{FeedSession, ScoringParams, SelectionPolicy};

pub fn feed(config: &EchoConfig, count: usize) -> Result<()> {
    let conn = echo::db::open_database(config.resolved_db_path())?;
    let now = Utc::now();
    let pool = echo::memory::store::list_eligible(&conn, &config.storage.patient_id, now)?;

    if pool.is_empty() {
        println!("No eligible memories. Approve some with `echo approve <id>`.");
        return Ok(());
    }

    let pool_size = pool.len();
    let session = FeedSession::new(config.storage.patient_id.clone(), pool, HashSet::new());
    let policy = SelectionPolicy::new(ScoringParams::from_config(&config.scheduling));
    let batch = session.next_batch(&policy, count, now, &mut rand::rng());

    println!(
        "Feed preview: {} of {} eligible (novelty {:?})",
        batch.len(),
        pool_size,
        config.scheduling.novelty_weight
    );
    println!("{}", "=".repeat(50));
    for (i, memory) in batch.iter().enumerate() {
        println!(
            "  {:>2}. {} {} engagement={} {}",
            i + 1,
            memory.id,
            memory.media_type,
            memory.engagement_count,
            memory.media_url
        );
    }
    Ok(())
}
