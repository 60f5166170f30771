//! Caregiver commands: ingest, review queue, approval and script edits.

use anyhow::Result;

use echo::config::EchoConfig;
use echo::memory::curation;
use echo::memory::types::{MediaType, Memory};

fn open(config: &EchoConfig) -> Result<rusqlite::Connection> {
    echo::db::open_database(config.resolved_db_path())
}

pub fn ingest(config: &EchoConfig, media_type: MediaType, url: &str) -> Result<()> {
    let conn = open(config)?;
    let memory = curation::ingest(&conn, &config.storage.patient_id, media_type, url)?;
    println!("Ingested {} ({}), status {}", memory.id, memory.media_type, memory.status);
    Ok(())
}

pub fn review(config: &EchoConfig) -> Result<()> {
    let conn = open(config)?;
    let queue = curation::review_queue(&conn, &config.storage.patient_id)?;

    if queue.is_empty() {
        println!("Review queue is empty.");
        return Ok(());
    }

    println!("Review queue ({})", queue.len());
    println!("{}", "=".repeat(50));
    for memory in &queue {
        print_summary(memory);
    }
    Ok(())
}

pub fn analyzed(config: &EchoConfig, id: &str, script: &str) -> Result<()> {
    let conn = open(config)?;
    let memory = curation::mark_needs_review(&conn, id, script)?;
    println!("{} is ready for review", memory.id);
    Ok(())
}

pub fn approve(config: &EchoConfig, id: &str) -> Result<()> {
    let conn = open(config)?;
    let memory = curation::approve(&conn, id)?;
    println!("{} approved", memory.id);
    Ok(())
}

pub fn reject(config: &EchoConfig, id: &str) -> Result<()> {
    let mut conn = open(config)?;
    let result = curation::reject(&mut conn, id)?;
    println!(
        "{} rejected ({} interaction records removed)",
        result.id, result.interactions_removed
    );
    Ok(())
}

pub fn script(config: &EchoConfig, id: &str, text: &str) -> Result<()> {
    let conn = open(config)?;
    let memory = curation::update_script(&conn, id, text)?;
    println!("{} script updated; audio will be regenerated on next view", memory.id);
    Ok(())
}

fn print_summary(memory: &Memory) {
    println!(
        "  {} [{}] {} {}",
        memory.id, memory.status, memory.media_type, memory.media_url
    );
    if let Some(ref script) = memory.script {
        println!("      \"{script}\"");
    }
}
