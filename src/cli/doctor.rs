//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use echo::config::EchoConfig;
use echo::db;
use echo::feed::mode::SundowningSchedule;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &EchoConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `echo ingest` to create it.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("Echo Health Report");
    println!("==================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!();
    println!("Row counts:");
    println!("  Memories:        {}", report.memory_count);
    println!("  Interactions:    {}", report.interaction_count);
    println!();
    println!("Configuration:");
    println!("  Patient:         {}", config.storage.patient_id);
    println!("  Narration:       {}", config.narration.provider);
    let sundowning = SundowningSchedule::parse(&config.adaptation.sundowning_time);
    if sundowning.is_enabled() {
        println!("  Sundowning:      from {}", config.adaptation.sundowning_time);
    } else {
        println!(
            "  Sundowning:      disabled (could not parse {:?})",
            config.adaptation.sundowning_time
        );
    }
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery: restore {} from a backup.", db_path.display());
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
