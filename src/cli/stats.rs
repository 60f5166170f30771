use anyhow::Result;
use chrono::Utc;

use echo::config::EchoConfig;

/// Display feed statistics in the terminal.
pub fn stats(config: &EchoConfig) -> Result<()> {
    let conn = echo::db::open_database(config.resolved_db_path())?;
    let response =
        echo::memory::stats::memory_stats(&conn, &config.storage.patient_id, Utc::now())?;

    println!("Memory Statistics ({})", config.storage.patient_id);
    println!("{}", "=".repeat(40));
    println!("  Total memories:      {}", response.total_memories);
    println!("  Eligible now:        {}", response.eligible_now);
    println!("  Cooling down:        {}", response.cooling_down);
    println!("  Total engagement:    {}", response.total_engagement);
    println!();

    println!("By Status:");
    for s in &["processing", "needs_review", "approved"] {
        let count = response.by_status.get(*s).copied().unwrap_or(0);
        println!("  {:<14} {}", s, count);
    }
    println!();

    println!("Interactions:");
    for t in &["like", "recall", "skip", "video_generated"] {
        let count = response.interactions_by_type.get(*t).copied().unwrap_or(0);
        println!("  {:<16} {}", t, count);
    }

    Ok(())
}
