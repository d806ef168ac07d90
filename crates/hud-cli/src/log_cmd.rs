//! `hud log` and `hud note`: read and append to the memory log.

use anyhow::Result;

use hud_core::gateway::PlanGateway;
use hud_core::memory::MemoryEntry;

/// Show the newest entries, oldest of them first.
pub async fn run_log(gateway: &PlanGateway, profile_id: &str, limit: usize) -> Result<()> {
    let mut entries = gateway.list_entries(profile_id, limit).await?;
    if entries.is_empty() {
        println!("No entries recorded for profile {profile_id}.");
        return Ok(());
    }
    entries.reverse();

    println!("Entries ({}):", entries.len());
    for entry in &entries {
        println!("  {}", format_entry(entry));
    }
    Ok(())
}

pub async fn run_note(gateway: &PlanGateway, profile_id: &str, text: &str) -> Result<()> {
    let entry = gateway.record_note(profile_id, text).await?;
    println!("Note recorded at {}.", entry.created_at.format("%H:%M:%S"));
    Ok(())
}

fn format_entry(entry: &MemoryEntry) -> String {
    let time = entry.created_at.format("%Y-%m-%d %H:%M:%S");
    let summary = truncate(&entry.payload.summary(), 100);
    format!(
        "[{time}] {:<16} {:<8} {summary}",
        entry.entry_type().to_string(),
        entry.source
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let kept: String = single_line.chars().take(max_chars - 3).collect();
    format!("{kept}...")
}
