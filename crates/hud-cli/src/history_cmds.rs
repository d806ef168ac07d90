//! `hud undo`, `hud redo`, `hud rollback`, and `hud history`.

use anyhow::{Context, Result};
use uuid::Uuid;

use hud_core::gateway::PlanGateway;

use crate::plan_cmds::print_outcome;

pub async fn run_undo(gateway: &PlanGateway, profile_id: &str) -> Result<()> {
    let outcome = gateway.undo(profile_id).await?;
    print_outcome("Undone", &outcome);
    Ok(())
}

pub async fn run_redo(gateway: &PlanGateway, profile_id: &str) -> Result<()> {
    let outcome = gateway.redo(profile_id).await?;
    print_outcome("Redone", &outcome);
    Ok(())
}

/// Restore an earlier snapshot. Accepts a full snapshot id or a unique
/// prefix of one, as printed by `hud history`.
pub async fn run_rollback(gateway: &PlanGateway, profile_id: &str, target: &str) -> Result<()> {
    let snapshot_id = match Uuid::parse_str(target) {
        Ok(id) => id,
        Err(_) => resolve_prefix(gateway, profile_id, target).await?,
    };
    let outcome = gateway.rollback(profile_id, snapshot_id).await?;
    print_outcome("Rolled back", &outcome);
    Ok(())
}

async fn resolve_prefix(gateway: &PlanGateway, profile_id: &str, prefix: &str) -> Result<Uuid> {
    let prefix = prefix.to_ascii_lowercase();
    let matches: Vec<Uuid> = gateway
        .list_snapshots(profile_id)
        .await?
        .into_iter()
        .map(|s| s.snapshot_id)
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => anyhow::bail!("no snapshot matches {prefix:?}"),
        _ => anyhow::bail!("{prefix:?} matches {} snapshots; use more characters", matches.len()),
    }
}

/// List retained snapshots, oldest first, marking the current one.
pub async fn run_history(gateway: &PlanGateway, profile_id: &str) -> Result<()> {
    let snapshots = gateway
        .list_snapshots(profile_id)
        .await
        .context("failed to load snapshots")?;
    if snapshots.is_empty() {
        println!("No snapshots for profile {profile_id}.");
        return Ok(());
    }

    let history = gateway.history(profile_id).await?;

    println!(
        "  {:<36}  {:<19}  {:<8}  {:>7}  REASON",
        "SNAPSHOT", "CREATED", "ACTOR", "WIDGETS"
    );
    println!("{}", "-".repeat(100));
    for s in &snapshots {
        let marker = if s.is_current { "*" } else { " " };
        let actor = s.actor.map_or_else(|| "?".to_string(), |a| a.to_string());
        let widgets = s
            .widget_count
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        let reason = s.reason.as_deref().unwrap_or("(unreadable)");
        println!(
            "{marker} {:<36}  {:<19}  {:<8}  {:>7}  {reason}",
            s.snapshot_id,
            s.created_at.format("%Y-%m-%d %H:%M:%S"),
            actor,
            widgets,
        );
    }
    println!();
    println!(
        "Undo available: {}  Redo available: {}",
        history.undo.len(),
        history.redo.len()
    );

    Ok(())
}
