//! Database query functions for the `plan_slots` table.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{SqliteConnection, SqliteExecutor};

use crate::models::{PlanSlot, PlanSlotKind};

/// Fetch one slot of a profile's plan.
pub async fn get_slot<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
    slot: PlanSlotKind,
) -> Result<Option<PlanSlot>> {
    let row = sqlx::query_as::<_, PlanSlot>(
        "SELECT * FROM plan_slots WHERE profile_id = ?1 AND slot = ?2",
    )
    .bind(profile_id)
    .bind(slot)
    .fetch_optional(executor)
    .await
    .with_context(|| format!("failed to fetch {slot} plan for profile {profile_id}"))?;

    Ok(row)
}

/// Insert or replace one slot of a profile's plan.
pub async fn upsert_slot<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
    slot: PlanSlotKind,
    plan_json: &str,
    digest: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO plan_slots (profile_id, slot, plan_json, digest, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (profile_id, slot) DO UPDATE SET \
             plan_json = excluded.plan_json, \
             digest = excluded.digest, \
             updated_at = excluded.updated_at",
    )
    .bind(profile_id)
    .bind(slot)
    .bind(plan_json)
    .bind(digest)
    .bind(Utc::now())
    .execute(executor)
    .await
    .with_context(|| format!("failed to write {slot} plan for profile {profile_id}"))?;

    Ok(())
}

/// Write the same plan to both the primary and the backup slot.
///
/// Callers run this inside a transaction so the two copies never diverge.
pub async fn save_current_plan(
    conn: &mut SqliteConnection,
    profile_id: &str,
    plan_json: &str,
    digest: &str,
) -> Result<()> {
    upsert_slot(&mut *conn, profile_id, PlanSlotKind::Primary, plan_json, digest).await?;
    upsert_slot(&mut *conn, profile_id, PlanSlotKind::Backup, plan_json, digest).await?;
    Ok(())
}

/// List every profile that has a primary plan, alphabetically.
pub async fn list_profiles<'e>(executor: impl SqliteExecutor<'e>) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT profile_id FROM plan_slots WHERE slot = 'primary' ORDER BY profile_id",
    )
    .fetch_all(executor)
    .await
    .context("failed to list profiles")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
