//! Database query functions for the `plan_history` table.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqliteExecutor;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::HistoryRow;

/// Fetch the stored history cursor of a profile.
pub async fn get_history<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
) -> Result<Option<HistoryRow>> {
    let row = sqlx::query_as::<_, HistoryRow>("SELECT * FROM plan_history WHERE profile_id = ?1")
        .bind(profile_id)
        .fetch_optional(executor)
        .await
        .with_context(|| format!("failed to fetch history for profile {profile_id}"))?;

    Ok(row)
}

/// Insert or replace the history cursor of a profile.
pub async fn save_history<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
    current_snapshot_id: Option<Uuid>,
    undo: &[Uuid],
    redo: &[Uuid],
) -> Result<()> {
    sqlx::query(
        "INSERT INTO plan_history (profile_id, current_snapshot_id, undo_stack, redo_stack, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (profile_id) DO UPDATE SET \
             current_snapshot_id = excluded.current_snapshot_id, \
             undo_stack = excluded.undo_stack, \
             redo_stack = excluded.redo_stack, \
             updated_at = excluded.updated_at",
    )
    .bind(profile_id)
    .bind(current_snapshot_id)
    .bind(Json(undo))
    .bind(Json(redo))
    .bind(Utc::now())
    .execute(executor)
    .await
    .with_context(|| format!("failed to save history for profile {profile_id}"))?;

    Ok(())
}
