//! Database query functions for the `memory_entries` table.
//!
//! Rows are ordered by `(created_at, seq)`: `seq` breaks ties between entries
//! recorded within the same timestamp.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;
use uuid::Uuid;

use crate::models::{EntryType, MemoryEntryRow};

/// Parameters for inserting a new memory entry row.
#[derive(Debug, Clone)]
pub struct NewMemoryEntry {
    pub id: Uuid,
    pub profile_id: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub entry_type: EntryType,
    pub payload: String,
    pub snapshot_id: Option<Uuid>,
    pub base_snapshot_id: Option<Uuid>,
}

/// Insert a new memory entry. Returns the inserted row including its `seq`.
pub async fn insert_entry<'e>(
    executor: impl SqliteExecutor<'e>,
    new: &NewMemoryEntry,
) -> Result<MemoryEntryRow> {
    let row = sqlx::query_as::<_, MemoryEntryRow>(
        "INSERT INTO memory_entries \
             (id, profile_id, created_at, source, entry_type, payload, snapshot_id, base_snapshot_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         RETURNING *",
    )
    .bind(new.id)
    .bind(&new.profile_id)
    .bind(new.created_at)
    .bind(&new.source)
    .bind(new.entry_type)
    .bind(&new.payload)
    .bind(new.snapshot_id)
    .bind(new.base_snapshot_id)
    .fetch_one(executor)
    .await
    .with_context(|| {
        format!(
            "failed to insert {} entry for profile {}",
            new.entry_type, new.profile_id
        )
    })?;

    Ok(row)
}

/// Fetch the `plan_snapshot` entry carrying the given snapshot id.
pub async fn get_snapshot_entry<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
    snapshot_id: Uuid,
) -> Result<Option<MemoryEntryRow>> {
    let row = sqlx::query_as::<_, MemoryEntryRow>(
        "SELECT * FROM memory_entries \
         WHERE profile_id = ?1 AND entry_type = 'plan_snapshot' AND snapshot_id = ?2",
    )
    .bind(profile_id)
    .bind(snapshot_id)
    .fetch_optional(executor)
    .await
    .with_context(|| format!("failed to fetch snapshot {snapshot_id}"))?;

    Ok(row)
}

/// List the most recent entries of a profile, newest first.
pub async fn list_recent_entries<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
    limit: i64,
) -> Result<Vec<MemoryEntryRow>> {
    let rows = sqlx::query_as::<_, MemoryEntryRow>(
        "SELECT * FROM memory_entries \
         WHERE profile_id = ?1 \
         ORDER BY created_at DESC, seq DESC \
         LIMIT ?2",
    )
    .bind(profile_id)
    .bind(limit)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to list entries for profile {profile_id}"))?;

    Ok(rows)
}

/// List every snapshot entry of a profile, oldest first.
pub async fn list_snapshot_entries<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
) -> Result<Vec<MemoryEntryRow>> {
    let rows = sqlx::query_as::<_, MemoryEntryRow>(
        "SELECT * FROM memory_entries \
         WHERE profile_id = ?1 AND entry_type = 'plan_snapshot' \
         ORDER BY created_at ASC, seq ASC",
    )
    .bind(profile_id)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to list snapshots for profile {profile_id}"))?;

    Ok(rows)
}

/// Snapshot ids with their parent pointers, oldest first.
pub async fn snapshot_links<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
) -> Result<Vec<(Uuid, Option<Uuid>)>> {
    let rows: Vec<(Uuid, Option<Uuid>)> = sqlx::query_as(
        "SELECT snapshot_id, base_snapshot_id FROM memory_entries \
         WHERE profile_id = ?1 AND entry_type = 'plan_snapshot' AND snapshot_id IS NOT NULL \
         ORDER BY created_at ASC, seq ASC",
    )
    .bind(profile_id)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to list snapshot links for profile {profile_id}"))?;

    Ok(rows)
}

/// Count entries of a profile, optionally restricted to one type.
pub async fn count_entries<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
    entry_type: Option<EntryType>,
) -> Result<i64> {
    let count: (i64,) = match entry_type {
        Some(kind) => sqlx::query_as(
            "SELECT COUNT(*) FROM memory_entries WHERE profile_id = ?1 AND entry_type = ?2",
        )
        .bind(profile_id)
        .bind(kind)
        .fetch_one(executor)
        .await,
        None => sqlx::query_as("SELECT COUNT(*) FROM memory_entries WHERE profile_id = ?1")
            .bind(profile_id)
            .fetch_one(executor)
            .await,
    }
    .with_context(|| format!("failed to count entries for profile {profile_id}"))?;

    Ok(count.0)
}

/// Delete all but the `keep` most recent snapshot entries of a profile.
///
/// Returns the number of rows removed.
pub async fn trim_snapshots<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
    keep: i64,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM memory_entries \
         WHERE profile_id = ?1 AND entry_type = 'plan_snapshot' \
           AND seq NOT IN ( \
               SELECT seq FROM memory_entries \
               WHERE profile_id = ?1 AND entry_type = 'plan_snapshot' \
               ORDER BY created_at DESC, seq DESC \
               LIMIT ?2 \
           )",
    )
    .bind(profile_id)
    .bind(keep)
    .execute(executor)
    .await
    .with_context(|| format!("failed to trim snapshots for profile {profile_id}"))?;

    Ok(result.rows_affected())
}

/// Delete all but the `keep` most recent entries of a profile, any type.
///
/// Returns the number of rows removed.
pub async fn trim_entries<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
    keep: i64,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM memory_entries \
         WHERE profile_id = ?1 \
           AND seq NOT IN ( \
               SELECT seq FROM memory_entries \
               WHERE profile_id = ?1 \
               ORDER BY created_at DESC, seq DESC \
               LIMIT ?2 \
           )",
    )
    .bind(profile_id)
    .bind(keep)
    .execute(executor)
    .await
    .with_context(|| format!("failed to trim entries for profile {profile_id}"))?;

    Ok(result.rows_affected())
}
