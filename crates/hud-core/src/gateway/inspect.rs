//! Read-only views of the memory log, plus free-form entries.

use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use hud_db::queries::memory as memory_db;

use crate::history::PlanHistory;
use crate::memory::{Actor, CaptureMetaPayload, MemoryEntry, MemoryPayload, NotePayload};

use super::{GatewayError, PlanGateway};

/// One row of the snapshot listing.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSummary {
    pub snapshot_id: Uuid,
    pub base_snapshot_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// `None` when the stored payload could not be decoded.
    pub actor: Option<Actor>,
    pub reason: Option<String>,
    pub widget_count: Option<usize>,
    pub is_current: bool,
}

impl PlanGateway {
    /// The newest `limit` entries of a profile, newest first. Entries whose
    /// payload cannot be decoded are skipped.
    pub async fn list_entries(
        &self,
        profile_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, GatewayError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = memory_db::list_recent_entries(&self.pool, profile_id, limit).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let seq = row.seq;
            match MemoryEntry::try_from(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(profile_id, seq, error = %e, "skipping unreadable entry"),
            }
        }
        Ok(entries)
    }

    /// Every retained snapshot, oldest first.
    pub async fn list_snapshots(
        &self,
        profile_id: &str,
    ) -> Result<Vec<SnapshotSummary>, GatewayError> {
        let history = self.history(profile_id).await?;
        let rows = memory_db::list_snapshot_entries(&self.pool, profile_id).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let snapshot_id = row.snapshot_id?;
                let base_snapshot_id = row.base_snapshot_id;
                let created_at = row.created_at;
                let decoded = MemoryEntry::try_from(row).ok();
                let payload = decoded.as_ref().and_then(|entry| entry.snapshot());
                Some(SnapshotSummary {
                    snapshot_id,
                    base_snapshot_id,
                    created_at,
                    actor: payload.map(|p| p.actor),
                    reason: payload.map(|p| p.reason.clone()),
                    widget_count: payload.map(|p| p.plan_json.widgets.len()),
                    is_current: history.current_snapshot_id == Some(snapshot_id),
                })
            })
            .collect())
    }

    /// The history cursor, repaired against the snapshots that still exist.
    pub async fn history(&self, profile_id: &str) -> Result<PlanHistory, GatewayError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("failed to acquire connection")?;
        let mut history = self.load_history(&mut conn, profile_id).await?;
        let existing: Vec<Uuid> = memory_db::snapshot_links(&mut *conn, profile_id)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        history.repair(&existing);
        Ok(history)
    }

    /// Record a free-form note.
    pub async fn record_note(
        &self,
        profile_id: &str,
        text: &str,
    ) -> Result<MemoryEntry, GatewayError> {
        let _turn = self.queues.acquire(profile_id).await;
        let payload = MemoryPayload::Note(NotePayload {
            text: text.to_string(),
        });
        self.append_entry_queued(profile_id, &Actor::User.to_string(), payload)
            .await
    }

    /// Record metadata about a screen capture that produced events.
    pub async fn record_capture_meta(
        &self,
        profile_id: &str,
        meta: CaptureMetaPayload,
    ) -> Result<MemoryEntry, GatewayError> {
        let _turn = self.queues.acquire(profile_id).await;
        self.append_entry_queued(
            profile_id,
            &Actor::System.to_string(),
            MemoryPayload::CaptureMeta(meta),
        )
        .await
    }
}
