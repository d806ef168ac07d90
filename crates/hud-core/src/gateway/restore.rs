//! Undo, redo, and rollback.
//!
//! Restores move the history cursor to an existing snapshot and write that
//! snapshot's plan back to both slots. They never append snapshots and
//! never run rules.

use std::collections::HashMap;

use anyhow::Context;
use sqlx::SqliteConnection;
use uuid::Uuid;

use hud_db::queries::{memory as memory_db, plans as plans_db};

use crate::history::ancestry;
use crate::memory::MemoryEntry;
use crate::plan::{Plan, digest_hex};

use super::{ApplyOutcome, GatewayError, PlanGateway, check_candidate, save_history};

#[derive(Debug, Clone, Copy)]
enum Direction {
    Back,
    Forward,
}

impl PlanGateway {
    /// Restore the snapshot below the current one on the undo stack.
    pub async fn undo(&self, profile_id: &str) -> Result<ApplyOutcome, GatewayError> {
        let _turn = self.queues.acquire(profile_id).await;
        self.step(profile_id, Direction::Back).await
    }

    /// Restore the snapshot most recently undone.
    pub async fn redo(&self, profile_id: &str) -> Result<ApplyOutcome, GatewayError> {
        let _turn = self.queues.acquire(profile_id).await;
        self.step(profile_id, Direction::Forward).await
    }

    /// Make `target` current, whatever branch it is on.
    ///
    /// The undo stack is rebuilt from the target's ancestry and any redo
    /// branch is abandoned.
    pub async fn rollback(
        &self,
        profile_id: &str,
        target: Uuid,
    ) -> Result<ApplyOutcome, GatewayError> {
        let _turn = self.queues.acquire(profile_id).await;
        let limit = self.retention.history_limit();

        let mut tx = self.begin_write("rollback").await?;

        let plan = match load_snapshot_plan(&mut tx, profile_id, target).await {
            Err(GatewayError::CorruptSnapshot { snapshot_id, .. }) => {
                return Err(GatewayError::SnapshotNotFound(snapshot_id));
            }
            other => other?,
        };

        let parents: HashMap<Uuid, Option<Uuid>> = memory_db::snapshot_links(&mut *tx, profile_id)
            .await?
            .into_iter()
            .collect();
        let mut history = self.load_history(&mut tx, profile_id).await?;
        history.rollback_to(target, ancestry(target, &parents, limit), limit);

        write_plan(&mut tx, profile_id, &plan).await?;
        save_history(&mut tx, profile_id, &history).await?;
        tx.commit().await.context("failed to commit rollback")?;

        tracing::info!(
            profile_id,
            snapshot_id = %target,
            undo_depth = history.undo.len(),
            "rolled back"
        );

        Ok(ApplyOutcome {
            plan,
            snapshot_id: Some(target),
        })
    }

    async fn step(
        &self,
        profile_id: &str,
        direction: Direction,
    ) -> Result<ApplyOutcome, GatewayError> {
        let limit = self.retention.history_limit();
        let mut tx = self.begin_write("history").await?;

        let mut history = self.load_history(&mut tx, profile_id).await?;
        let target = match direction {
            Direction::Back => history.peek_undo()?,
            Direction::Forward => history.peek_redo()?,
        };

        // Nothing moves unless the target can actually be restored.
        let plan = load_snapshot_plan(&mut tx, profile_id, target).await?;

        match direction {
            Direction::Back => history.step_back(limit)?,
            Direction::Forward => history.step_forward(limit)?,
        };

        write_plan(&mut tx, profile_id, &plan).await?;
        save_history(&mut tx, profile_id, &history).await?;
        tx.commit().await.context("failed to commit history step")?;

        tracing::info!(
            profile_id,
            snapshot_id = %target,
            direction = ?direction,
            "restored snapshot"
        );

        Ok(ApplyOutcome {
            plan,
            snapshot_id: Some(target),
        })
    }
}

/// Load and re-validate the plan stored in a snapshot.
async fn load_snapshot_plan(
    conn: &mut SqliteConnection,
    profile_id: &str,
    snapshot_id: Uuid,
) -> Result<Plan, GatewayError> {
    let row = memory_db::get_snapshot_entry(&mut *conn, profile_id, snapshot_id)
        .await?
        .ok_or(GatewayError::SnapshotNotFound(snapshot_id))?;

    let corrupt = |reason: String| {
        tracing::warn!(profile_id, snapshot_id = %snapshot_id, %reason, "snapshot is unusable");
        GatewayError::CorruptSnapshot {
            snapshot_id,
            reason,
        }
    };

    let entry = MemoryEntry::try_from(row).map_err(|e| corrupt(e.to_string()))?;
    let plan = match entry.snapshot() {
        Some(snapshot) => snapshot.plan_json.clone(),
        None => return Err(corrupt("entry is not a plan snapshot".to_string())),
    };
    check_candidate(profile_id, &plan).map_err(|report| corrupt(report.to_string()))?;
    Ok(plan)
}

/// Write a restored plan to both slots.
async fn write_plan(
    conn: &mut SqliteConnection,
    profile_id: &str,
    plan: &Plan,
) -> Result<(), GatewayError> {
    let canonical = plan.to_canonical_json()?;
    let digest = digest_hex(&canonical);
    plans_db::save_current_plan(conn, profile_id, &canonical, &digest).await?;
    Ok(())
}
