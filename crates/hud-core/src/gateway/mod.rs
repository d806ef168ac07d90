//! Apply gateway: the single entry point for every plan mutation.
//!
//! User edits, rule firings, composer drafts, and system actions all reach
//! storage through [`PlanGateway`]. Each mutation:
//! 1. waits for its turn on the profile's queue,
//! 2. validates the candidate plan,
//! 3. writes both plan slots, the snapshot, retention trimming, and the
//!    history cursor in one SQLite transaction.
//!
//! A failed mutation leaves the stored state exactly as it was.

mod events;
mod inspect;
pub mod queue;
mod restore;

use anyhow::Context;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use thiserror::Error;
use uuid::Uuid;

use hud_db::models::PlanSlotKind;
use hud_db::queries::{history as history_db, memory as memory_db, plans as plans_db};

use crate::history::{HistoryError, PlanHistory};
use crate::memory::{
    Actor, ComposerWarningPayload, MemoryEntry, MemoryError, MemoryPayload, PlanSnapshotPayload,
    RetentionConfig, new_entry_row,
};
use crate::plan::{MalformedPlan, Plan, ValidationReport, Violation, validate_plan};
use crate::rules::{PatternCache, RuleError};

pub use events::{IngestOutcome, StoredRule};
pub use inspect::SnapshotSummary;
pub use queue::ProfileQueues;

/// Why a mutation was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyMeta {
    pub reason: String,
    pub actor: Actor,
}

impl ApplyMeta {
    pub fn new(actor: Actor, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            actor,
        }
    }
}

/// Result of a committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// The plan that is now current.
    pub plan: Plan,
    /// The snapshot that became current, or `None` when an apply changed
    /// nothing.
    pub snapshot_id: Option<Uuid>,
}

/// Result of submitting an untrusted composer draft.
#[derive(Debug, Clone, PartialEq)]
pub enum DraftOutcome {
    Applied(ApplyOutcome),
    /// The draft was not shaped like a plan; the current plan is unchanged.
    Rejected { warning: String },
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(ValidationReport),

    #[error("nothing to undo")]
    NoUndoAvailable,

    #[error("nothing to redo")]
    NoRedoAvailable,

    #[error("snapshot {0} not found")]
    SnapshotNotFound(Uuid),

    #[error("snapshot {snapshot_id} is unusable: {reason}")]
    CorruptSnapshot { snapshot_id: Uuid, reason: String },

    #[error("stored plan for profile {0:?} is unreadable in both slots")]
    CorruptPlan(String),

    #[error("profile {0:?} has no plan yet")]
    NoPlan(String),

    #[error("rule {0:?} not found")]
    RuleNotFound(String),

    #[error(transparent)]
    InvalidRule(#[from] RuleError),

    #[error(transparent)]
    Malformed(#[from] MalformedPlan),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("failed to serialize plan: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl GatewayError {
    /// Whether the error means "the thing you asked for is not there".
    /// Corrupt snapshots count, since they cannot be restored either.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoUndoAvailable
                | Self::NoRedoAvailable
                | Self::SnapshotNotFound(_)
                | Self::CorruptSnapshot { .. }
                | Self::RuleNotFound(_)
        )
    }
}

impl From<HistoryError> for GatewayError {
    fn from(e: HistoryError) -> Self {
        match e {
            HistoryError::NoUndoAvailable => Self::NoUndoAvailable,
            HistoryError::NoRedoAvailable => Self::NoRedoAvailable,
        }
    }
}

impl From<ValidationReport> for GatewayError {
    fn from(report: ValidationReport) -> Self {
        Self::Validation(report)
    }
}

/// Serialized, validated access to the plans stored in one database.
#[derive(Debug, Clone)]
pub struct PlanGateway {
    pool: SqlitePool,
    retention: RetentionConfig,
    queues: ProfileQueues,
    patterns: PatternCache,
}

impl PlanGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_retention(pool, RetentionConfig::default())
    }

    pub fn with_retention(pool: SqlitePool, retention: RetentionConfig) -> Self {
        Self {
            pool,
            retention,
            queues: ProfileQueues::new(),
            patterns: PatternCache::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn retention(&self) -> RetentionConfig {
        self.retention
    }

    /// Validate `candidate` and make it the current plan of `profile_id`.
    ///
    /// A candidate whose canonical form equals the current plan is accepted
    /// without recording a snapshot.
    pub async fn apply(
        &self,
        profile_id: &str,
        candidate: Plan,
        meta: ApplyMeta,
    ) -> Result<ApplyOutcome, GatewayError> {
        let _turn = self.queues.acquire(profile_id).await;
        self.apply_queued(profile_id, candidate, &meta).await
    }

    /// Parse an untrusted draft and apply it.
    ///
    /// Input that is not shaped like a plan never reaches validation: a
    /// `composer_warning` entry is recorded and the draft is rejected.
    pub async fn apply_draft(
        &self,
        profile_id: &str,
        raw: &str,
        meta: ApplyMeta,
    ) -> Result<DraftOutcome, GatewayError> {
        let _turn = self.queues.acquire(profile_id).await;
        match Plan::from_json(raw) {
            Ok(candidate) => Ok(DraftOutcome::Applied(
                self.apply_queued(profile_id, candidate, &meta).await?,
            )),
            Err(e) => {
                let warning = format!("draft from {} rejected: {e}", meta.actor);
                tracing::warn!(profile_id, actor = %meta.actor, error = %e, "rejected malformed draft");
                let payload = MemoryPayload::ComposerWarning(ComposerWarningPayload {
                    message: warning.clone(),
                });
                self.append_entry_queued(profile_id, &meta.actor.to_string(), payload)
                    .await?;
                Ok(DraftOutcome::Rejected { warning })
            }
        }
    }

    /// Give a profile its default plan if it has none.
    ///
    /// Returns `None` when the profile already had a plan.
    pub async fn initialize_profile(
        &self,
        profile_id: &str,
    ) -> Result<Option<ApplyOutcome>, GatewayError> {
        let _turn = self.queues.acquire(profile_id).await;
        let primary = plans_db::get_slot(&self.pool, profile_id, PlanSlotKind::Primary).await?;
        let backup = plans_db::get_slot(&self.pool, profile_id, PlanSlotKind::Backup).await?;
        if primary.is_some() || backup.is_some() {
            return Ok(None);
        }
        let meta = ApplyMeta::new(Actor::System, "initialize profile");
        let outcome = self
            .apply_queued(profile_id, Plan::default_for(profile_id), &meta)
            .await?;
        Ok(Some(outcome))
    }

    /// Convert a legacy profile document and apply it as the current plan.
    pub async fn import_legacy(
        &self,
        profile_id: &str,
        raw: &str,
    ) -> Result<ApplyOutcome, GatewayError> {
        let plan = crate::plan::migrate_legacy_profile(raw, profile_id)?;
        self.apply(
            profile_id,
            plan,
            ApplyMeta::new(Actor::System, "import legacy profile"),
        )
        .await
    }

    /// The current plan of a profile, or `None` if it was never initialized.
    ///
    /// An unreadable primary slot falls back to the last-known-good backup.
    pub async fn current_plan(&self, profile_id: &str) -> Result<Option<Plan>, GatewayError> {
        let primary = plans_db::get_slot(&self.pool, profile_id, PlanSlotKind::Primary).await?;
        if let Some(slot) = &primary {
            match decode_stored_plan(&slot.plan_json, profile_id) {
                Ok(plan) => return Ok(Some(plan)),
                Err(reason) => {
                    tracing::warn!(profile_id, %reason, "primary plan unreadable, using backup");
                }
            }
        }

        let backup = plans_db::get_slot(&self.pool, profile_id, PlanSlotKind::Backup).await?;
        match backup {
            Some(slot) => match decode_stored_plan(&slot.plan_json, profile_id) {
                Ok(plan) => Ok(Some(plan)),
                Err(reason) => {
                    tracing::warn!(profile_id, %reason, "backup plan unreadable");
                    Err(GatewayError::CorruptPlan(profile_id.to_string()))
                }
            },
            None if primary.is_some() => Err(GatewayError::CorruptPlan(profile_id.to_string())),
            None => Ok(None),
        }
    }

    /// Like [`Self::current_plan`] but a missing plan is an error.
    pub async fn require_plan(&self, profile_id: &str) -> Result<Plan, GatewayError> {
        self.current_plan(profile_id)
            .await?
            .ok_or_else(|| GatewayError::NoPlan(profile_id.to_string()))
    }

    /// Every profile that has a plan.
    pub async fn profiles(&self) -> Result<Vec<String>, GatewayError> {
        Ok(plans_db::list_profiles(&self.pool).await?)
    }

    /// Apply with the profile's turn already held.
    async fn apply_queued(
        &self,
        profile_id: &str,
        candidate: Plan,
        meta: &ApplyMeta,
    ) -> Result<ApplyOutcome, GatewayError> {
        check_candidate(profile_id, &candidate)?;
        let canonical = candidate.to_canonical_json()?;
        let digest = crate::plan::digest_hex(&canonical);

        let mut tx = self.begin_write("apply").await?;

        let previous = plans_db::get_slot(&mut *tx, profile_id, PlanSlotKind::Primary).await?;
        plans_db::save_current_plan(&mut tx, profile_id, &canonical, &digest).await?;

        if previous.is_some_and(|slot| slot.digest == digest) {
            tx.commit().await.context("failed to commit apply")?;
            tracing::debug!(profile_id, actor = %meta.actor, "plan unchanged, no snapshot");
            return Ok(ApplyOutcome {
                plan: candidate,
                snapshot_id: None,
            });
        }

        let mut history = self.load_history(&mut tx, profile_id).await?;
        let snapshot_id = Uuid::new_v4();
        let payload = MemoryPayload::PlanSnapshot(PlanSnapshotPayload {
            snapshot_id,
            plan_json: candidate.clone(),
            reason: meta.reason.clone(),
            actor: meta.actor,
            base_snapshot_id: history.current_snapshot_id,
        });
        let row = new_entry_row(
            profile_id,
            &meta.actor.to_string(),
            payload,
            self.retention.max_payload_bytes,
        )?;
        memory_db::insert_entry(&mut *tx, &row).await?;

        history.record_commit(snapshot_id, self.retention.history_limit());
        self.enforce_retention(&mut tx, profile_id, &mut history)
            .await?;
        save_history(&mut tx, profile_id, &history).await?;

        tx.commit().await.context("failed to commit apply")?;

        tracing::info!(
            profile_id,
            snapshot_id = %snapshot_id,
            actor = %meta.actor,
            reason = %meta.reason,
            "plan committed"
        );

        Ok(ApplyOutcome {
            plan: candidate,
            snapshot_id: Some(snapshot_id),
        })
    }

    /// Append a non-snapshot entry with the profile's turn already held.
    async fn append_entry_queued(
        &self,
        profile_id: &str,
        source: &str,
        payload: MemoryPayload,
    ) -> Result<MemoryEntry, GatewayError> {
        let row = new_entry_row(profile_id, source, payload, self.retention.max_payload_bytes)?;

        let mut tx = self.begin_write("memory").await?;
        let inserted = memory_db::insert_entry(&mut *tx, &row).await?;

        let mut history = self.load_history(&mut tx, profile_id).await?;
        if self.enforce_retention(&mut tx, profile_id, &mut history).await? {
            save_history(&mut tx, profile_id, &history).await?;
        }
        tx.commit().await.context("failed to commit memory entry")?;

        Ok(MemoryEntry::try_from(inserted)?)
    }

    /// Open a transaction that holds the database write lock from `BEGIN`.
    ///
    /// Profile queues do not order writers across profiles, and a deferred
    /// transaction that upgrades from read to write fails with `SQLITE_BUSY`
    /// without waiting on the busy timeout.
    async fn begin_write(
        &self,
        what: &str,
    ) -> Result<Transaction<'static, Sqlite>, GatewayError> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .with_context(|| format!("failed to begin {what} transaction"))?;
        Ok(tx)
    }

    /// Read the cursor, rebuilding it from the snapshot log if it was never
    /// stored.
    async fn load_history(
        &self,
        conn: &mut SqliteConnection,
        profile_id: &str,
    ) -> Result<PlanHistory, GatewayError> {
        match history_db::get_history(&mut *conn, profile_id).await? {
            Some(row) => Ok(PlanHistory {
                current_snapshot_id: row.current_snapshot_id,
                undo: row.undo_stack.0,
                redo: row.redo_stack.0,
            }),
            None => {
                let links = memory_db::snapshot_links(&mut *conn, profile_id).await?;
                Ok(PlanHistory::reconstruct(
                    &links,
                    self.retention.history_limit(),
                ))
            }
        }
    }

    /// Trim the log to its caps and repair the cursor. Returns whether the
    /// cursor changed.
    async fn enforce_retention(
        &self,
        conn: &mut SqliteConnection,
        profile_id: &str,
        history: &mut PlanHistory,
    ) -> Result<bool, GatewayError> {
        let snapshots = memory_db::trim_snapshots(
            &mut *conn,
            profile_id,
            cap(self.retention.max_snapshots),
        )
        .await?;
        let entries =
            memory_db::trim_entries(&mut *conn, profile_id, cap(self.retention.max_entries))
                .await?;
        if snapshots + entries > 0 {
            tracing::debug!(profile_id, snapshots, entries, "trimmed memory log");
        }

        let existing: Vec<Uuid> = memory_db::snapshot_links(&mut *conn, profile_id)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        Ok(history.repair(&existing))
    }
}

async fn save_history(
    conn: &mut SqliteConnection,
    profile_id: &str,
    history: &PlanHistory,
) -> Result<(), GatewayError> {
    history_db::save_history(
        &mut *conn,
        profile_id,
        history.current_snapshot_id,
        &history.undo,
        &history.redo,
    )
    .await?;
    Ok(())
}

/// Validate a candidate and check it belongs to the profile it is applied to.
fn check_candidate(profile_id: &str, candidate: &Plan) -> Result<(), ValidationReport> {
    let mut violations = match validate_plan(candidate) {
        Ok(()) => Vec::new(),
        Err(report) => report.violations,
    };
    if !candidate.profile_id.is_empty() && candidate.profile_id != profile_id {
        violations.push(Violation {
            path: "profileId".to_string(),
            message: format!(
                "plan belongs to profile {:?}, not {profile_id:?}",
                candidate.profile_id
            ),
        });
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationReport { violations })
    }
}

/// Parse and validate a plan read back from storage.
fn decode_stored_plan(raw: &str, profile_id: &str) -> Result<Plan, String> {
    let plan = Plan::from_json(raw).map_err(|e| e.to_string())?;
    check_candidate(profile_id, &plan).map_err(|r| r.to_string())?;
    Ok(plan)
}

fn cap(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
