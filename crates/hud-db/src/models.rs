use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which of the two persisted plan copies a row holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanSlotKind {
    /// The plan renderers read.
    Primary,
    /// Last-known-good copy used when the primary slot is unreadable.
    Backup,
}

impl fmt::Display for PlanSlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanSlotKind {
    type Err = PlanSlotKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "backup" => Ok(Self::Backup),
            other => Err(PlanSlotKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanSlotKind`] string.
#[derive(Debug, Clone)]
pub struct PlanSlotKindParseError(pub String);

impl fmt::Display for PlanSlotKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan slot: {:?}", self.0)
    }
}

impl std::error::Error for PlanSlotKindParseError {}

// ---------------------------------------------------------------------------

/// Kind of a memory log entry. Stored in the `entry_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    PlanSnapshot,
    Note,
    RuleEvent,
    CaptureMeta,
    ComposerWarning,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PlanSnapshot => "plan_snapshot",
            Self::Note => "note",
            Self::RuleEvent => "rule_event",
            Self::CaptureMeta => "capture_meta",
            Self::ComposerWarning => "composer_warning",
        };
        f.write_str(s)
    }
}

impl FromStr for EntryType {
    type Err = EntryTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan_snapshot" => Ok(Self::PlanSnapshot),
            "note" => Ok(Self::Note),
            "rule_event" => Ok(Self::RuleEvent),
            "capture_meta" => Ok(Self::CaptureMeta),
            "composer_warning" => Ok(Self::ComposerWarning),
            other => Err(EntryTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`EntryType`] string.
#[derive(Debug, Clone)]
pub struct EntryTypeParseError(pub String);

impl fmt::Display for EntryTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid entry type: {:?}", self.0)
    }
}

impl std::error::Error for EntryTypeParseError {}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// One persisted copy of a profile's current plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanSlot {
    pub profile_id: String,
    pub slot: PlanSlotKind,
    /// Canonical JSON of the plan.
    pub plan_json: String,
    /// Hex SHA-256 of `plan_json`.
    pub digest: String,
    pub updated_at: DateTime<Utc>,
}

/// A row of the append-only memory log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MemoryEntryRow {
    pub seq: i64,
    pub id: Uuid,
    pub profile_id: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub entry_type: EntryType,
    /// JSON payload; its shape depends on `entry_type`.
    pub payload: String,
    pub snapshot_id: Option<Uuid>,
    pub base_snapshot_id: Option<Uuid>,
}

/// Persisted history cursor for a profile.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HistoryRow {
    pub profile_id: String,
    pub current_snapshot_id: Option<Uuid>,
    pub undo_stack: Json<Vec<Uuid>>,
    pub redo_stack: Json<Vec<Uuid>>,
    pub updated_at: DateTime<Utc>,
}

/// A rule definition together with its sampling state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RuleRow {
    pub profile_id: String,
    pub rule_id: String,
    pub position: i64,
    /// JSON rule definition.
    pub definition: String,
    pub last_value: Option<f64>,
    pub last_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
