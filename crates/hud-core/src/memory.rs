//! Memory log entries.
//!
//! The memory log is an append-only record of everything that happened to a
//! profile: plan snapshots, notes, rule firings, capture metadata, and
//! rejected composer drafts. Each entry kind carries its own typed payload;
//! the kind is stored next to the payload so rows can be decoded without
//! guessing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use hud_db::models::{EntryType, MemoryEntryRow};
use hud_db::queries::memory::NewMemoryEntry;

use crate::plan::Plan;

/// Appended to free text that had to be shortened to fit the payload limit.
pub const TRUNCATION_MARKER: &str = "…";

/// Who asked for a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    User,
    Rules,
    Composer,
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Actor::User => "user",
            Actor::Rules => "rules",
            Actor::Composer => "composer",
            Actor::System => "system",
        };
        f.write_str(s)
    }
}

impl FromStr for Actor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Actor::User),
            "rules" => Ok(Actor::Rules),
            "composer" => Ok(Actor::Composer),
            "system" => Ok(Actor::System),
            other => Err(format!("invalid actor: {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSnapshotPayload {
    pub snapshot_id: Uuid,
    pub plan_json: Plan,
    pub reason: String,
    pub actor: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_snapshot_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePayload {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEventPayload {
    pub event_type: String,
    pub text: String,
    #[serde(default)]
    pub rule_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetaPayload {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposerWarningPayload {
    pub message: String,
}

/// Typed payload of a memory entry, one variant per [`EntryType`].
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryPayload {
    PlanSnapshot(PlanSnapshotPayload),
    Note(NotePayload),
    RuleEvent(RuleEventPayload),
    CaptureMeta(CaptureMetaPayload),
    ComposerWarning(ComposerWarningPayload),
}

/// Errors from encoding or decoding memory entries.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("{entry_type} payload is {size} bytes, over the {limit} byte limit")]
    PayloadTooLarge {
        entry_type: EntryType,
        size: usize,
        limit: usize,
    },

    #[error("failed to decode {entry_type} payload: {source}")]
    Decode {
        entry_type: EntryType,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {entry_type} payload: {source}")]
    Encode {
        entry_type: EntryType,
        #[source]
        source: serde_json::Error,
    },
}

impl MemoryPayload {
    pub fn entry_type(&self) -> EntryType {
        match self {
            Self::PlanSnapshot(_) => EntryType::PlanSnapshot,
            Self::Note(_) => EntryType::Note,
            Self::RuleEvent(_) => EntryType::RuleEvent,
            Self::CaptureMeta(_) => EntryType::CaptureMeta,
            Self::ComposerWarning(_) => EntryType::ComposerWarning,
        }
    }

    /// Serialize the payload body. The entry type is stored separately.
    pub fn to_json(&self) -> Result<String, MemoryError> {
        let encoded = match self {
            Self::PlanSnapshot(p) => serde_json::to_string(p),
            Self::Note(p) => serde_json::to_string(p),
            Self::RuleEvent(p) => serde_json::to_string(p),
            Self::CaptureMeta(p) => serde_json::to_string(p),
            Self::ComposerWarning(p) => serde_json::to_string(p),
        };
        encoded.map_err(|source| MemoryError::Encode {
            entry_type: self.entry_type(),
            source,
        })
    }

    /// Decode a payload body stored under `entry_type`.
    pub fn from_json(entry_type: EntryType, raw: &str) -> Result<Self, MemoryError> {
        let decoded = match entry_type {
            EntryType::PlanSnapshot => serde_json::from_str(raw).map(Self::PlanSnapshot),
            EntryType::Note => serde_json::from_str(raw).map(Self::Note),
            EntryType::RuleEvent => serde_json::from_str(raw).map(Self::RuleEvent),
            EntryType::CaptureMeta => serde_json::from_str(raw).map(Self::CaptureMeta),
            EntryType::ComposerWarning => serde_json::from_str(raw).map(Self::ComposerWarning),
        };
        decoded.map_err(|source| MemoryError::Decode { entry_type, source })
    }

    /// Serialize, enforcing the payload ceiling of `limit` bytes.
    ///
    /// Plan snapshots over the limit are rejected. Free-text payloads are cut
    /// on a character boundary and marked with [`TRUNCATION_MARKER`].
    pub fn encode_clamped(&mut self, limit: usize) -> Result<String, MemoryError> {
        let mut encoded = self.to_json()?;
        if encoded.len() <= limit {
            return Ok(encoded);
        }

        let entry_type = self.entry_type();
        let size = encoded.len();
        if matches!(self, Self::PlanSnapshot(_)) {
            return Err(MemoryError::PayloadTooLarge {
                entry_type,
                size,
                limit,
            });
        }

        let original = match self.free_text_mut() {
            Some(text) => std::mem::take(text),
            None => {
                return Err(MemoryError::PayloadTooLarge {
                    entry_type,
                    size,
                    limit,
                });
            }
        };

        let mut budget = original.len().saturating_sub(size - limit);
        loop {
            let cut = truncate_on_char_boundary(&original, budget);
            if let Some(text) = self.free_text_mut() {
                *text = format!("{cut}{TRUNCATION_MARKER}");
            }
            encoded = self.to_json()?;
            if encoded.len() <= limit {
                return Ok(encoded);
            }
            if budget == 0 {
                return Err(MemoryError::PayloadTooLarge {
                    entry_type,
                    size,
                    limit,
                });
            }
            budget = budget.saturating_sub(encoded.len() - limit);
        }
    }

    fn free_text_mut(&mut self) -> Option<&mut String> {
        match self {
            Self::PlanSnapshot(_) => None,
            Self::Note(p) => Some(&mut p.text),
            Self::RuleEvent(p) => Some(&mut p.text),
            Self::CaptureMeta(p) => Some(&mut p.source),
            Self::ComposerWarning(p) => Some(&mut p.message),
        }
    }

    /// Short human-readable description for log listings.
    pub fn summary(&self) -> String {
        match self {
            Self::PlanSnapshot(p) => format!("[{}] {}", p.actor, p.reason),
            Self::Note(p) => p.text.clone(),
            Self::RuleEvent(p) => {
                if p.rule_ids.is_empty() {
                    format!("{}: {}", p.event_type, p.text)
                } else {
                    format!("{}: {} -> {}", p.event_type, p.text, p.rule_ids.join(", "))
                }
            }
            Self::CaptureMeta(p) => match (p.width, p.height) {
                (Some(w), Some(h)) => format!("{} {w}x{h}", p.source),
                _ => p.source.clone(),
            },
            Self::ComposerWarning(p) => p.message.clone(),
        }
    }
}

fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// A decoded memory log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    pub seq: i64,
    pub id: Uuid,
    pub profile_id: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub payload: MemoryPayload,
}

impl MemoryEntry {
    pub fn entry_type(&self) -> EntryType {
        self.payload.entry_type()
    }

    /// The snapshot carried by this entry, if it is a plan snapshot.
    pub fn snapshot(&self) -> Option<&PlanSnapshotPayload> {
        match &self.payload {
            MemoryPayload::PlanSnapshot(p) => Some(p),
            _ => None,
        }
    }
}

impl TryFrom<MemoryEntryRow> for MemoryEntry {
    type Error = MemoryError;

    fn try_from(row: MemoryEntryRow) -> Result<Self, Self::Error> {
        let payload = MemoryPayload::from_json(row.entry_type, &row.payload)?;
        Ok(Self {
            seq: row.seq,
            id: row.id,
            profile_id: row.profile_id,
            created_at: row.created_at,
            source: row.source,
            payload,
        })
    }
}

/// Build the insert parameters for a new entry, enforcing the payload limit.
pub fn new_entry_row(
    profile_id: &str,
    source: &str,
    mut payload: MemoryPayload,
    limit: usize,
) -> Result<NewMemoryEntry, MemoryError> {
    let encoded = payload.encode_clamped(limit)?;
    let (snapshot_id, base_snapshot_id) = match &payload {
        MemoryPayload::PlanSnapshot(p) => (Some(p.snapshot_id), p.base_snapshot_id),
        _ => (None, None),
    };
    Ok(NewMemoryEntry {
        id: Uuid::new_v4(),
        profile_id: profile_id.to_string(),
        created_at: Utc::now(),
        source: source.to_string(),
        entry_type: payload.entry_type(),
        payload: encoded,
        snapshot_id,
        base_snapshot_id,
    })
}

/// Retention limits for the memory log of one profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Entries of any type kept per profile.
    pub max_entries: usize,
    /// Plan snapshots kept per profile.
    pub max_snapshots: usize,
    /// Largest serialized payload accepted, in bytes.
    pub max_payload_bytes: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            max_snapshots: 50,
            max_payload_bytes: 256 * 1024,
        }
    }
}

impl RetentionConfig {
    /// Bound on the undo and redo stacks. Ids past the snapshot cap would be
    /// pruned anyway.
    pub fn history_limit(&self) -> usize {
        self.max_snapshots
    }
}
