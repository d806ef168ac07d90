//! History cursor over the snapshot log.
//!
//! The snapshot log is a tree: every snapshot points at the snapshot it was
//! derived from. [`PlanHistory`] exposes one linear path through it, the
//! current snapshot plus bounded undo and redo stacks. The cursor is always
//! derivable from the log, so it can be repaired after retention prunes
//! snapshots or rebuilt if it is lost.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("nothing to undo")]
    NoUndoAvailable,

    #[error("nothing to redo")]
    NoRedoAvailable,
}

/// Current snapshot and the undo/redo stacks. The top of each stack is its
/// last element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanHistory {
    pub current_snapshot_id: Option<Uuid>,
    pub undo: Vec<Uuid>,
    pub redo: Vec<Uuid>,
}

impl PlanHistory {
    /// Move the cursor to a freshly committed snapshot.
    ///
    /// The previous current id goes onto the undo stack (dropping the oldest
    /// entries beyond `limit`) and the redo stack is cleared.
    pub fn record_commit(&mut self, snapshot_id: Uuid, limit: usize) {
        if let Some(prev) = self.current_snapshot_id.replace(snapshot_id) {
            self.undo.push(prev);
        }
        truncate_front(&mut self.undo, limit);
        self.redo.clear();
    }

    /// The snapshot an undo would restore.
    pub fn peek_undo(&self) -> Result<Uuid, HistoryError> {
        match (self.current_snapshot_id, self.undo.last()) {
            (Some(_), Some(id)) => Ok(*id),
            _ => Err(HistoryError::NoUndoAvailable),
        }
    }

    /// The snapshot a redo would restore.
    pub fn peek_redo(&self) -> Result<Uuid, HistoryError> {
        self.redo.last().copied().ok_or(HistoryError::NoRedoAvailable)
    }

    /// Pop the undo stack and make that snapshot current.
    pub fn step_back(&mut self, limit: usize) -> Result<Uuid, HistoryError> {
        let target = self.peek_undo()?;
        self.undo.pop();
        if let Some(current) = self.current_snapshot_id.replace(target) {
            self.redo.push(current);
            truncate_front(&mut self.redo, limit);
        }
        Ok(target)
    }

    /// Pop the redo stack and make that snapshot current.
    pub fn step_forward(&mut self, limit: usize) -> Result<Uuid, HistoryError> {
        let target = self.peek_redo()?;
        self.redo.pop();
        if let Some(current) = self.current_snapshot_id.replace(target) {
            self.undo.push(current);
            truncate_front(&mut self.undo, limit);
        }
        Ok(target)
    }

    /// Jump to `target`, rebuilding undo from its ancestry (oldest first,
    /// excluding `target` itself) and discarding the redo branch.
    pub fn rollback_to(&mut self, target: Uuid, ancestry: Vec<Uuid>, limit: usize) {
        self.current_snapshot_id = Some(target);
        self.undo = ancestry;
        truncate_front(&mut self.undo, limit);
        self.redo.clear();
    }

    /// Drop ids that no longer name a snapshot in the log.
    ///
    /// `existing` lists the surviving snapshot ids oldest first. A dangling
    /// current id falls back to the newest survivor. Returns whether
    /// anything changed.
    pub fn repair(&mut self, existing: &[Uuid]) -> bool {
        let live: HashSet<&Uuid> = existing.iter().collect();
        let before = self.clone();

        self.undo.retain(|id| live.contains(id));
        self.redo.retain(|id| live.contains(id));

        if let Some(current) = self.current_snapshot_id {
            if !live.contains(&current) {
                self.current_snapshot_id = existing.last().copied();
                let new_current = self.current_snapshot_id;
                self.undo.retain(|id| Some(*id) != new_current);
                self.redo.retain(|id| Some(*id) != new_current);
            }
        } else if let Some(newest) = existing.last() {
            self.current_snapshot_id = Some(*newest);
        }

        *self != before
    }

    /// Build a cursor from the snapshot log alone.
    ///
    /// `links` holds `(snapshot_id, base_snapshot_id)` oldest first. The
    /// newest snapshot becomes current and its ancestry becomes undo.
    pub fn reconstruct(links: &[(Uuid, Option<Uuid>)], limit: usize) -> Self {
        let Some((newest, _)) = links.last() else {
            return Self::default();
        };
        let parents: HashMap<Uuid, Option<Uuid>> = links.iter().copied().collect();
        Self {
            current_snapshot_id: Some(*newest),
            undo: ancestry(*newest, &parents, limit),
            redo: Vec::new(),
        }
    }
}

/// Ancestors of `target` following parent pointers, oldest first, at most
/// `limit` long. Stops at a missing parent or a cycle.
pub fn ancestry(target: Uuid, parents: &HashMap<Uuid, Option<Uuid>>, limit: usize) -> Vec<Uuid> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([target]);
    let mut cursor = parents.get(&target).copied().flatten();

    while let Some(id) = cursor {
        if chain.len() >= limit || !parents.contains_key(&id) || !seen.insert(id) {
            break;
        }
        chain.push(id);
        cursor = parents.get(&id).copied().flatten();
    }

    chain.reverse();
    chain
}

fn truncate_front(stack: &mut Vec<Uuid>, limit: usize) {
    if stack.len() > limit {
        let excess = stack.len() - limit;
        stack.drain(..excess);
    }
}
