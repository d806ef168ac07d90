//! Per-profile mutation queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per profile id.
///
/// Tokio's mutex hands the lock out in the order `lock` was called, so
/// mutations of a profile run one at a time in arrival order. Different
/// profiles never wait on each other.
#[derive(Debug, Clone, Default)]
pub struct ProfileQueues {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ProfileQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for this profile's turn. The turn ends when the guard drops.
    pub async fn acquire(&self, profile_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(profile_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}
