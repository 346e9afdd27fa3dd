//! In-memory store of repositories that received a commit since the user
//! last looked.
//!
//! Keyed by repository full name (`owner/repo`). Last write wins, entries are
//! removed only by explicit acknowledgement or eviction, and nothing survives
//! a restart.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// The last commit notification seen for a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    pub sha: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Repository object as delivered by GitHub
    pub repository: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<u64>,
}

/// Bounded, concurrent pending-update map. Shared through `AppState`.
#[derive(Debug)]
pub struct PendingUpdates {
    entries: DashMap<String, PendingUpdate>,
    capacity: usize,
    /// Serializes `record` so the capacity check, eviction and insert
    /// happen as one step.
    insert_lock: Mutex<()>,
}

impl PendingUpdates {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            insert_lock: Mutex::new(()),
        }
    }

    /// Store `update` under `full_name`, replacing any previous entry.
    /// Inserting a new key into a full store evicts the oldest entry.
    pub fn record(&self, full_name: &str, update: PendingUpdate) {
        let _guard = self.insert_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.entries.contains_key(full_name) {
            while self.entries.len() >= self.capacity {
                let Some(oldest) = self.oldest_key() else { break };
                self.entries.remove(&oldest);
                tracing::warn!(repo = %oldest, capacity = self.capacity, "Evicted pending update");
            }
        }
        self.entries.insert(full_name.to_string(), update);
    }

    pub fn get(&self, full_name: &str) -> Option<PendingUpdate> {
        self.entries.get(full_name).map(|e| e.value().clone())
    }

    /// Acknowledge one repository. Returns whether an entry was removed.
    pub fn clear(&self, full_name: &str) -> bool {
        self.entries.remove(full_name).is_some()
    }

    /// Most recent pending update for any repository of an installation.
    pub fn find_by_installation(&self, installation_id: u64) -> Option<(String, PendingUpdate)> {
        self.entries
            .iter()
            .filter(|e| e.value().installation_id == Some(installation_id))
            .max_by_key(|e| e.value().timestamp)
            .map(|e| (e.key().clone(), e.value().clone()))
    }

    /// Acknowledge every repository of an installation. Returns how many
    /// entries were removed.
    pub fn clear_installation(&self, installation_id: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, update| update.installation_id != Some(installation_id));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn oldest_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|e| e.value().timestamp)
            .map(|e| e.key().clone())
    }
}
