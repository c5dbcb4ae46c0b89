use crate::cluster::NodeId;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

pub type PlayerId = String;

/// Where a connected player lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub player_id: PlayerId,
    pub owner: NodeId,
    pub reply_address: String,
}

/// Replicated player -> owning node mapping.
/// The leader's copy is authoritative; followers apply broadcast deltas.
#[derive(Default)]
pub struct PlayerDirectory {
    entries: RwLock<HashMap<PlayerId, DirectoryEntry>>,
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an entry, returning the one it replaced
    pub async fn upsert(&self, entry: DirectoryEntry) -> Option<DirectoryEntry> {
        self.entries.write().await.insert(entry.player_id.clone(), entry)
    }

    /// Remove the entry only while `owner` still owns it.
    /// A late remove must never delete a fresher add from another node.
    pub async fn remove_if_owned(&self, player_id: &str, owner: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(player_id) {
            Some(entry) if entry.owner == owner => {
                entries.remove(player_id);
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, player_id: &str) -> Option<DirectoryEntry> {
        self.entries.read().await.get(player_id).cloned()
    }

    pub async fn lookup(&self, player_id: &str) -> CoreResult<DirectoryEntry> {
        self.get(player_id)
            .await
            .ok_or_else(|| CoreError::not_found(format!("player {} is not connected", player_id)))
    }

    /// Drop every entry owned by one of `nodes`
    pub async fn remove_owned_by(&self, nodes: &[NodeId]) -> Vec<DirectoryEntry> {
        let mut entries = self.entries.write().await;
        let doomed: Vec<PlayerId> = entries
            .values()
            .filter(|e| nodes.contains(&e.owner))
            .map(|e| e.player_id.clone())
            .collect();
        doomed.iter().filter_map(|id| entries.remove(id)).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// The shared booster stock counter
pub struct InventoryLedger {
    remaining: RwLock<u32>,
}

impl InventoryLedger {
    pub fn new(initial: u32) -> Self {
        Self {
            remaining: RwLock::new(initial),
        }
    }

    pub async fn get(&self) -> u32 {
        *self.remaining.read().await
    }

    /// Overwrite with a count committed by the leader
    pub async fn set(&self, remaining: u32) {
        *self.remaining.write().await = remaining;
    }

    /// Apply a replicated count. Stock only goes down, so a late or
    /// reordered count never raises it.
    pub async fn lower_to(&self, remaining: u32) -> bool {
        let mut current = self.remaining.write().await;
        if remaining < *current {
            *current = remaining;
            true
        } else {
            false
        }
    }

    /// Take one booster out of stock, returning what is left
    pub async fn try_take(&self) -> CoreResult<u32> {
        let mut remaining = self.remaining.write().await;
        if *remaining == 0 {
            return Err(CoreError::conflict("no stock"));
        }
        *remaining -= 1;
        Ok(*remaining)
    }
}
