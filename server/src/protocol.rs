// Request and response bodies exchanged between nodes

use crate::cards::Card;
use crate::cluster::{LivenessView, NodeId};
use crate::directory::{DirectoryEntry, PlayerId};
use crate::session::battle::TurnReport;
use crate::session::{Conclusion, SessionId};
use serde::{Deserialize, Serialize};

// ============= Directory & Inventory =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryAction {
    Add,
    Remove,
}

/// Directory delta broadcast by the leader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    pub player_id: PlayerId,
    pub server_id: NodeId,
    pub reply_address: String,
    pub action: DirectoryAction,
}

impl PlayerUpdate {
    pub fn add(entry: &DirectoryEntry) -> Self {
        Self {
            player_id: entry.player_id.clone(),
            server_id: entry.owner.clone(),
            reply_address: entry.reply_address.clone(),
            action: DirectoryAction::Add,
        }
    }

    pub fn remove(entry: &DirectoryEntry) -> Self {
        Self {
            action: DirectoryAction::Remove,
            ..Self::add(entry)
        }
    }
}

/// Follower -> leader: register a player connected on `server_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub player_id: PlayerId,
    pub server_id: NodeId,
    pub reply_address: String,
}

impl From<&DirectoryEntry> for ConnectRequest {
    fn from(entry: &DirectoryEntry) -> Self {
        Self {
            player_id: entry.player_id.clone(),
            server_id: entry.owner.clone(),
            reply_address: entry.reply_address.clone(),
        }
    }
}

impl From<ConnectRequest> for DirectoryEntry {
    fn from(req: ConnectRequest) -> Self {
        Self {
            player_id: req.player_id,
            owner: req.server_id,
            reply_address: req.reply_address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectRequest {
    pub player_id: PlayerId,
    pub server_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub player_id: PlayerId,
    pub server_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    Sold { cards: Vec<Card>, remaining: u32 },
    NoStock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub remaining: u32,
}

// ============= Player to player =============

/// What a relayed notice carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoticeBody {
    /// `from` paired up with `to`
    Pair,
    Text { text: String },
}

/// A notice from one player to another, handed to the node owning `to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub from: PlayerId,
    pub to: PlayerId,
    pub body: NoticeBody,
}

// ============= Battle =============

/// Host -> peer: a battle opened and your local player is in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleInitiate {
    pub session_id: SessionId,
    pub local_player: PlayerId,
    pub opponent: PlayerId,
    pub host_server: NodeId,
    pub host_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub report: TurnReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleEndNotice {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub conclusion: Conclusion,
}

/// Peer -> host: the card the local player picked for `index`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveSubmission {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub index: usize,
    pub card: Card,
}

// ============= Trade =============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeInitiate {
    pub session_id: SessionId,
    pub local_player: PlayerId,
    pub partner: PlayerId,
    pub host_server: NodeId,
    pub host_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub session_id: SessionId,
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TradeOutcome {
    Completed { received: Card },
    Cancelled { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeResult {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub outcome: TradeOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferSubmission {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub card: Card,
}

// ============= Node =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub const OK: Ack = Ack { ok: true };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub server_id: NodeId,
    pub is_leader: bool,
}

/// Operator view of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub server_id: NodeId,
    pub reply_queue: String,
    pub leader: Option<NodeId>,
    pub is_leader: bool,
    pub liveness: LivenessView,
    pub directory_size: usize,
    pub local_players: usize,
    pub stock: u32,
    pub hosted_battles: usize,
    pub hosted_trades: usize,
    pub peer_battles: usize,
    pub peer_trades: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_update_serialization() {
        let entry = DirectoryEntry {
            player_id: "alice".into(),
            owner: "server1".into(),
            reply_address: "client_reply:1".into(),
        };
        let json = serde_json::to_string(&PlayerUpdate::remove(&entry)).unwrap();
        assert!(json.contains("\"action\":\"remove\""));
        assert!(json.contains("\"server_id\":\"server1\""));
    }

    #[test]
    fn test_purchase_outcome_tagging() {
        let json = serde_json::to_string(&PurchaseOutcome::NoStock).unwrap();
        assert_eq!(json, r#"{"status":"no_stock"}"#);

        let sold: PurchaseOutcome =
            serde_json::from_str(r#"{"status":"sold","cards":[],"remaining":3}"#).unwrap();
        assert_eq!(sold, PurchaseOutcome::Sold { cards: vec![], remaining: 3 });
    }
}
