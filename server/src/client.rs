use crate::cards::Card;
use crate::cluster::NodeId;
use crate::directory::PlayerId;
use crate::session::battle::TurnReport;
use crate::session::hosted::Outcome;
use crate::session::SessionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Messages pushed to a connected player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Connected {
        player_id: PlayerId,
        server_id: NodeId,
    },
    CardsDrawn {
        cards: Vec<Card>,
        remaining_stock: u32,
    },
    Error {
        message: String,
    },
    BattleStarted {
        session_id: SessionId,
        opponent: PlayerId,
        host_server: NodeId,
    },
    CardRequested {
        session_id: SessionId,
        index: usize,
    },
    TurnResolved {
        session_id: SessionId,
        report: TurnReport,
    },
    BattleEnded {
        session_id: SessionId,
        outcome: Outcome,
        winner: Option<PlayerId>,
        reason: String,
    },
    TradeStarted {
        session_id: SessionId,
        partner: PlayerId,
    },
    OfferRequested {
        session_id: SessionId,
    },
    TradeCompleted {
        session_id: SessionId,
        gave: Card,
        received: Card,
    },
    TradeCancelled {
        session_id: SessionId,
        reason: String,
    },
    Paired {
        partner: PlayerId,
    },
    MessageReceived {
        from: PlayerId,
        text: String,
    },
}

/// Requests a player sends over the client transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ClientRequest {
    Connect { player_id: PlayerId },
    Buy,
    Battle { opponent: PlayerId },
    Trade { partner: PlayerId },
    PlayCard { session_id: SessionId, index: usize },
    OfferCard { session_id: SessionId, card_id: String },
    Pair { partner: PlayerId },
    Message { to: PlayerId, text: String },
}

/// Fire-and-forget delivery to a player's reply address
#[async_trait]
pub trait ClientSink: Send + Sync {
    async fn push(&self, reply_address: &str, event: ClientEvent);
}

pub fn new_reply_address() -> String {
    format!("client_reply:{}", Uuid::new_v4())
}

/// In-process client transport: one event queue per reply address
#[derive(Default)]
pub struct ClientHub {
    queues: RwLock<HashMap<String, mpsc::UnboundedSender<ClientEvent>>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the queue for a reply address; a second attach replaces the first
    pub async fn attach(&self, reply_address: &str) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues.write().await.insert(reply_address.to_string(), tx);
        rx
    }

    pub async fn detach(&self, reply_address: &str) {
        self.queues.write().await.remove(reply_address);
    }
}

#[async_trait]
impl ClientSink for ClientHub {
    async fn push(&self, reply_address: &str, event: ClientEvent) {
        let queues = self.queues.read().await;
        match queues.get(reply_address) {
            Some(queue) => {
                if queue.send(event).is_err() {
                    tracing::debug!(reply_address, "client queue closed, event dropped");
                }
            }
            None => tracing::debug!(reply_address, "no client attached, event dropped"),
        }
    }
}
