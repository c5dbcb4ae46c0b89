use crate::cards::Card;
use crate::client::{ClientEvent, ClientSink};
use crate::cluster::{NodeId, PeerClient};
use crate::directory::PlayerId;
use crate::error::CoreResult;
use crate::protocol::{
    BattleEndNotice, BattleInitiate, MoveRequest, OfferRequest, TradeInitiate, TradeOutcome, TradeResult, TurnResult,
};
use crate::roster::Roster;
use crate::session::battle::TurnReport;
use crate::session::hosted::Conclusion;
use async_trait::async_trait;
use std::sync::Arc;

/// How the host reaches the owner of one side of a session.
/// Picked once when the session opens; the state machines never ask where a player lives.
#[async_trait]
pub trait SeatLink: Send + Sync {
    fn is_local(&self) -> bool;

    async fn open_battle(&self, session_id: &str, player: &PlayerId, opponent: &PlayerId) -> CoreResult<()>;
    async fn request_card(&self, session_id: &str, player: &PlayerId, index: usize) -> CoreResult<()>;
    async fn turn_resolved(&self, session_id: &str, player: &PlayerId, report: &TurnReport) -> CoreResult<()>;
    async fn close_battle(&self, session_id: &str, player: &PlayerId, conclusion: &Conclusion) -> CoreResult<()>;

    async fn open_trade(&self, session_id: &str, player: &PlayerId, partner: &PlayerId) -> CoreResult<()>;
    async fn request_offer(&self, session_id: &str, player: &PlayerId) -> CoreResult<()>;
    async fn complete_trade(&self, session_id: &str, player: &PlayerId, received: &Card) -> CoreResult<()>;
    async fn cancel_trade(&self, session_id: &str, player: &PlayerId, reason: &str) -> CoreResult<()>;
}

/// A player connected to this node
pub struct LocalSeat {
    roster: Arc<Roster>,
    clients: Arc<dyn ClientSink>,
    /// Node hosting the session, as announced to the player
    host: NodeId,
}

impl LocalSeat {
    pub fn new(roster: Arc<Roster>, clients: Arc<dyn ClientSink>, host: NodeId) -> Self {
        Self { roster, clients, host }
    }

    async fn notify(&self, player: &str, event: ClientEvent) -> CoreResult<()> {
        let reply = self.roster.reply_address(player).await?;
        self.clients.push(&reply, event).await;
        Ok(())
    }
}

#[async_trait]
impl SeatLink for LocalSeat {
    fn is_local(&self) -> bool {
        true
    }

    async fn open_battle(&self, session_id: &str, player: &PlayerId, opponent: &PlayerId) -> CoreResult<()> {
        self.roster.freeze_deck(player, session_id).await?;
        self.notify(
            player,
            ClientEvent::BattleStarted {
                session_id: session_id.to_string(),
                opponent: opponent.clone(),
                host_server: self.host.clone(),
            },
        )
        .await
    }

    async fn request_card(&self, session_id: &str, player: &PlayerId, index: usize) -> CoreResult<()> {
        self.notify(
            player,
            ClientEvent::CardRequested {
                session_id: session_id.to_string(),
                index,
            },
        )
        .await
    }

    async fn turn_resolved(&self, session_id: &str, player: &PlayerId, report: &TurnReport) -> CoreResult<()> {
        self.notify(
            player,
            ClientEvent::TurnResolved {
                session_id: session_id.to_string(),
                report: report.clone(),
            },
        )
        .await
    }

    async fn close_battle(&self, session_id: &str, player: &PlayerId, conclusion: &Conclusion) -> CoreResult<()> {
        self.roster.thaw(player, session_id).await;
        self.notify(
            player,
            ClientEvent::BattleEnded {
                session_id: session_id.to_string(),
                outcome: conclusion.verdict.outcome_for(player),
                winner: conclusion.verdict.winner().cloned(),
                reason: conclusion.reason.clone(),
            },
        )
        .await
    }

    async fn open_trade(&self, session_id: &str, player: &PlayerId, partner: &PlayerId) -> CoreResult<()> {
        self.notify(
            player,
            ClientEvent::TradeStarted {
                session_id: session_id.to_string(),
                partner: partner.clone(),
            },
        )
        .await
    }

    async fn request_offer(&self, session_id: &str, player: &PlayerId) -> CoreResult<()> {
        self.notify(
            player,
            ClientEvent::OfferRequested {
                session_id: session_id.to_string(),
            },
        )
        .await
    }

    async fn complete_trade(&self, session_id: &str, player: &PlayerId, received: &Card) -> CoreResult<()> {
        let gave = self.roster.commit_offer(player, session_id, received.clone()).await?;
        self.notify(
            player,
            ClientEvent::TradeCompleted {
                session_id: session_id.to_string(),
                gave,
                received: received.clone(),
            },
        )
        .await
    }

    async fn cancel_trade(&self, session_id: &str, player: &PlayerId, reason: &str) -> CoreResult<()> {
        self.roster.release_offer(player, session_id).await;
        self.notify(
            player,
            ClientEvent::TradeCancelled {
                session_id: session_id.to_string(),
                reason: reason.to_string(),
            },
        )
        .await
    }
}

/// A player connected to another node, reached by RPC
pub struct RemoteSeat {
    peers: PeerClient,
    /// Address of the node owning the player
    addr: String,
    host_id: NodeId,
    host_addr: String,
}

impl RemoteSeat {
    pub fn new(peers: PeerClient, addr: String, host_id: NodeId, host_addr: String) -> Self {
        Self {
            peers,
            addr,
            host_id,
            host_addr,
        }
    }

    async fn trade_result(&self, session_id: &str, player: &PlayerId, outcome: TradeOutcome) -> CoreResult<()> {
        let body = TradeResult {
            session_id: session_id.to_string(),
            player_id: player.clone(),
            outcome,
        };
        self.peers.post(&self.addr, "/trade/result", &body).await
    }
}

#[async_trait]
impl SeatLink for RemoteSeat {
    fn is_local(&self) -> bool {
        false
    }

    async fn open_battle(&self, session_id: &str, player: &PlayerId, opponent: &PlayerId) -> CoreResult<()> {
        let body = BattleInitiate {
            session_id: session_id.to_string(),
            local_player: player.clone(),
            opponent: opponent.clone(),
            host_server: self.host_id.clone(),
            host_address: self.host_addr.clone(),
        };
        self.peers.post(&self.addr, "/battle/initiate", &body).await
    }

    async fn request_card(&self, session_id: &str, player: &PlayerId, index: usize) -> CoreResult<()> {
        let body = MoveRequest {
            session_id: session_id.to_string(),
            player_id: player.clone(),
            index,
        };
        self.peers.post(&self.addr, "/battle/request_move", &body).await
    }

    async fn turn_resolved(&self, session_id: &str, player: &PlayerId, report: &TurnReport) -> CoreResult<()> {
        let body = TurnResult {
            session_id: session_id.to_string(),
            player_id: player.clone(),
            report: report.clone(),
        };
        self.peers.post(&self.addr, "/battle/turn_result", &body).await
    }

    async fn close_battle(&self, session_id: &str, player: &PlayerId, conclusion: &Conclusion) -> CoreResult<()> {
        let body = BattleEndNotice {
            session_id: session_id.to_string(),
            player_id: player.clone(),
            conclusion: conclusion.clone(),
        };
        self.peers.post(&self.addr, "/battle/end", &body).await
    }

    async fn open_trade(&self, session_id: &str, player: &PlayerId, partner: &PlayerId) -> CoreResult<()> {
        let body = TradeInitiate {
            session_id: session_id.to_string(),
            local_player: player.clone(),
            partner: partner.clone(),
            host_server: self.host_id.clone(),
            host_address: self.host_addr.clone(),
        };
        self.peers.post(&self.addr, "/trade/initiate", &body).await
    }

    async fn request_offer(&self, session_id: &str, player: &PlayerId) -> CoreResult<()> {
        let body = OfferRequest {
            session_id: session_id.to_string(),
            player_id: player.clone(),
        };
        self.peers.post(&self.addr, "/trade/request_card", &body).await
    }

    async fn complete_trade(&self, session_id: &str, player: &PlayerId, received: &Card) -> CoreResult<()> {
        self.trade_result(session_id, player, TradeOutcome::Completed { received: received.clone() })
            .await
    }

    async fn cancel_trade(&self, session_id: &str, player: &PlayerId, reason: &str) -> CoreResult<()> {
        self.trade_result(
            session_id,
            player,
            TradeOutcome::Cancelled {
                reason: reason.to_string(),
            },
        )
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cards::draw_booster;
    use crate::client::ClientHub;
    use crate::session::hosted::Outcome;

    /// Link that accepts everything and reaches nobody
    pub(crate) struct NullLink;

    #[async_trait]
    impl SeatLink for NullLink {
        fn is_local(&self) -> bool {
            true
        }
        async fn open_battle(&self, _: &str, _: &PlayerId, _: &PlayerId) -> CoreResult<()> {
            Ok(())
        }
        async fn request_card(&self, _: &str, _: &PlayerId, _: usize) -> CoreResult<()> {
            Ok(())
        }
        async fn turn_resolved(&self, _: &str, _: &PlayerId, _: &TurnReport) -> CoreResult<()> {
            Ok(())
        }
        async fn close_battle(&self, _: &str, _: &PlayerId, _: &Conclusion) -> CoreResult<()> {
            Ok(())
        }
        async fn open_trade(&self, _: &str, _: &PlayerId, _: &PlayerId) -> CoreResult<()> {
            Ok(())
        }
        async fn request_offer(&self, _: &str, _: &PlayerId) -> CoreResult<()> {
            Ok(())
        }
        async fn complete_trade(&self, _: &str, _: &PlayerId, _: &Card) -> CoreResult<()> {
            Ok(())
        }
        async fn cancel_trade(&self, _: &str, _: &PlayerId, _: &str) -> CoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_local_seat_battle_lifecycle() {
        let roster = Arc::new(Roster::new());
        let hub = Arc::new(ClientHub::new());
        let mut events = hub.attach("client_reply:alice").await;
        roster.register("alice", "client_reply:alice").await;
        roster.grant("alice", draw_booster("alice")).await.unwrap();

        let seat = LocalSeat::new(roster.clone(), hub.clone(), "server1".into());
        let alice = "alice".to_string();
        seat.open_battle("battle:1", &alice, &"bob".to_string()).await.unwrap();
        assert!(roster.deck_card("alice", "battle:1", 4).await.is_ok());

        seat.close_battle("battle:1", &alice, &Conclusion::winner("bob", "deck exhausted"))
            .await
            .unwrap();
        assert!(roster.deck_card("alice", "battle:1", 0).await.is_err());

        assert!(matches!(events.recv().await, Some(ClientEvent::BattleStarted { .. })));
        match events.recv().await {
            Some(ClientEvent::BattleEnded { outcome, winner, .. }) => {
                assert_eq!(outcome, Outcome::Loss);
                assert_eq!(winner.as_deref(), Some("bob"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_seat_unknown_player() {
        let seat = LocalSeat::new(Arc::new(Roster::new()), Arc::new(ClientHub::new()), "server1".into());
        assert!(seat.request_card("battle:1", &"ghost".to_string(), 0).await.is_err());
    }
}
