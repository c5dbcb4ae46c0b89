// Leader-arbitrated writes to the player directory and the booster stock.
// The leader commits locally, then broadcasts the delta to every alive peer
// without waiting; followers apply deltas idempotently.

use crate::cards::{draw_booster, Card};
use crate::client::{ClientEvent, ClientSink};
use crate::directory::DirectoryEntry;
use crate::error::{CoreError, CoreResult};
use crate::node::ClusterNode;
use crate::protocol::{
    ConnectRequest, DirectoryAction, DisconnectRequest, InventoryUpdate, PlayerUpdate, PurchaseOutcome,
    PurchaseRequest,
};
use crate::session::Conclusion;
use serde::Serialize;

impl ClusterNode {
    async fn require_leader(&self) -> CoreResult<()> {
        if self.is_leader().await {
            Ok(())
        } else {
            Err(CoreError::NotLeader(self.leadership.current().await))
        }
    }

    /// Fire-and-forget POST to every alive peer
    pub async fn broadcast<B>(&self, path: &'static str, body: B)
    where
        B: Serialize + Clone + Send + Sync + 'static,
    {
        for peer in self.membership.alive_peers().await {
            let Some(addr) = self.config.addr_of(&peer).map(str::to_string) else {
                continue;
            };
            let client = self.peers.clone();
            let body = body.clone();
            tokio::spawn(async move {
                if let Err(e) = client.post(&addr, path, &body).await {
                    tracing::warn!(peer = %peer, path, error = %e, "broadcast not delivered");
                }
            });
        }
    }

    // ============= Directory =============

    /// Register a player connected to this node and announce it cluster-wide
    pub async fn connect_player(&self, player_id: &str, reply_address: &str) -> CoreResult<()> {
        let first = self.roster.register(player_id, reply_address).await;
        let entry = DirectoryEntry {
            player_id: player_id.to_string(),
            owner: self.id().clone(),
            reply_address: reply_address.to_string(),
        };

        let committed = if self.is_leader().await {
            self.commit_connect(entry).await;
            Ok(())
        } else {
            match self.leader_addr().await {
                Ok(leader) => {
                    let result = self.peers.post(&leader, "/players/connect", &ConnectRequest::from(&entry)).await;
                    if result.is_ok() {
                        // Read our own write without waiting for the broadcast
                        self.directory.upsert(entry).await;
                    }
                    result
                }
                Err(e) => Err(e),
            }
        };

        if let Err(e) = committed {
            if first {
                self.roster.remove(player_id).await;
            }
            return Err(e);
        }

        tracing::info!(player = %player_id, "player connected");
        self.clients
            .push(
                reply_address,
                ClientEvent::Connected {
                    player_id: player_id.to_string(),
                    server_id: self.id().clone(),
                },
            )
            .await;
        Ok(())
    }

    /// Leader: commit a registration. A move to another node first retires
    /// the old owner's entry everywhere.
    pub async fn commit_connect(&self, entry: DirectoryEntry) {
        if let Some(previous) = self.directory.upsert(entry.clone()).await {
            if previous.owner != entry.owner {
                tracing::info!(player = %entry.player_id, from = %previous.owner, to = %entry.owner, "player moved");
                self.broadcast("/players/update", PlayerUpdate::remove(&previous)).await;
            }
        }
        self.broadcast("/players/update", PlayerUpdate::add(&entry)).await;
    }

    pub async fn accept_connect(&self, req: ConnectRequest) -> CoreResult<()> {
        self.require_leader().await?;
        self.commit_connect(req.into()).await;
        Ok(())
    }

    /// The connection at `reply_address` closed: end the player's sessions
    /// and retire its entry. A connection the player has since replaced
    /// with a newer one on this node changes nothing.
    pub async fn disconnect_player(&self, player_id: &str, reply_address: &str) {
        if !self.roster.remove_connection(player_id, reply_address).await {
            tracing::debug!(player = %player_id, reply = %reply_address, "stale connection closed");
            return;
        }
        tracing::info!(player = %player_id, "player disconnected");

        for (session_id, session) in self.battles.drain_where(|s| s.involves_player(player_id)).await {
            let winner = session
                .side_of(player_id)
                .map(|side| session.seats[side.other().index()].player.clone());
            let reason = format!("{} disconnected", player_id);
            let conclusion = match winner {
                Some(winner) => Conclusion::winner(winner, reason),
                None => Conclusion::cancelled(reason),
            };
            tracing::debug!(session = %session_id, "ending battle after disconnect");
            session.teardown(conclusion);
        }
        for (_, session) in self.trades.drain_where(|s| s.involves_player(player_id)).await {
            session.teardown(Conclusion::cancelled(format!("{} disconnected", player_id)));
        }
        // Hosts elsewhere find out through a failed request or a timeout
        self.peer_battles.drain_where(|r| r.player == player_id).await;
        self.peer_trades.drain_where(|r| r.player == player_id).await;

        let owner = self.id().clone();
        if self.is_leader().await {
            self.commit_disconnect(player_id, &owner).await;
            return;
        }
        let req = DisconnectRequest {
            player_id: player_id.to_string(),
            server_id: owner.clone(),
        };
        let result = match self.leader_addr().await {
            Ok(leader) => self.peers.post(&leader, "/players/disconnect", &req).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                self.directory.remove_if_owned(player_id, &owner).await;
            }
            Err(e) => tracing::warn!(player = %player_id, error = %e, "leader not told about disconnect"),
        }
    }

    /// Leader: retire an entry still owned by `owner`
    pub async fn commit_disconnect(&self, player_id: &str, owner: &str) {
        if let Some(entry) = self.directory.get(player_id).await {
            if self.directory.remove_if_owned(player_id, owner).await {
                self.broadcast("/players/update", PlayerUpdate::remove(&entry)).await;
            }
        }
    }

    pub async fn accept_disconnect(&self, req: DisconnectRequest) -> CoreResult<()> {
        self.require_leader().await?;
        self.commit_disconnect(&req.player_id, &req.server_id).await;
        Ok(())
    }

    /// Follower: apply a directory delta from the leader
    pub async fn apply_directory_update(&self, update: PlayerUpdate) {
        match update.action {
            DirectoryAction::Add => {
                self.directory
                    .upsert(DirectoryEntry {
                        player_id: update.player_id,
                        owner: update.server_id,
                        reply_address: update.reply_address,
                    })
                    .await;
            }
            DirectoryAction::Remove => {
                self.directory.remove_if_owned(&update.player_id, &update.server_id).await;
            }
        }
    }

    // ============= Inventory =============

    /// Buy one booster for a player connected here
    pub async fn purchase(&self, player_id: &str) -> CoreResult<Vec<Card>> {
        if !self.roster.contains(player_id).await {
            return Err(CoreError::not_found(format!("{} is not connected here", player_id)));
        }

        let outcome = if self.is_leader().await {
            self.sell_booster(player_id).await?
        } else {
            let req = PurchaseRequest {
                player_id: player_id.to_string(),
                server_id: self.id().clone(),
            };
            let leader = self.leader_addr().await?;
            self.peers.call::<_, PurchaseOutcome>(&leader, "/cards/buy", &req).await?
        };

        let (cards, remaining) = match outcome {
            PurchaseOutcome::Sold { cards, remaining } => (cards, remaining),
            PurchaseOutcome::NoStock => return Err(CoreError::conflict("no stock")),
        };
        self.inventory.lower_to(remaining).await;
        self.roster.grant(player_id, cards.clone()).await?;

        let reply = self.roster.reply_address(player_id).await?;
        self.clients
            .push(
                &reply,
                ClientEvent::CardsDrawn {
                    cards: cards.clone(),
                    remaining_stock: remaining,
                },
            )
            .await;
        Ok(cards)
    }

    /// Leader: take one booster out of stock for a known player
    pub async fn sell_booster(&self, player_id: &str) -> CoreResult<PurchaseOutcome> {
        self.directory.lookup(player_id).await?;
        match self.inventory.try_take().await {
            Ok(remaining) => {
                tracing::info!(player = %player_id, remaining, "booster sold");
                self.broadcast("/inventory/update", InventoryUpdate { remaining }).await;
                Ok(PurchaseOutcome::Sold {
                    cards: draw_booster(player_id),
                    remaining,
                })
            }
            Err(CoreError::Conflict(_)) => Ok(PurchaseOutcome::NoStock),
            Err(e) => Err(e),
        }
    }

    pub async fn accept_purchase(&self, req: PurchaseRequest) -> CoreResult<PurchaseOutcome> {
        self.require_leader().await?;
        self.sell_booster(&req.player_id).await
    }

    /// Follower: apply a stock count from the leader
    pub async fn apply_inventory(&self, update: InventoryUpdate) {
        if !self.inventory.lower_to(update.remaining).await {
            tracing::debug!(remaining = update.remaining, "stale inventory count ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::client::ClientEvent;
    use crate::error::CoreError;
    use crate::node::tests::{join, solo_node};
    use crate::protocol::{DirectoryAction, InventoryUpdate, PlayerUpdate};

    #[tokio::test]
    async fn test_leader_connect_and_purchase() {
        let (node, hub) = solo_node("server1").await;
        let mut events = join(&node, &hub, "alice").await;

        assert_eq!(node.directory.get("alice").await.unwrap().owner, "server1");
        assert_eq!(node.inventory.get().await, 9);
        assert_eq!(node.roster.cards("alice").await.unwrap().len(), 5);

        assert!(matches!(events.recv().await, Some(ClientEvent::Connected { .. })));
        match events.recv().await {
            Some(ClientEvent::CardsDrawn { cards, remaining_stock }) => {
                assert_eq!(cards.len(), 5);
                assert_eq!(remaining_stock, 9);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_purchase_until_no_stock() {
        let (node, hub) = solo_node("server1").await;
        let _events = join(&node, &hub, "alice").await;
        node.inventory.set(1).await;

        assert!(node.purchase("alice").await.is_ok());
        assert!(matches!(node.purchase("alice").await, Err(CoreError::Conflict(_))));
        assert_eq!(node.inventory.get().await, 0);
        assert_eq!(node.roster.cards("alice").await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_purchase_unknown_player() {
        let (node, _hub) = solo_node("server1").await;
        assert!(matches!(node.purchase("ghost").await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_disconnect_retires_entry() {
        let (node, hub) = solo_node("server1").await;
        let _events = join(&node, &hub, "alice").await;

        node.disconnect_player("alice", "client_reply:alice").await;
        assert!(node.directory.get("alice").await.is_none());
        assert!(!node.roster.contains("alice").await);

        // Second disconnect is a no-op
        node.disconnect_player("alice", "client_reply:alice").await;
    }

    #[tokio::test]
    async fn test_closing_replaced_connection_keeps_player() {
        let (node, hub) = solo_node("server1").await;
        let _old = join(&node, &hub, "alice").await;

        let mut fresh = hub.attach("client_reply:alice-2").await;
        node.connect_player("alice", "client_reply:alice-2").await.unwrap();
        assert!(matches!(fresh.recv().await, Some(ClientEvent::Connected { .. })));

        // The first socket closes after the reconnect
        node.disconnect_player("alice", "client_reply:alice").await;

        assert!(node.roster.contains("alice").await);
        let entry = node.directory.get("alice").await.unwrap();
        assert_eq!(entry.reply_address, "client_reply:alice-2");

        let cards = node.purchase("alice").await.unwrap();
        assert_eq!(cards.len(), 5);
        assert!(matches!(fresh.recv().await, Some(ClientEvent::CardsDrawn { .. })));

        node.disconnect_player("alice", "client_reply:alice-2").await;
        assert!(!node.roster.contains("alice").await);
        assert!(node.directory.get("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_apply_updates_idempotently() {
        let (node, _hub) = solo_node("server1").await;
        let add = PlayerUpdate {
            player_id: "bob".into(),
            server_id: "server2".into(),
            reply_address: "client_reply:bob".into(),
            action: DirectoryAction::Add,
        };
        node.apply_directory_update(add.clone()).await;
        node.apply_directory_update(add.clone()).await;
        assert_eq!(node.directory.len().await, 1);

        // A remove naming a stale owner leaves the entry alone
        let stale = PlayerUpdate {
            server_id: "server3".into(),
            action: DirectoryAction::Remove,
            ..add.clone()
        };
        node.apply_directory_update(stale).await;
        assert!(node.directory.get("bob").await.is_some());

        let remove = PlayerUpdate {
            action: DirectoryAction::Remove,
            ..add
        };
        node.apply_directory_update(remove.clone()).await;
        node.apply_directory_update(remove).await;
        assert!(node.directory.get("bob").await.is_none());

        node.apply_inventory(InventoryUpdate { remaining: 4 }).await;
        assert_eq!(node.inventory.get().await, 4);

        // An older count delivered late is ignored
        node.apply_inventory(InventoryUpdate { remaining: 5 }).await;
        assert_eq!(node.inventory.get().await, 4);
    }

    #[tokio::test]
    async fn test_follower_refuses_leader_writes() {
        let (node, _hub) = solo_node("server1").await;
        node.leadership
            .elect_from(&[("server0".to_string(), true)].into_iter().collect())
            .await;

        let req = crate::protocol::PurchaseRequest {
            player_id: "alice".into(),
            server_id: "server2".into(),
        };
        assert!(matches!(node.accept_purchase(req).await, Err(CoreError::NotLeader(Some(_)))));
    }
}
