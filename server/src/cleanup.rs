use crate::cluster::NodeId;
use crate::node::ClusterNode;
use crate::protocol::PlayerUpdate;
use crate::session::Conclusion;

impl ClusterNode {
    /// React to nodes that just died. The three sweeps touch disjoint tables
    /// and run concurrently.
    pub async fn cleanup_dead_nodes(&self, dead: &[NodeId]) {
        tracing::info!(?dead, "cleaning up after dead nodes");
        tokio::join!(
            self.sweep_hosted_sessions(dead),
            self.sweep_peer_refs(dead),
            self.sweep_directory(dead),
        );
    }

    /// Sessions hosted here whose other side lived on a dead node.
    /// Battles go to the surviving player, trades are voided.
    async fn sweep_hosted_sessions(&self, dead: &[NodeId]) {
        for (session_id, session) in self.battles.drain_where(|s| s.involves_any(dead)).await {
            let survivor = session.seats.iter().find(|seat| !dead.contains(&seat.node));
            let conclusion = match survivor {
                Some(seat) => Conclusion::winner(seat.player.clone(), "opponent's server went offline"),
                None => Conclusion::cancelled("every server in the battle went offline"),
            };
            tracing::info!(session = %session_id, verdict = ?conclusion.verdict, "battle resolved by cleanup");
            session.teardown(conclusion);
        }

        for (session_id, session) in self.trades.drain_where(|s| s.involves_any(dead)).await {
            tracing::info!(session = %session_id, "trade voided by cleanup");
            session.teardown(Conclusion::cancelled("partner's server went offline"));
        }
    }

    /// Our halves of sessions whose host died
    async fn sweep_peer_refs(&self, dead: &[NodeId]) {
        let conclusion = Conclusion::cancelled("host server went offline");

        for (session_id, peer_ref) in self.peer_battles.drain_where(|r| dead.contains(&r.host_node)).await {
            let link = self.local_link(&peer_ref.host_node);
            if let Err(e) = link.close_battle(&session_id, &peer_ref.player, &conclusion).await {
                tracing::debug!(session = %session_id, error = %e, "void notice not delivered");
            }
        }

        for (session_id, peer_ref) in self.peer_trades.drain_where(|r| dead.contains(&r.host_node)).await {
            let link = self.local_link(&peer_ref.host_node);
            if let Err(e) = link.cancel_trade(&session_id, &peer_ref.player, &conclusion.reason).await {
                tracing::debug!(session = %session_id, error = %e, "void notice not delivered");
            }
        }
    }

    /// Leader only: drop players owned by dead nodes everywhere
    async fn sweep_directory(&self, dead: &[NodeId]) {
        if !self.is_leader().await {
            return;
        }
        for entry in self.directory.remove_owned_by(dead).await {
            tracing::info!(player = %entry.player_id, owner = %entry.owner, "dropping player of dead node");
            self.broadcast("/players/update", PlayerUpdate::remove(&entry)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::client::ClientEvent;
    use crate::node::tests::{join, solo_node};
    use crate::protocol::{BattleInitiate, DirectoryAction, PlayerUpdate, TradeInitiate};
    use crate::session::Outcome;

    #[tokio::test]
    async fn test_peer_ref_voided_when_host_dies() {
        let (node, hub) = solo_node("server1").await;
        let mut alice = join(&node, &hub, "alice").await;

        node.peer_open_battle(BattleInitiate {
            session_id: "battle:feedbeef".into(),
            local_player: "alice".into(),
            opponent: "bob".into(),
            host_server: "server2".into(),
            host_address: "127.0.0.1:9".into(),
        })
        .await
        .unwrap();
        assert_eq!(node.peer_battles.len().await, 1);

        node.cleanup_dead_nodes(&["server2".to_string()]).await;

        assert!(node.peer_battles.is_empty().await);
        let mut outcome = None;
        while let Ok(event) = alice.try_recv() {
            if let ClientEvent::BattleEnded { outcome: o, .. } = event {
                outcome = Some(o);
            }
        }
        assert_eq!(outcome, Some(Outcome::Cancelled));
        assert!(node.roster.deck_card("alice", "battle:feedbeef", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_peer_trade_voided_and_offer_returned() {
        let (node, hub) = solo_node("server1").await;
        let mut alice = join(&node, &hub, "alice").await;
        let session = "trade:feedbeef";

        node.peer_open_trade(TradeInitiate {
            session_id: session.into(),
            local_player: "alice".into(),
            partner: "bob".into(),
            host_server: "server2".into(),
            host_address: "127.0.0.1:9".into(),
        })
        .await
        .unwrap();
        let card = node.roster.cards("alice").await.unwrap()[0].id.clone();
        node.roster.reserve_offer("alice", session, &card).await.unwrap();
        assert_eq!(node.roster.cards("alice").await.unwrap().len(), 4);

        // A different host dying leaves the trade alone
        node.cleanup_dead_nodes(&["server3".to_string()]).await;
        assert_eq!(node.peer_trades.len().await, 1);

        node.cleanup_dead_nodes(&["server2".to_string()]).await;

        assert!(node.peer_trades.is_empty().await);
        let mut reason = None;
        while let Ok(event) = alice.try_recv() {
            if let ClientEvent::TradeCancelled { session_id, reason: r } = event {
                assert_eq!(session_id, session);
                reason = Some(r);
            }
        }
        assert_eq!(reason.as_deref(), Some("host server went offline"));
        let cards = node.roster.cards("alice").await.unwrap();
        assert_eq!(cards.len(), 5);
        assert!(cards.iter().any(|c| c.id == card));
    }

    #[tokio::test]
    async fn test_leader_drops_dead_nodes_players() {
        let (node, _hub) = solo_node("server1").await;
        for (player, owner) in [("bob", "server2"), ("carol", "server3")] {
            node.apply_directory_update(PlayerUpdate {
                player_id: player.into(),
                server_id: owner.into(),
                reply_address: format!("client_reply:{}", player),
                action: DirectoryAction::Add,
            })
            .await;
        }

        node.cleanup_dead_nodes(&["server2".to_string()]).await;

        assert!(node.directory.get("bob").await.is_none());
        assert!(node.directory.get("carol").await.is_some());
    }
}
