use crate::cards::Card;
use crate::client::ClientSink;
use crate::cluster::{HttpProbe, Leadership, Membership, NodeId, PeerClient, Probe, UdpProbe};
use crate::config::{NodeConfig, ProbeMode};
use crate::directory::{InventoryLedger, PlayerDirectory};
use crate::error::{CoreError, CoreResult};
use crate::protocol::{HealthResponse, StatusResponse};
use crate::roster::Roster;
use crate::session::battle::SubmittedCard;
use crate::session::{HostedSession, LocalSeat, PeerSessionRef, RemoteSeat, Seat, SeatLink, SessionTable};
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

/// Everything one game server node owns. Each table sits behind its own
/// lock; no operation holds two of them at once.
pub struct ClusterNode {
    pub config: NodeConfig,
    pub membership: Membership,
    pub leadership: Leadership,
    pub directory: PlayerDirectory,
    pub inventory: InventoryLedger,
    pub roster: Arc<Roster>,
    pub battles: SessionTable<HostedSession<SubmittedCard>>,
    pub trades: SessionTable<HostedSession<Card>>,
    pub peer_battles: SessionTable<PeerSessionRef>,
    pub peer_trades: SessionTable<PeerSessionRef>,
    pub peers: PeerClient,
    pub clients: Arc<dyn ClientSink>,
    probe: Box<dyn Probe>,
}

impl ClusterNode {
    pub fn new(config: NodeConfig, clients: Arc<dyn ClientSink>) -> Result<Arc<Self>> {
        let timeout = config.timings.request_timeout;
        let probe: Box<dyn Probe> = match config.probe_mode {
            ProbeMode::Http => {
                let addrs: BTreeMap<NodeId, String> =
                    config.peers.iter().map(|p| (p.id.clone(), p.addr.clone())).collect();
                Box::new(HttpProbe::new(addrs, timeout)?)
            }
            ProbeMode::Udp => Box::new(UdpProbe::new(config.probe_addrs.clone(), timeout)),
        };

        let id = config.id().clone();
        Ok(Arc::new(Self {
            membership: Membership::new(id.clone(), config.peer_ids()),
            leadership: Leadership::new(id),
            directory: PlayerDirectory::new(),
            inventory: InventoryLedger::new(config.initial_stock),
            roster: Arc::new(Roster::new()),
            battles: SessionTable::new("battle"),
            trades: SessionTable::new("trade"),
            peer_battles: SessionTable::new("battle reference"),
            peer_trades: SessionTable::new("trade reference"),
            peers: PeerClient::new(timeout)?,
            clients,
            probe,
            config,
        }))
    }

    pub fn id(&self) -> &NodeId {
        self.config.id()
    }

    pub async fn is_leader(&self) -> bool {
        self.leadership.is_leader().await
    }

    /// RPC address of the current leader
    pub async fn leader_addr(&self) -> CoreResult<String> {
        let leader = self
            .leadership
            .current()
            .await
            .ok_or_else(|| CoreError::NetworkFailure("no leader elected yet".to_string()))?;
        self.config
            .addr_of(&leader)
            .map(str::to_string)
            .ok_or_else(|| CoreError::InvariantViolation(format!("leader {} has no known address", leader)))
    }

    /// Full probe round followed by an unconditional election
    pub async fn elect_initial(&self) -> NodeId {
        let (view, _) = self.membership.probe_round(self.probe.as_ref()).await;
        self.leadership.elect_from(&view).await
    }

    /// One liveness round: probe, re-elect if the leader died, then clean up
    /// after newly dead nodes. Re-electing first lets a new leader sweep the
    /// directory entries of the leader it replaced.
    pub async fn liveness_round(&self) -> Vec<NodeId> {
        let (view, dead) = self.membership.probe_round(self.probe.as_ref()).await;
        self.leadership.reconcile(&view).await;
        if !dead.is_empty() {
            self.cleanup_dead_nodes(&dead).await;
        }
        dead
    }

    pub async fn run_liveness(self: Arc<Self>) {
        let mut ticker = interval(self.config.timings.health_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the initial election just probed
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.liveness_round().await;
        }
    }

    pub async fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            server_id: self.id().clone(),
            is_leader: self.is_leader().await,
        }
    }

    pub async fn status(&self) -> StatusResponse {
        StatusResponse {
            server_id: self.id().clone(),
            reply_queue: self.config.identity.reply_queue.clone(),
            leader: self.leadership.current().await,
            is_leader: self.is_leader().await,
            liveness: self.membership.view().await,
            directory_size: self.directory.len().await,
            local_players: self.roster.len().await,
            stock: self.inventory.get().await,
            hosted_battles: self.battles.len().await,
            hosted_trades: self.trades.len().await,
            peer_battles: self.peer_battles.len().await,
            peer_trades: self.peer_trades.len().await,
        }
    }

    /// Link to a player connected here, for a session hosted on `host`
    pub fn local_link(&self, host: &NodeId) -> Arc<dyn SeatLink> {
        Arc::new(LocalSeat::new(self.roster.clone(), self.clients.clone(), host.clone()))
    }

    pub fn local_seat(&self, player: &str) -> Seat {
        Seat {
            player: player.to_string(),
            node: self.id().clone(),
            link: self.local_link(self.id()),
        }
    }

    /// Seat for any connected player, local or remote, resolved through the directory
    pub async fn seat_for(&self, player: &str) -> CoreResult<Seat> {
        let entry = self.directory.lookup(player).await?;
        if entry.owner == *self.id() {
            return Ok(self.local_seat(player));
        }

        let addr = self
            .config
            .addr_of(&entry.owner)
            .ok_or_else(|| CoreError::not_found(format!("node {} is not configured", entry.owner)))?;
        let link = RemoteSeat::new(
            self.peers.clone(),
            addr.to_string(),
            self.id().clone(),
            self.config.identity.rpc_addr.clone(),
        );
        Ok(Seat {
            player: entry.player_id,
            node: entry.owner,
            link: Arc::new(link),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::{ClientEvent, ClientHub};
    use crate::config::{NodeIdentity, PeerSpec};
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Single node with no peers, already its own leader
    pub(crate) async fn solo_node(id: &str) -> (Arc<ClusterNode>, Arc<ClientHub>) {
        let identity = NodeIdentity::new(id, "127.0.0.1:9", "127.0.0.1:9");
        let hub = Arc::new(ClientHub::new());
        let node = ClusterNode::new(NodeConfig::new(identity, vec![]), hub.clone()).unwrap();
        node.elect_initial().await;
        (node, hub)
    }

    /// Connect `player` and buy one booster
    pub(crate) async fn join(node: &Arc<ClusterNode>, hub: &ClientHub, player: &str) -> UnboundedReceiver<ClientEvent> {
        let reply = format!("client_reply:{}", player);
        let events = hub.attach(&reply).await;
        node.connect_player(player, &reply).await.unwrap();
        node.purchase(player).await.unwrap();
        events
    }

    #[tokio::test]
    async fn test_solo_node_leads_itself() {
        let (node, _hub) = solo_node("server7").await;
        assert!(node.is_leader().await);
        assert_eq!(node.leader_addr().await.unwrap(), "127.0.0.1:9");
        assert!(node.liveness_round().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_peers_are_dead() {
        let identity = NodeIdentity::new("server2", "127.0.0.1:9", "127.0.0.1:9");
        let peers = vec![PeerSpec {
            id: "server1".into(),
            addr: "127.0.0.1:1".into(),
        }];
        let mut config = NodeConfig::new(identity, peers);
        config.timings.request_timeout = std::time::Duration::from_millis(200);
        let node = ClusterNode::new(config, Arc::new(ClientHub::new())).unwrap();

        // server1 would win on id, but it does not answer
        assert_eq!(node.elect_initial().await, "server2");
        let status = node.status().await;
        assert_eq!(status.liveness.get("server1"), Some(&false));
        assert!(status.is_leader);
    }

    #[tokio::test]
    async fn test_seat_for_remote_player() {
        let identity = NodeIdentity::new("server1", "127.0.0.1:9", "127.0.0.1:9");
        let peers = vec![PeerSpec {
            id: "server2".into(),
            addr: "127.0.0.1:7002".into(),
        }];
        let node = ClusterNode::new(NodeConfig::new(identity, peers), Arc::new(ClientHub::new())).unwrap();
        node.apply_directory_update(crate::protocol::PlayerUpdate {
            player_id: "bob".into(),
            server_id: "server2".into(),
            reply_address: "client_reply:bob".into(),
            action: crate::protocol::DirectoryAction::Add,
        })
        .await;

        let seat = node.seat_for("bob").await.unwrap();
        assert_eq!(seat.node, "server2");
        assert!(!seat.link.is_local());
        assert!(matches!(node.seat_for("ghost").await, Err(CoreError::NotFound(_))));
    }
}
