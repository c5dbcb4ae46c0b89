use crate::cluster::probe::Probe;
use crate::cluster::NodeId;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Node id -> alive as seen by this node in the last probe round
pub type LivenessView = BTreeMap<NodeId, bool>;

/// Nodes alive in `previous` but not in `next`
pub fn newly_dead(previous: &LivenessView, next: &LivenessView) -> Vec<NodeId> {
    previous
        .iter()
        .filter(|(_, alive)| **alive)
        .filter(|(id, _)| !next.get(*id).copied().unwrap_or(false))
        .map(|(id, _)| id.clone())
        .collect()
}

/// This node's liveness view of the static peer set.
/// The view is replaced wholesale each round, never patched.
pub struct Membership {
    self_id: NodeId,
    peers: Vec<NodeId>,
    view: RwLock<LivenessView>,
}

impl Membership {
    /// Peers start out dead until the first probe round says otherwise
    pub fn new(self_id: NodeId, peers: Vec<NodeId>) -> Self {
        let mut view: LivenessView = peers.iter().map(|p| (p.clone(), false)).collect();
        view.insert(self_id.clone(), true);
        Self {
            self_id,
            peers,
            view: RwLock::new(view),
        }
    }

    pub async fn view(&self) -> LivenessView {
        self.view.read().await.clone()
    }

    pub async fn is_alive(&self, node: &str) -> bool {
        node == self.self_id || self.view.read().await.get(node).copied().unwrap_or(false)
    }

    /// Alive peers, self excluded
    pub async fn alive_peers(&self) -> Vec<NodeId> {
        self.view
            .read()
            .await
            .iter()
            .filter(|(id, alive)| **alive && **id != self.self_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Probe every peer concurrently and install the fresh view.
    /// Returns the new view and the nodes that died since the last one.
    pub async fn probe_round(&self, probe: &dyn Probe) -> (LivenessView, Vec<NodeId>) {
        let checks = self.peers.iter().map(|peer| async move {
            let alive = probe.check(peer).await;
            (peer.clone(), alive)
        });
        let mut next: LivenessView = join_all(checks).await.into_iter().collect();
        next.insert(self.self_id.clone(), true);

        (next.clone(), self.replace(next).await)
    }

    /// Swap in a new view, returning the newly dead nodes
    pub async fn replace(&self, mut next: LivenessView) -> Vec<NodeId> {
        next.insert(self.self_id.clone(), true);
        let mut view = self.view.write().await;
        let dead = newly_dead(&view, &next);
        for node in &dead {
            tracing::warn!(node = %node, "peer stopped answering probes");
        }
        *view = next;
        dead
    }
}
