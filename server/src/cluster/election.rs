use crate::cluster::membership::LivenessView;
use crate::cluster::NodeId;
use tokio::sync::RwLock;

/// Smallest id among the alive nodes and self.
/// Nodes sharing a view always agree on the result.
pub fn elect(view: &LivenessView, self_id: &str) -> NodeId {
    view.iter()
        .filter(|(_, alive)| **alive)
        .map(|(id, _)| id.as_str())
        .chain(std::iter::once(self_id))
        .min()
        .unwrap_or(self_id)
        .to_string()
}

/// Current leader as this node sees it
pub struct Leadership {
    self_id: NodeId,
    current: RwLock<Option<NodeId>>,
}

impl Leadership {
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            current: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> Option<NodeId> {
        self.current.read().await.clone()
    }

    pub async fn is_leader(&self) -> bool {
        self.current.read().await.as_deref() == Some(self.self_id.as_str())
    }

    /// Unconditional election over `view`
    pub async fn elect_from(&self, view: &LivenessView) -> NodeId {
        let leader = elect(view, &self.self_id);
        let mut current = self.current.write().await;
        if current.as_deref() != Some(leader.as_str()) {
            let is_self = leader == self.self_id;
            tracing::info!(leader = %leader, is_self, "leader elected");
        }
        *current = Some(leader.clone());
        leader
    }

    /// Re-elect only when there is no leader or it is dead in `view`.
    /// A smaller id coming back never displaces a live leader.
    /// Returns the new leader when it changed.
    pub async fn reconcile(&self, view: &LivenessView) -> Option<NodeId> {
        let current = self.current().await;
        let leader_alive = current
            .as_deref()
            .map(|id| id == self.self_id || view.get(id).copied().unwrap_or(false))
            .unwrap_or(false);
        if leader_alive {
            return None;
        }

        if let Some(old) = &current {
            tracing::warn!(leader = %old, "leader is down, re-electing");
        }
        let leader = self.elect_from(view).await;
        (current.as_deref() != Some(leader.as_str())).then_some(leader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(entries: &[(&str, bool)]) -> LivenessView {
        entries.iter().map(|(id, alive)| (id.to_string(), *alive)).collect()
    }

    #[test]
    fn test_elect_smallest_alive() {
        let v = view(&[("server1", false), ("server2", true), ("server3", true)]);
        assert_eq!(elect(&v, "server3"), "server2");
        assert_eq!(elect(&v, "server2"), "server2");
    }

    #[test]
    fn test_elect_counts_self_even_if_absent() {
        let v = view(&[("server2", false), ("server3", true)]);
        assert_eq!(elect(&v, "server1"), "server1");
        assert_eq!(elect(&LivenessView::new(), "solo"), "solo");
    }

    #[test]
    fn test_identical_views_agree() {
        let v = view(&[("a", true), ("b", true), ("c", true)]);
        let leaders: Vec<NodeId> = ["a", "b", "c"].iter().map(|me| elect(&v, me)).collect();
        assert!(leaders.iter().all(|l| l == "a"));
    }

    #[tokio::test]
    async fn test_reconcile_keeps_live_leader() {
        let leadership = Leadership::new("c".into());
        leadership.elect_from(&view(&[("a", false), ("b", true), ("c", true)])).await;
        assert_eq!(leadership.current().await.as_deref(), Some("b"));

        // "a" coming back does not displace "b"
        let changed = leadership.reconcile(&view(&[("a", true), ("b", true), ("c", true)])).await;
        assert_eq!(changed, None);
        assert_eq!(leadership.current().await.as_deref(), Some("b"));
        assert!(!leadership.is_leader().await);
    }

    #[tokio::test]
    async fn test_reconcile_replaces_dead_leader() {
        let leadership = Leadership::new("c".into());
        leadership.elect_from(&view(&[("b", true), ("c", true)])).await;

        let changed = leadership.reconcile(&view(&[("b", false), ("c", true)])).await;
        assert_eq!(changed.as_deref(), Some("c"));
        assert!(leadership.is_leader().await);
    }
}
