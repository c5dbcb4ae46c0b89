use crate::cluster::NodeId;
use crate::directory::PlayerId;
use crate::error::{CoreError, CoreResult};
use crate::session::link::SeatLink;
use crate::session::table::SessionTable;
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    P1,
    P2,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::P1, Side::P2];

    pub fn index(self) -> usize {
        match self {
            Side::P1 => 0,
            Side::P2 => 1,
        }
    }

    pub fn other(self) -> Side {
        match self {
            Side::P1 => Side::P2,
            Side::P2 => Side::P1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Winner(PlayerId),
    Tie,
    Cancelled,
}

/// A verdict as seen by one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Victory,
    Loss,
    Tie,
    Cancelled,
}

impl Verdict {
    pub fn outcome_for(&self, player: &str) -> Outcome {
        match self {
            Verdict::Winner(winner) if winner == player => Outcome::Victory,
            Verdict::Winner(_) => Outcome::Loss,
            Verdict::Tie => Outcome::Tie,
            Verdict::Cancelled => Outcome::Cancelled,
        }
    }

    pub fn winner(&self) -> Option<&PlayerId> {
        match self {
            Verdict::Winner(winner) => Some(winner),
            _ => None,
        }
    }
}

/// How a session ended and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conclusion {
    pub verdict: Verdict,
    pub reason: String,
}

impl Conclusion {
    pub fn winner(player: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Winner(player.into()),
            reason: reason.into(),
        }
    }

    pub fn tie(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Tie,
            reason: reason.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Cancelled,
            reason: reason.into(),
        }
    }
}

/// One side of a session: who plays it, where they live, how to reach them
#[derive(Clone)]
pub struct Seat {
    pub player: PlayerId,
    pub node: NodeId,
    pub link: Arc<dyn SeatLink>,
}

/// Host-side record of a running session, stored in a SessionTable.
/// `P` is what a side submits: a battle card or a trade offer.
pub struct HostedSession<P> {
    pub seats: [Seat; 2],
    inboxes: [mpsc::Sender<P>; 2],
    halt: Option<oneshot::Sender<Conclusion>>,
}

/// Receiving half, owned by the session's coordinating task
pub struct SessionInbox<P> {
    receivers: [mpsc::Receiver<P>; 2],
    halt: oneshot::Receiver<Conclusion>,
    halt_spent: bool,
}

pub enum Waited<P> {
    Arrived(P),
    TimedOut,
    Closed,
    Halted(Conclusion),
}

/// Create a session record and its inbox. Each side gets a single-slot channel.
pub fn open<P>(seats: [Seat; 2]) -> (HostedSession<P>, SessionInbox<P>) {
    let (tx1, rx1) = mpsc::channel(1);
    let (tx2, rx2) = mpsc::channel(1);
    let (halt_tx, halt_rx) = oneshot::channel();

    let session = HostedSession {
        seats,
        inboxes: [tx1, tx2],
        halt: Some(halt_tx),
    };
    let inbox = SessionInbox {
        receivers: [rx1, rx2],
        halt: halt_rx,
        halt_spent: false,
    };
    (session, inbox)
}

impl<P> HostedSession<P> {
    pub fn side_of(&self, player: &str) -> Option<Side> {
        Side::BOTH.into_iter().find(|s| self.seats[s.index()].player == player)
    }

    pub fn sender(&self, side: Side) -> mpsc::Sender<P> {
        self.inboxes[side.index()].clone()
    }

    pub fn involves_player(&self, player: &str) -> bool {
        self.side_of(player).is_some()
    }

    pub fn involves_any(&self, nodes: &[NodeId]) -> bool {
        self.seats.iter().any(|s| nodes.contains(&s.node))
    }

    /// Stop the coordinating task with `conclusion` and close every channel.
    /// Consumes the record: callers get it from `SessionTable::remove`, so a
    /// second teardown of the same session finds nothing to tear down.
    pub fn teardown(mut self, conclusion: Conclusion) {
        if let Some(halt) = self.halt.take() {
            // The task may already have finished on its own
            let _ = halt.send(conclusion);
        }
    }
}

impl<P> SessionInbox<P> {
    /// Non-blocking check for a stop signal
    pub fn halted(&mut self) -> Option<Conclusion> {
        if self.halt_spent {
            return None;
        }
        match self.halt.try_recv() {
            Ok(conclusion) => {
                self.halt_spent = true;
                Some(conclusion)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => {
                self.halt_spent = true;
                None
            }
        }
    }

    /// Wait for `side` to submit something `accept` takes, until `deadline`.
    /// Rejected submissions (stale duplicates) are dropped and waiting resumes.
    pub async fn wait(&mut self, side: Side, deadline: Instant, accept: impl Fn(&P) -> bool) -> Waited<P> {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                halt = &mut self.halt, if !self.halt_spent => {
                    self.halt_spent = true;
                    if let Ok(conclusion) = halt {
                        return Waited::Halted(conclusion);
                    }
                }
                item = self.receivers[side.index()].recv() => match item {
                    Some(item) if accept(&item) => return Waited::Arrived(item),
                    Some(_) => tracing::debug!(?side, "discarding stale submission"),
                    None => return Waited::Closed,
                },
                _ = &mut sleep => return Waited::TimedOut,
            }
        }
    }
}

/// Hand a submission to a hosted session's single-slot inbox
pub async fn deliver<P>(sender: mpsc::Sender<P>, item: P, wait: Duration) -> CoreResult<()> {
    sender.send_timeout(item, wait).await.map_err(|e| match e {
        SendTimeoutError::Timeout(_) => CoreError::conflict("a submission is already pending"),
        SendTimeoutError::Closed(_) => CoreError::not_found("session has ended"),
    })
}

/// This node's half of a session hosted elsewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSessionRef {
    pub session_id: SessionId,
    pub player: PlayerId,
    pub counterpart: PlayerId,
    pub host_node: NodeId,
    pub host_addr: String,
}

impl SessionTable<PeerSessionRef> {
    /// The reference for `session_id`, provided it belongs to `player`
    pub async fn lookup_ref(&self, session_id: &str, player: &str) -> CoreResult<PeerSessionRef> {
        self.read(session_id, PeerSessionRef::clone)
            .await
            .filter(|r| r.player == player)
            .ok_or_else(|| CoreError::not_found(format!("{} is not in session {}", player, session_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::link::tests::NullLink;

    fn seats() -> [Seat; 2] {
        let seat = |player: &str, node: &str| Seat {
            player: player.to_string(),
            node: node.to_string(),
            link: Arc::new(NullLink),
        };
        [seat("alice", "server1"), seat("bob", "server2")]
    }

    #[test]
    fn test_outcome_for() {
        let verdict = Verdict::Winner("alice".into());
        assert_eq!(verdict.outcome_for("alice"), Outcome::Victory);
        assert_eq!(verdict.outcome_for("bob"), Outcome::Loss);
        assert_eq!(Verdict::Tie.outcome_for("bob"), Outcome::Tie);
        assert_eq!(Verdict::Cancelled.outcome_for("bob"), Outcome::Cancelled);
    }

    #[test]
    fn test_session_lookups() {
        let (session, _inbox) = open::<u32>(seats());
        assert_eq!(session.side_of("bob"), Some(Side::P2));
        assert_eq!(session.side_of("carol"), None);
        assert!(session.involves_any(&["server2".to_string()]));
        assert!(!session.involves_any(&["server3".to_string()]));
    }

    #[tokio::test]
    async fn test_wait_discards_stale_submissions() {
        let (session, mut inbox) = open::<u32>(seats());
        let sender = session.sender(Side::P1);

        tokio::spawn(async move {
            sender.send(7).await.unwrap();
            sender.send(3).await.unwrap();
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        match inbox.wait(Side::P1, deadline, |v| *v == 3).await {
            Waited::Arrived(v) => assert_eq!(v, 3),
            _ => panic!("expected the matching submission"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let (_session, mut inbox) = open::<u32>(seats());
        let deadline = Instant::now() + Duration::from_secs(20);

        assert!(matches!(inbox.wait(Side::P2, deadline, |_| true).await, Waited::TimedOut));
    }

    #[tokio::test]
    async fn test_teardown_halts_waiter() {
        let (session, mut inbox) = open::<u32>(seats());
        assert!(inbox.halted().is_none());

        session.teardown(Conclusion::winner("alice", "server2 went offline"));

        let deadline = Instant::now() + Duration::from_secs(5);
        match inbox.wait(Side::P2, deadline, |_| true).await {
            Waited::Halted(conclusion) => assert_eq!(conclusion.verdict, Verdict::Winner("alice".into())),
            _ => panic!("expected halt"),
        }
        assert!(inbox.halted().is_none());
    }

    #[tokio::test]
    async fn test_deliver_to_full_slot_conflicts() {
        let (session, _inbox) = open::<u32>(seats());
        let sender = session.sender(Side::P1);

        deliver(sender.clone(), 1, Duration::from_millis(10)).await.unwrap();
        let err = deliver(sender, 2, Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_deliver_after_task_exit() {
        let (session, inbox) = open::<u32>(seats());
        drop(inbox);

        let err = deliver(session.sender(Side::P2), 1, Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
