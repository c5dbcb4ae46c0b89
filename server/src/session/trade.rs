use crate::cards::Card;
use crate::error::{CoreError, CoreResult};
use crate::node::ClusterNode;
use crate::protocol::{OfferRequest, OfferSubmission, TradeInitiate, TradeOutcome, TradeResult};
use crate::session::hosted::{self, deliver, Conclusion, PeerSessionRef, Seat, SessionInbox, Side, Waited};
use crate::session::{new_session_id, SessionId};
use std::sync::Arc;
use tokio::time::Instant;

impl ClusterNode {
    /// Open a one-card-each trade hosted here
    pub async fn start_trade(self: &Arc<Self>, requester: &str, partner: &str) -> CoreResult<SessionId> {
        if requester == partner {
            return Err(CoreError::conflict("cannot trade with yourself"));
        }
        if !self.roster.contains(requester).await {
            return Err(CoreError::not_found(format!("{} is not connected here", requester)));
        }

        let seats = [self.local_seat(requester), self.seat_for(partner).await?];
        let session_id = new_session_id("trade");
        let (session, inbox) = hosted::open(seats.clone());
        self.trades.insert(&session_id, session).await?;

        for (i, seat) in seats.iter().enumerate() {
            let other = &seats[1 - i].player;
            if let Err(e) = seat.link.open_trade(&session_id, &seat.player, other).await {
                tracing::warn!(session = %session_id, player = %seat.player, error = %e, "could not open trade");
                self.trades.remove(&session_id).await;
                let reason = format!("{} could not join: {}", seat.player, e);
                for opened in &seats[..i] {
                    if let Err(e) = opened.link.cancel_trade(&session_id, &opened.player, &reason).await {
                        tracing::debug!(session = %session_id, error = %e, "cancel notice not delivered");
                    }
                }
                return Err(e);
            }
        }

        tracing::info!(session = %session_id, p1 = %seats[0].player, p2 = %seats[1].player, "trade started");
        tokio::spawn(self.clone().run_trade(session_id.clone(), seats, inbox));
        Ok(session_id)
    }

    async fn run_trade(self: Arc<Self>, session_id: SessionId, seats: [Seat; 2], mut inbox: SessionInbox<Card>) {
        let mut offers: [Option<Card>; 2] = [None, None];
        let mut ended: Option<(Conclusion, bool)> = None;

        for seat in &seats {
            if let Err(e) = seat.link.request_offer(&session_id, &seat.player).await {
                tracing::warn!(session = %session_id, player = %seat.player, error = %e, "offer request failed");
                ended = Some((Conclusion::cancelled(format!("{} could not be reached", seat.player)), false));
                break;
            }
        }

        if ended.is_none() {
            let deadline = Instant::now() + self.config.timings.trade_timeout;
            for side in Side::BOTH {
                if let Some(conclusion) = inbox.halted() {
                    ended = Some((conclusion, true));
                    break;
                }
                let player = &seats[side.index()].player;
                match inbox.wait(side, deadline, |_| true).await {
                    Waited::Arrived(card) => offers[side.index()] = Some(card),
                    Waited::TimedOut => {
                        ended = Some((Conclusion::cancelled(format!("{} did not offer a card in time", player)), false));
                        break;
                    }
                    Waited::Closed => {
                        ended = Some((Conclusion::cancelled(format!("{} left the trade", player)), false));
                        break;
                    }
                    Waited::Halted(conclusion) => {
                        ended = Some((conclusion, true));
                        break;
                    }
                }
            }
        }

        // Whoever removes the record decides: past this point no halt can
        // interleave with the swap.
        let conclusion = match ended {
            Some((conclusion, true)) => Some(conclusion),
            other => match self.trades.remove(&session_id).await {
                Some(_) => other.map(|(conclusion, _)| conclusion),
                None => Some(inbox.halted().unwrap_or_else(|| Conclusion::cancelled("trade cancelled"))),
            },
        };

        match (conclusion, offers) {
            (None, [Some(first), Some(second)]) => self.commit_trade(&session_id, &seats, [first, second]).await,
            (Some(conclusion), _) => self.cancel_everywhere(&session_id, &seats, &conclusion.reason).await,
            (None, _) => {
                tracing::error!(session = %session_id, "trade finished without both offers");
                self.cancel_everywhere(&session_id, &seats, "trade state corrupted").await;
            }
        }
    }

    /// Swap the two offers. Remote sides are credited first so a failed
    /// remote delivery can still cancel the trade for everybody. Once one
    /// side is credited the swap cannot be rolled back.
    async fn commit_trade(&self, session_id: &str, seats: &[Seat; 2], offers: [Card; 2]) {
        let mut order = Side::BOTH.to_vec();
        order.sort_by_key(|side| seats[side.index()].link.is_local());

        let mut credited = 0;
        for side in order {
            let seat = &seats[side.index()];
            let received = &offers[side.other().index()];
            if let Err(e) = seat.link.complete_trade(session_id, &seat.player, received).await {
                if credited == 0 {
                    tracing::warn!(session = %session_id, player = %seat.player, error = %e, "trade delivery failed, cancelling");
                    self.cancel_everywhere(session_id, seats, &format!("{} could not receive the card", seat.player))
                        .await;
                    return;
                }
                let violation = CoreError::InvariantViolation(format!(
                    "credit failed after {} side committed: {}",
                    credited, e
                ));
                tracing::error!(session = %session_id, player = %seat.player, error = %violation, "trade left half applied");
                continue;
            }
            credited += 1;
        }
        tracing::info!(session = %session_id, "trade completed");
    }

    async fn cancel_everywhere(&self, session_id: &str, seats: &[Seat; 2], reason: &str) {
        tracing::info!(session = %session_id, reason, "trade cancelled");
        for seat in seats {
            if let Err(e) = seat.link.cancel_trade(session_id, &seat.player, reason).await {
                tracing::warn!(session = %session_id, player = %seat.player, error = %e, "cancel notice not delivered");
            }
        }
    }

    /// Halt a hosted trade. False if it already ended.
    pub async fn end_trade(&self, session_id: &str, reason: &str) -> bool {
        match self.trades.remove(session_id).await {
            Some(session) => {
                session.teardown(Conclusion::cancelled(reason));
                true
            }
            None => false,
        }
    }

    /// A local player offers a card, for a trade hosted here or elsewhere.
    /// The card is reserved until the trade completes or is cancelled.
    pub async fn offer_card(&self, player: &str, session_id: &str, card_id: &str) -> CoreResult<()> {
        let remote_host = if self.trades.contains(session_id).await {
            None
        } else {
            Some(self.peer_trades.lookup_ref(session_id, player).await?.host_addr)
        };

        let card = self.roster.reserve_offer(player, session_id, card_id).await?;
        let submission = OfferSubmission {
            session_id: session_id.to_string(),
            player_id: player.to_string(),
            card,
        };
        let result = match remote_host {
            None => self.accept_offer(submission).await,
            Some(addr) => self.peers.post(&addr, "/trade/submit_card", &submission).await,
        };
        if result.is_err() {
            self.roster.release_offer(player, session_id).await;
        }
        result
    }

    /// Host side: queue an offered card for its session
    pub async fn accept_offer(&self, submission: OfferSubmission) -> CoreResult<()> {
        let sender = self
            .trades
            .read(&submission.session_id, |s| s.side_of(&submission.player_id).map(|side| s.sender(side)))
            .await
            .ok_or_else(|| CoreError::not_found(format!("no trade {}", submission.session_id)))?
            .ok_or_else(|| {
                CoreError::not_found(format!("{} is not in {}", submission.player_id, submission.session_id))
            })?;
        deliver(sender, submission.card, self.config.timings.submit_timeout).await
    }

    // ============= Peer role =============

    pub async fn peer_open_trade(&self, req: TradeInitiate) -> CoreResult<()> {
        if !self.roster.contains(&req.local_player).await {
            return Err(CoreError::not_found(format!("{} is not connected here", req.local_player)));
        }

        let peer_ref = PeerSessionRef {
            session_id: req.session_id.clone(),
            player: req.local_player.clone(),
            counterpart: req.partner.clone(),
            host_node: req.host_server.clone(),
            host_addr: req.host_address.clone(),
        };
        self.peer_trades.insert(&req.session_id, peer_ref).await?;

        let link = self.local_link(&req.host_server);
        if let Err(e) = link.open_trade(&req.session_id, &req.local_player, &req.partner).await {
            self.peer_trades.remove(&req.session_id).await;
            return Err(e);
        }
        Ok(())
    }

    pub async fn peer_request_offer(&self, req: OfferRequest) -> CoreResult<()> {
        let peer_ref = self.peer_trades.lookup_ref(&req.session_id, &req.player_id).await?;
        self.local_link(&peer_ref.host_node)
            .request_offer(&req.session_id, &req.player_id)
            .await
    }

    pub async fn peer_trade_result(&self, req: TradeResult) -> CoreResult<()> {
        let Some(peer_ref) = self.peer_trades.remove(&req.session_id).await else {
            tracing::debug!(session = %req.session_id, "result for unknown trade");
            return Ok(());
        };
        let link = self.local_link(&peer_ref.host_node);
        match req.outcome {
            TradeOutcome::Completed { received } => {
                link.complete_trade(&req.session_id, &peer_ref.player, &received).await
            }
            TradeOutcome::Cancelled { reason } => link.cancel_trade(&req.session_id, &peer_ref.player, &reason).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::client::ClientEvent;
    use crate::node::tests::{join, solo_node};
    use crate::node::ClusterNode;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Offer the first card when asked; returns the final trade event
    async fn trade_bot(node: Arc<ClusterNode>, player: &'static str, mut events: UnboundedReceiver<ClientEvent>) -> ClientEvent {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::OfferRequested { session_id } => {
                    let cards = node.roster.cards(player).await.unwrap();
                    node.offer_card(player, &session_id, &cards[0].id).await.unwrap();
                }
                ClientEvent::TradeCompleted { .. } | ClientEvent::TradeCancelled { .. } => return event,
                _ => {}
            }
        }
        panic!("event stream closed before the trade ended");
    }

    async fn final_trade_event(events: &mut UnboundedReceiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(120), async {
            while let Some(event) = events.recv().await {
                if matches!(event, ClientEvent::TradeCompleted { .. } | ClientEvent::TradeCancelled { .. }) {
                    return event;
                }
            }
            panic!("event stream closed");
        })
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_trade_swaps_cards() {
        let (node, hub) = solo_node("server1").await;
        let alice = join(&node, &hub, "alice").await;
        let bob = join(&node, &hub, "bob").await;

        let alice_first = node.roster.cards("alice").await.unwrap()[0].clone();
        let bob_first = node.roster.cards("bob").await.unwrap()[0].clone();

        node.start_trade("alice", "bob").await.unwrap();
        let alice_bot = tokio::spawn(trade_bot(node.clone(), "alice", alice));
        let bob_bot = tokio::spawn(trade_bot(node.clone(), "bob", bob));

        match alice_bot.await.unwrap() {
            ClientEvent::TradeCompleted { gave, received, .. } => {
                assert_eq!(gave.id, alice_first.id);
                assert_eq!(received.id, bob_first.id);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(bob_bot.await.unwrap(), ClientEvent::TradeCompleted { .. }));

        let alice_cards = node.roster.cards("alice").await.unwrap();
        let bob_cards = node.roster.cards("bob").await.unwrap();
        assert_eq!(alice_cards.len(), 5);
        assert_eq!(bob_cards.len(), 5);
        assert!(alice_cards.iter().any(|c| c.id == bob_first.id && c.owner == "alice"));
        assert!(bob_cards.iter().any(|c| c.id == alice_first.id && c.owner == "bob"));
        assert!(node.trades.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_partner_cancels_for_both() {
        let (node, hub) = solo_node("server1").await;
        let alice = join(&node, &hub, "alice").await;
        let mut bob = join(&node, &hub, "bob").await;

        node.start_trade("alice", "bob").await.unwrap();
        let alice_bot = tokio::spawn(trade_bot(node.clone(), "alice", alice));

        assert!(matches!(alice_bot.await.unwrap(), ClientEvent::TradeCancelled { .. }));
        assert!(matches!(final_trade_event(&mut bob).await, ClientEvent::TradeCancelled { .. }));

        // Alice's reserved card went back into her collection
        assert_eq!(node.roster.cards("alice").await.unwrap().len(), 5);
        assert_eq!(node.roster.cards("bob").await.unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_credit_cancels_both() {
        let (node, hub) = solo_node("server1").await;
        let mut alice = join(&node, &hub, "alice").await;
        let mut bob = join(&node, &hub, "bob").await;

        let session = "trade:0badcafe";
        let alice_card = node.roster.cards("alice").await.unwrap()[0].clone();
        let bob_card = node.roster.cards("bob").await.unwrap()[0].clone();
        // Only bob holds a reservation, so crediting alice fails
        node.roster.reserve_offer("bob", session, &bob_card.id).await.unwrap();

        let seats = [node.local_seat("alice"), node.local_seat("bob")];
        node.commit_trade(session, &seats, [alice_card.clone(), bob_card.clone()]).await;

        assert!(matches!(final_trade_event(&mut alice).await, ClientEvent::TradeCancelled { .. }));
        assert!(matches!(final_trade_event(&mut bob).await, ClientEvent::TradeCancelled { .. }));

        let bob_cards = node.roster.cards("bob").await.unwrap();
        assert_eq!(bob_cards.len(), 5);
        assert!(bob_cards.iter().any(|c| c.id == bob_card.id));
        assert!(!bob_cards.iter().any(|c| c.id == alice_card.id));
        assert_eq!(node.roster.cards("alice").await.unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_without_trade() {
        let (node, hub) = solo_node("server1").await;
        let _alice = join(&node, &hub, "alice").await;
        let card = node.roster.cards("alice").await.unwrap()[0].id.clone();

        assert!(node.offer_card("alice", "trade:nothing", &card).await.is_err());
        assert_eq!(node.roster.cards("alice").await.unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_trade_cancels_once() {
        let (node, hub) = solo_node("server1").await;
        let mut alice = join(&node, &hub, "alice").await;
        let _bob = join(&node, &hub, "bob").await;

        let session = node.start_trade("alice", "bob").await.unwrap();
        assert!(node.end_trade(&session, "operator stop").await);
        assert!(!node.end_trade(&session, "operator stop").await);

        match final_trade_event(&mut alice).await {
            ClientEvent::TradeCancelled { reason, .. } => assert_eq!(reason, "operator stop"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
