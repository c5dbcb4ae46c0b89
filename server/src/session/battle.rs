use crate::cards::Card;
use crate::directory::PlayerId;
use crate::error::{CoreError, CoreResult};
use crate::node::ClusterNode;
use crate::protocol::{BattleEndNotice, BattleInitiate, MoveRequest, MoveSubmission, TurnResult};
use crate::roster::DECK_SIZE;
use crate::session::hosted::{self, deliver, Conclusion, PeerSessionRef, Seat, SessionInbox, Side, Waited};
use crate::session::{new_session_id, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, Instant};

/// A card handed to the host for deck slot `index`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedCard {
    pub index: usize,
    pub card: Card,
}

/// What happened in one resolved turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReport {
    pub turn: u32,
    pub attacker: PlayerId,
    pub defender: PlayerId,
    pub damage: i32,
    /// Both cards after the hit, player 1 first
    pub cards: [Card; 2],
    pub destroyed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    Winner(Side),
    Tie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Ask `side` for the card at this deck index
    Draw(Side, usize),
    Resolve,
    Finished(Finish),
}

/// Player 1 attacks on even turns, player 2 on odd ones
pub fn attacker_for(turn: u32) -> Side {
    if turn % 2 == 0 {
        Side::P1
    } else {
        Side::P2
    }
}

/// Turn state of one battle, free of any I/O
#[derive(Debug, Default)]
pub struct BattleState {
    turn: u32,
    slots: [Option<Card>; 2],
    next_index: [usize; 2],
}

impl BattleState {
    pub fn turn(&self) -> u32 {
        self.turn
    }

    /// No card in play and nothing left to draw
    fn exhausted(&self, side: Side) -> bool {
        self.slots[side.index()].is_none() && self.next_index[side.index()] >= DECK_SIZE
    }

    pub fn next_step(&self) -> Step {
        match (self.exhausted(Side::P1), self.exhausted(Side::P2)) {
            (true, true) => Step::Finished(Finish::Tie),
            (true, false) => Step::Finished(Finish::Winner(Side::P2)),
            (false, true) => Step::Finished(Finish::Winner(Side::P1)),
            (false, false) => Side::BOTH
                .into_iter()
                .find(|side| self.slots[side.index()].is_none())
                .map(|side| Step::Draw(side, self.next_index[side.index()]))
                .unwrap_or(Step::Resolve),
        }
    }

    pub fn place(&mut self, side: Side, card: Card) {
        self.slots[side.index()] = Some(card);
        self.next_index[side.index()] += 1;
    }

    /// Attacker hits defender once. Damage is at least 1 so every battle ends.
    /// A defender at strength 0 or below leaves play.
    pub fn resolve(&mut self, players: &[PlayerId; 2]) -> Option<TurnReport> {
        let attacker = attacker_for(self.turn);
        let defender = attacker.other();

        let damage = self.slots[attacker.index()].as_ref()?.power.max(1);
        let target = self.slots[defender.index()].as_mut()?;
        target.strength -= damage;
        let destroyed = target.strength <= 0;

        let cards = [self.slots[0].clone()?, self.slots[1].clone()?];
        if destroyed {
            self.slots[defender.index()] = None;
        }

        let report = TurnReport {
            turn: self.turn,
            attacker: players[attacker.index()].clone(),
            defender: players[defender.index()].clone(),
            damage,
            cards,
            destroyed,
        };
        self.turn += 1;
        Some(report)
    }
}

impl ClusterNode {
    /// Open a battle hosted here. The requester is player 1 and must be local;
    /// the opponent may live on any node.
    pub async fn start_battle(self: &Arc<Self>, requester: &str, opponent: &str) -> CoreResult<SessionId> {
        if requester == opponent {
            return Err(CoreError::conflict("cannot battle yourself"));
        }
        if !self.roster.contains(requester).await {
            return Err(CoreError::not_found(format!("{} is not connected here", requester)));
        }

        let seats = [self.local_seat(requester), self.seat_for(opponent).await?];
        let session_id = new_session_id("battle");
        let (session, inbox) = hosted::open(seats.clone());
        self.battles.insert(&session_id, session).await?;

        for (i, seat) in seats.iter().enumerate() {
            let other = &seats[1 - i].player;
            if let Err(e) = seat.link.open_battle(&session_id, &seat.player, other).await {
                tracing::warn!(session = %session_id, player = %seat.player, error = %e, "could not open battle");
                self.battles.remove(&session_id).await;
                let conclusion = Conclusion::cancelled(format!("{} could not join: {}", seat.player, e));
                for opened in &seats[..i] {
                    if let Err(e) = opened.link.close_battle(&session_id, &opened.player, &conclusion).await {
                        tracing::debug!(session = %session_id, error = %e, "cancel notice not delivered");
                    }
                }
                return Err(e);
            }
        }

        tracing::info!(
            session = %session_id,
            p1 = %seats[0].player,
            p2 = %seats[1].player,
            p2_node = %seats[1].node,
            "battle started"
        );
        tokio::spawn(self.clone().run_battle(session_id.clone(), seats, inbox));
        Ok(session_id)
    }

    /// Coordinating task of a hosted battle. Only this task advances the
    /// battle; everyone else can only halt it through `end_battle`.
    async fn run_battle(self: Arc<Self>, session_id: SessionId, seats: [Seat; 2], mut inbox: SessionInbox<SubmittedCard>) {
        let players = [seats[0].player.clone(), seats[1].player.clone()];
        let timings = self.config.timings.clone();
        let mut state = BattleState::default();

        sleep(timings.turn_pacing).await;

        let (conclusion, halted) = loop {
            if let Some(conclusion) = inbox.halted() {
                break (conclusion, true);
            }

            match state.next_step() {
                Step::Finished(Finish::Winner(side)) => {
                    let loser = &players[side.other().index()];
                    break (
                        Conclusion::winner(players[side.index()].clone(), format!("{} has no cards left", loser)),
                        false,
                    );
                }
                Step::Finished(Finish::Tie) => break (Conclusion::tie("both decks exhausted"), false),
                Step::Draw(side, index) => {
                    let seat = &seats[side.index()];
                    let other = players[side.other().index()].clone();

                    if let Err(e) = seat.link.request_card(&session_id, &seat.player, index).await {
                        tracing::warn!(session = %session_id, player = %seat.player, error = %e, "card request failed");
                        break (
                            Conclusion::winner(other, format!("{} could not be reached", seat.player)),
                            false,
                        );
                    }

                    let deadline = Instant::now() + timings.card_timeout;
                    match inbox.wait(side, deadline, |s: &SubmittedCard| s.index == index).await {
                        Waited::Arrived(submitted) => state.place(side, submitted.card),
                        Waited::TimedOut => {
                            break (
                                Conclusion::winner(other, format!("{} did not play a card in time", seat.player)),
                                false,
                            )
                        }
                        Waited::Closed => {
                            break (Conclusion::winner(other, format!("{} left the battle", seat.player)), false)
                        }
                        Waited::Halted(conclusion) => break (conclusion, true),
                    }
                }
                Step::Resolve => {
                    let Some(report) = state.resolve(&players) else {
                        tracing::error!(session = %session_id, "resolve without two cards in play");
                        break (Conclusion::cancelled("battle state corrupted"), false);
                    };
                    tracing::debug!(
                        session = %session_id,
                        turn = report.turn,
                        attacker = %report.attacker,
                        damage = report.damage,
                        destroyed = report.destroyed,
                        "turn resolved"
                    );
                    for seat in &seats {
                        if let Err(e) = seat.link.turn_resolved(&session_id, &seat.player, &report).await {
                            tracing::warn!(session = %session_id, player = %seat.player, error = %e, "turn result not delivered");
                        }
                    }
                    sleep(timings.turn_pacing).await;
                }
            }
        };

        // A halter already removed the record. Otherwise remove it now; losing
        // that race means a halt is waiting in the inbox and wins.
        let conclusion = if halted {
            conclusion
        } else {
            match self.battles.remove(&session_id).await {
                Some(_) => conclusion,
                None => inbox.halted().unwrap_or(conclusion),
            }
        };

        tracing::info!(session = %session_id, verdict = ?conclusion.verdict, reason = %conclusion.reason, turns = state.turn(), "battle ended");
        for seat in &seats {
            if let Err(e) = seat.link.close_battle(&session_id, &seat.player, &conclusion).await {
                tracing::warn!(session = %session_id, player = %seat.player, error = %e, "battle result not delivered");
            }
        }
    }

    /// Halt a hosted battle with `conclusion`. False if it already ended.
    pub async fn end_battle(&self, session_id: &str, conclusion: Conclusion) -> bool {
        match self.battles.remove(session_id).await {
            Some(session) => {
                session.teardown(conclusion);
                true
            }
            None => false,
        }
    }

    /// A local player answers a card request, for a battle hosted here or elsewhere
    pub async fn play_card(&self, player: &str, session_id: &str, index: usize) -> CoreResult<()> {
        let card = self.roster.deck_card(player, session_id, index).await?;

        if self.battles.contains(session_id).await {
            return self
                .accept_move(MoveSubmission {
                    session_id: session_id.to_string(),
                    player_id: player.to_string(),
                    index,
                    card,
                })
                .await;
        }

        let peer_ref = self.peer_battles.lookup_ref(session_id, player).await?;
        let body = MoveSubmission {
            session_id: session_id.to_string(),
            player_id: player.to_string(),
            index,
            card,
        };
        self.peers.post(&peer_ref.host_addr, "/battle/submit_move", &body).await
    }

    /// Host side: queue a submitted card for its session
    pub async fn accept_move(&self, submission: MoveSubmission) -> CoreResult<()> {
        let sender = self
            .battles
            .read(&submission.session_id, |s| s.side_of(&submission.player_id).map(|side| s.sender(side)))
            .await
            .ok_or_else(|| CoreError::not_found(format!("no battle {}", submission.session_id)))?
            .ok_or_else(|| {
                CoreError::not_found(format!("{} is not in {}", submission.player_id, submission.session_id))
            })?;

        let item = SubmittedCard {
            index: submission.index,
            card: submission.card,
        };
        deliver(sender, item, self.config.timings.submit_timeout).await
    }

    // ============= Peer role =============

    pub async fn peer_open_battle(&self, req: BattleInitiate) -> CoreResult<()> {
        if !self.roster.contains(&req.local_player).await {
            return Err(CoreError::not_found(format!("{} is not connected here", req.local_player)));
        }

        let peer_ref = PeerSessionRef {
            session_id: req.session_id.clone(),
            player: req.local_player.clone(),
            counterpart: req.opponent.clone(),
            host_node: req.host_server.clone(),
            host_addr: req.host_address.clone(),
        };
        self.peer_battles.insert(&req.session_id, peer_ref).await?;

        let link = self.local_link(&req.host_server);
        if let Err(e) = link.open_battle(&req.session_id, &req.local_player, &req.opponent).await {
            self.peer_battles.remove(&req.session_id).await;
            return Err(e);
        }
        tracing::info!(session = %req.session_id, player = %req.local_player, host = %req.host_server, "joined remote battle");
        Ok(())
    }

    pub async fn peer_request_card(&self, req: MoveRequest) -> CoreResult<()> {
        let peer_ref = self.peer_battles.lookup_ref(&req.session_id, &req.player_id).await?;
        self.local_link(&peer_ref.host_node)
            .request_card(&req.session_id, &req.player_id, req.index)
            .await
    }

    pub async fn peer_turn_result(&self, req: TurnResult) -> CoreResult<()> {
        let peer_ref = self.peer_battles.lookup_ref(&req.session_id, &req.player_id).await?;
        self.local_link(&peer_ref.host_node)
            .turn_resolved(&req.session_id, &req.player_id, &req.report)
            .await
    }

    /// The host finished; repeated or late notices are ignored
    pub async fn peer_end_battle(&self, req: BattleEndNotice) -> CoreResult<()> {
        let Some(peer_ref) = self.peer_battles.remove(&req.session_id).await else {
            tracing::debug!(session = %req.session_id, "end notice for unknown battle");
            return Ok(());
        };
        self.local_link(&peer_ref.host_node)
            .close_battle(&req.session_id, &peer_ref.player, &req.conclusion)
            .await
    }
}
