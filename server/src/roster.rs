use crate::cards::Card;
use crate::directory::PlayerId;
use crate::error::{CoreError, CoreResult};
use crate::session::SessionId;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cards a player brings into a battle
pub const DECK_SIZE: usize = 5;

#[derive(Debug, Default)]
struct LocalPlayer {
    reply_address: String,
    cards: Vec<Card>,
    /// Battle decks frozen at session start, by session
    decks: HashMap<SessionId, Vec<Card>>,
    /// Cards set aside for a pending trade, by session
    offers: HashMap<SessionId, Card>,
}

/// Players owned by this node, with their card collections.
/// Collections never leave the owning node.
#[derive(Default)]
pub struct Roster {
    players: RwLock<HashMap<PlayerId, LocalPlayer>>,
}

fn missing(player_id: &str) -> CoreError {
    CoreError::not_found(format!("player {} is not connected here", player_id))
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player, keeping an existing collection on reconnect.
    /// Returns true for a first registration.
    pub async fn register(&self, player_id: &str, reply_address: &str) -> bool {
        let mut players = self.players.write().await;
        match players.get_mut(player_id) {
            Some(player) => {
                player.reply_address = reply_address.to_string();
                false
            }
            None => {
                players.insert(
                    player_id.to_string(),
                    LocalPlayer {
                        reply_address: reply_address.to_string(),
                        ..Default::default()
                    },
                );
                true
            }
        }
    }

    /// Forget a player; returns its reply address
    pub async fn remove(&self, player_id: &str) -> Option<String> {
        self.players.write().await.remove(player_id).map(|p| p.reply_address)
    }

    /// Forget a player only while `reply_address` is still its connection
    pub async fn remove_connection(&self, player_id: &str, reply_address: &str) -> bool {
        let mut players = self.players.write().await;
        match players.get(player_id) {
            Some(player) if player.reply_address == reply_address => {
                players.remove(player_id);
                true
            }
            _ => false,
        }
    }

    pub async fn contains(&self, player_id: &str) -> bool {
        self.players.read().await.contains_key(player_id)
    }

    pub async fn reply_address(&self, player_id: &str) -> CoreResult<String> {
        self.players
            .read()
            .await
            .get(player_id)
            .map(|p| p.reply_address.clone())
            .ok_or_else(|| missing(player_id))
    }

    pub async fn grant(&self, player_id: &str, cards: Vec<Card>) -> CoreResult<()> {
        let mut players = self.players.write().await;
        let player = players.get_mut(player_id).ok_or_else(|| missing(player_id))?;
        player.cards.extend(cards.into_iter().map(|mut card| {
            card.owner = player_id.to_string();
            card
        }));
        Ok(())
    }

    pub async fn cards(&self, player_id: &str) -> CoreResult<Vec<Card>> {
        self.players
            .read()
            .await
            .get(player_id)
            .map(|p| p.cards.clone())
            .ok_or_else(|| missing(player_id))
    }

    /// Snapshot the first DECK_SIZE cards for a battle
    pub async fn freeze_deck(&self, player_id: &str, session_id: &str) -> CoreResult<Vec<Card>> {
        let mut players = self.players.write().await;
        let player = players.get_mut(player_id).ok_or_else(|| missing(player_id))?;
        if player.cards.len() < DECK_SIZE {
            return Err(CoreError::conflict(format!(
                "{} holds {} cards, a battle needs {}",
                player_id,
                player.cards.len(),
                DECK_SIZE
            )));
        }
        if player.decks.contains_key(session_id) {
            return Err(CoreError::conflict(format!("deck already frozen for {}", session_id)));
        }
        let deck: Vec<Card> = player.cards[..DECK_SIZE].to_vec();
        player.decks.insert(session_id.to_string(), deck.clone());
        Ok(deck)
    }

    /// Card at `index` of the frozen deck for `session_id`
    pub async fn deck_card(&self, player_id: &str, session_id: &str, index: usize) -> CoreResult<Card> {
        let players = self.players.read().await;
        let player = players.get(player_id).ok_or_else(|| missing(player_id))?;
        let deck = player
            .decks
            .get(session_id)
            .ok_or_else(|| CoreError::not_found(format!("no deck for session {}", session_id)))?;
        deck.get(index)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("deck has no card at index {}", index)))
    }

    pub async fn thaw(&self, player_id: &str, session_id: &str) {
        if let Some(player) = self.players.write().await.get_mut(player_id) {
            player.decks.remove(session_id);
        }
    }

    /// Move a card out of the collection into the session's reservation
    pub async fn reserve_offer(&self, player_id: &str, session_id: &str, card_id: &str) -> CoreResult<Card> {
        let mut players = self.players.write().await;
        let player = players.get_mut(player_id).ok_or_else(|| missing(player_id))?;
        if player.offers.contains_key(session_id) {
            return Err(CoreError::conflict(format!("already offered a card in {}", session_id)));
        }
        let position = player
            .cards
            .iter()
            .position(|c| c.id == card_id)
            .ok_or_else(|| CoreError::not_found(format!("{} does not hold card {}", player_id, card_id)))?;
        let card = player.cards.remove(position);
        player.offers.insert(session_id.to_string(), card.clone());
        Ok(card)
    }

    /// Consume the reservation and credit the received card; returns the card given away
    pub async fn commit_offer(&self, player_id: &str, session_id: &str, mut received: Card) -> CoreResult<Card> {
        let mut players = self.players.write().await;
        let player = players.get_mut(player_id).ok_or_else(|| missing(player_id))?;
        let given = player
            .offers
            .remove(session_id)
            .ok_or_else(|| CoreError::not_found(format!("no offer reserved for {}", session_id)))?;
        received.owner = player_id.to_string();
        player.cards.push(received);
        Ok(given)
    }

    /// Put a reserved card back into the collection
    pub async fn release_offer(&self, player_id: &str, session_id: &str) {
        if let Some(player) = self.players.write().await.get_mut(player_id) {
            if let Some(card) = player.offers.remove(session_id) {
                player.cards.push(card);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.players.read().await.len()
    }
}
