// Player-to-player notices: pairing and direct messages. The recipient is
// resolved through the replicated directory and reached on whichever node
// owns it.

use crate::client::{ClientEvent, ClientSink};
use crate::error::{CoreError, CoreResult};
use crate::node::ClusterNode;
use crate::protocol::{DirectMessage, NoticeBody};

impl ClusterNode {
    /// Pair a local player with `partner`; both are told
    pub async fn pair_players(&self, player: &str, partner: &str) -> CoreResult<()> {
        if player == partner {
            return Err(CoreError::conflict("cannot pair with yourself"));
        }
        let reply = self.roster.reply_address(player).await?;
        self.relay(DirectMessage {
            from: player.to_string(),
            to: partner.to_string(),
            body: NoticeBody::Pair,
        })
        .await?;

        tracing::info!(player = %player, partner = %partner, "players paired");
        self.clients
            .push(
                &reply,
                ClientEvent::Paired {
                    partner: partner.to_string(),
                },
            )
            .await;
        Ok(())
    }

    /// Send text from a local player to any connected player
    pub async fn send_message(&self, from: &str, to: &str, text: &str) -> CoreResult<()> {
        if !self.roster.contains(from).await {
            return Err(CoreError::not_found(format!("{} is not connected here", from)));
        }
        self.relay(DirectMessage {
            from: from.to_string(),
            to: to.to_string(),
            body: NoticeBody::Text { text: text.to_string() },
        })
        .await
    }

    async fn relay(&self, message: DirectMessage) -> CoreResult<()> {
        let entry = self.directory.lookup(&message.to).await?;
        if entry.owner == *self.id() {
            return self.accept_direct_message(message).await;
        }
        let addr = self
            .config
            .addr_of(&entry.owner)
            .ok_or_else(|| CoreError::not_found(format!("node {} is not configured", entry.owner)))?;
        tracing::debug!(to = %message.to, owner = %entry.owner, "relaying notice");
        self.peers.post(addr, "/players/message", &message).await
    }

    /// Deliver a notice to a player connected here
    pub async fn accept_direct_message(&self, message: DirectMessage) -> CoreResult<()> {
        let reply = self.roster.reply_address(&message.to).await?;
        let event = match message.body {
            NoticeBody::Pair => ClientEvent::Paired { partner: message.from },
            NoticeBody::Text { text } => ClientEvent::MessageReceived {
                from: message.from,
                text,
            },
        };
        self.clients.push(&reply, event).await;
        Ok(())
    }
}
