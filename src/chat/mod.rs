//! Chat platform collaborator contract
//!
//! The gateway connection itself lives outside this crate. This module
//! defines what the relayer needs from it:
//! - Guild, channel and message lookup for command replay
//! - Member lookup to resolve command targets
//! - A reply sink
//! - A fan-out of inbound messages for proposal replies

pub mod bridge;

pub use bridge::GatewayBridge;

use crate::error::RelayerResult;
use crate::relationship::{Actor, ActorId};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type GuildId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;
pub type ShardId = u32;

/// Shard that owns a guild, using the platform's snowflake partitioning
pub fn shard_for_guild(guild_id: GuildId, shard_count: u32) -> ShardId {
    ((guild_id >> 22) % u64::from(shard_count.max(1))) as ShardId
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guild {
    pub id: GuildId,
    pub shard_id: ShardId,
    pub channels: Vec<ChannelId>,
}

impl Guild {
    pub fn has_channel(&self, channel_id: ChannelId) -> bool {
        self.channels.contains(&channel_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    /// `None` for direct messages
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub author: Actor,
    pub content: String,
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Shards served by this process
    fn shard_ids(&self) -> &[ShardId];

    fn cached_guild(&self, guild_id: GuildId) -> Option<Guild>;

    async fn fetch_guild(&self, guild_id: GuildId) -> RelayerResult<Option<Guild>>;

    async fn fetch_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> RelayerResult<Option<ChatMessage>>;

    async fn fetch_member(
        &self,
        guild_id: Option<GuildId>,
        actor_id: ActorId,
    ) -> RelayerResult<Option<Actor>>;

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> RelayerResult<()>;

    fn owns_guild(&self, guild: &Guild) -> bool {
        self.shard_ids().contains(&guild.shard_id)
    }
}

/// In-process fan-out of inbound chat messages
#[derive(Clone)]
pub struct MessageHub {
    tx: broadcast::Sender<ChatMessage>,
}

impl MessageHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns the number of subscribers that will see the message
    pub fn publish(&self, message: ChatMessage) -> usize {
        // No receivers is fine: nobody is waiting on a reply
        self.tx.send(message).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatMessage> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_for_guild() {
        let guild_id: GuildId = 81384788765712384;
        assert_eq!(shard_for_guild(guild_id, 1), 0);
        assert_eq!(shard_for_guild(guild_id, 16), ((guild_id >> 22) % 16) as u32);
        assert_eq!(shard_for_guild(3 << 22, 4), 3);
        assert_eq!(shard_for_guild(5 << 22, 4), 1);
    }

    #[tokio::test]
    async fn test_hub_fans_out_to_every_subscriber() {
        let hub = MessageHub::new(8);
        assert_eq!(hub.publish(crate::testing::chat_message(1, None, 2, Actor::human(3), "hi")), 0);

        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        let message = crate::testing::chat_message(2, Some(9), 2, Actor::human(3), "yes");
        assert_eq!(hub.publish(message.clone()), 2);
        assert_eq!(a.recv().await.unwrap(), message);
        assert_eq!(b.recv().await.unwrap(), message);
    }
}
