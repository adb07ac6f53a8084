//! Chat platform view assembled from gateway traffic on the bus

use super::{
    shard_for_guild, ChannelId, ChatMessage, ChatPlatform, Guild, GuildId, MessageHub, MessageId,
    ShardId,
};
use crate::bus::{ChannelHandler, OutboundReply, PubSubTransport, CHAT_OUTBOUND};
use crate::config::RelayerConfig;
use crate::error::{HandlerFailure, RelayerResult};
use crate::relationship::{Actor, ActorId};

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// A `ChatPlatform` fed by `ChatInbound` and replying on `ChatOutbound`
pub struct GatewayBridge {
    shard_ids: Vec<ShardId>,
    shard_count: u32,
    guilds: DashMap<GuildId, Guild>,
    members: DashMap<ActorId, Actor>,
    messages: DashMap<(ChannelId, MessageId), ChatMessage>,
    /// Insertion order of `messages`, oldest first
    message_order: Mutex<VecDeque<(ChannelId, MessageId)>>,
    message_cache_size: usize,
    hub: MessageHub,
    transport: Arc<dyn PubSubTransport>,
}

impl GatewayBridge {
    pub fn new(
        config: &RelayerConfig,
        message_cache_size: usize,
        hub: MessageHub,
        transport: Arc<dyn PubSubTransport>,
    ) -> Self {
        Self {
            shard_ids: config.shard_ids.clone(),
            shard_count: config.shard_count,
            guilds: DashMap::new(),
            members: DashMap::new(),
            messages: DashMap::new(),
            message_order: Mutex::new(VecDeque::new()),
            message_cache_size: message_cache_size.max(1),
            hub,
            transport,
        }
    }

    /// Record what an inbound message tells us and fan it out
    pub fn observe(&self, message: ChatMessage) {
        self.members.insert(message.author.id, message.author);

        if let Some(guild_id) = message.guild_id {
            let mut guild = self.guilds.entry(guild_id).or_insert_with(|| Guild {
                id: guild_id,
                shard_id: shard_for_guild(guild_id, self.shard_count),
                channels: Vec::new(),
            });
            if !guild.has_channel(message.channel_id) {
                guild.channels.push(message.channel_id);
            }
        }

        let key = (message.channel_id, message.id);
        if self.messages.insert(key, message.clone()).is_none() {
            let evicted = {
                let mut order = self
                    .message_order
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                order.push_back(key);
                if order.len() > self.message_cache_size {
                    order.pop_front()
                } else {
                    None
                }
            };
            if let Some(oldest) = evicted {
                self.messages.remove(&oldest);
            }
        }

        self.hub.publish(message);
    }

    pub fn cached_messages(&self) -> usize {
        self.messages.len()
    }
}

#[async_trait]
impl ChatPlatform for GatewayBridge {
    fn shard_ids(&self) -> &[ShardId] {
        &self.shard_ids
    }

    fn cached_guild(&self, guild_id: GuildId) -> Option<Guild> {
        self.guilds.get(&guild_id).map(|g| g.clone())
    }

    async fn fetch_guild(&self, guild_id: GuildId) -> RelayerResult<Option<Guild>> {
        // The gateway pushes everything it knows; there is nothing further to ask
        debug!("Guild {} has not been seen on this shard", guild_id);
        Ok(self.cached_guild(guild_id))
    }

    async fn fetch_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> RelayerResult<Option<ChatMessage>> {
        Ok(self
            .messages
            .get(&(channel_id, message_id))
            .map(|m| m.clone()))
    }

    async fn fetch_member(
        &self,
        _guild_id: Option<GuildId>,
        actor_id: ActorId,
    ) -> RelayerResult<Option<Actor>> {
        Ok(self.members.get(&actor_id).map(|a| *a))
    }

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> RelayerResult<()> {
        let reply = OutboundReply {
            channel_id,
            content: content.to_string(),
        };
        let payload = serde_json::to_string(&reply)?;
        self.transport.publish(CHAT_OUTBOUND, &payload).await
    }
}

#[async_trait]
impl ChannelHandler for GatewayBridge {
    type Payload = ChatMessage;

    async fn handle(&self, message: ChatMessage) -> Result<(), HandlerFailure> {
        self.observe(message);
        Ok(())
    }
}
