//! In-memory collaborators shared by unit tests

use crate::chat::{
    ChannelId, ChatMessage, ChatPlatform, Guild, GuildId, MessageHub, MessageId, ShardId,
};
use crate::config::RelayerConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::relationship::{
    Actor, ActorId, CoordinatorConfig, Event, EventKind, FamilyTreeMember, Marriage,
    MemberStore, PartnerRecord, PatternClassifier, ProposalCoordinator, TreeCache,
};
use crate::state::PersistenceGateway;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub fn chat_message(
    id: MessageId,
    guild_id: Option<GuildId>,
    channel_id: ChannelId,
    author: Actor,
    content: &str,
) -> ChatMessage {
    ChatMessage {
        id,
        guild_id,
        channel_id,
        author,
        content: content.to_string(),
    }
}

pub fn relayer_config(shard_ids: Vec<ShardId>, shard_count: u32) -> RelayerConfig {
    RelayerConfig {
        instance_id: "test".to_string(),
        shard_ids,
        shard_count,
        bot_user_id: 999,
        command_prefix: "m!".to_string(),
        health_check_interval_secs: 30,
    }
}

pub fn coordinator(gateway: Arc<MemoryGateway>, hub: MessageHub) -> ProposalCoordinator {
    ProposalCoordinator::new(
        gateway,
        Arc::new(TreeCache::in_memory()),
        Arc::new(PatternClassifier),
        hub,
        CoordinatorConfig {
            bot_user_id: 999,
            response_window: Duration::from_secs(60),
            tree_depth: 6,
        },
    )
}

#[derive(Default)]
struct GatewayState {
    marriages: Vec<(Marriage, bool)>,
    events: Vec<Event>,
    divorces: usize,
}

/// Gateway with the same one-active-marriage rule as the database
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<GatewayState>,
}

impl MemoryGateway {
    pub fn events(&self) -> Vec<(ActorId, ActorId, EventKind)> {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .map(|e| (e.instigator, e.target, e.kind))
            .collect()
    }

    pub fn active_marriages(&self) -> Vec<Marriage> {
        self.state
            .lock()
            .unwrap()
            .marriages
            .iter()
            .filter(|(_, active)| *active)
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub fn divorce_count(&self) -> usize {
        self.state.lock().unwrap().divorces
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn get_marriage(&self, actor: ActorId) -> RelayerResult<Vec<PartnerRecord>> {
        Ok(self
            .active_marriages()
            .into_iter()
            .filter(|m| m.involves(actor))
            .map(|m| PartnerRecord {
                marriage_id: m.marriage_id,
                user_id: actor,
                partner_id: if m.partner_a == actor { m.partner_b } else { m.partner_a },
            })
            .collect())
    }

    async fn add_event(
        &self,
        instigator: ActorId,
        target: ActorId,
        kind: EventKind,
    ) -> RelayerResult<()> {
        self.state.lock().unwrap().events.push(Event {
            instigator,
            target,
            kind,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn marry(&self, a: ActorId, b: ActorId) -> RelayerResult<Marriage> {
        let mut state = self.state.lock().unwrap();
        for actor in [a, b] {
            if state
                .marriages
                .iter()
                .any(|(m, active)| *active && m.involves(actor))
            {
                return Err(RelayerError::MarriageConflict { actor_id: actor });
            }
        }

        let marriage = Marriage {
            marriage_id: Uuid::new_v4(),
            partner_a: a,
            partner_b: b,
        };
        state.marriages.push((marriage.clone(), true));
        Ok(marriage)
    }

    async fn divorce(
        &self,
        _instigator: ActorId,
        _target: ActorId,
        marriage_id: Uuid,
    ) -> RelayerResult<bool> {
        let mut state = self.state.lock().unwrap();
        let mut ended = false;
        for (marriage, active) in state.marriages.iter_mut() {
            if marriage.marriage_id == marriage_id && *active {
                *active = false;
                ended = true;
            }
        }
        if ended {
            state.divorces += 1;
        }
        Ok(ended)
    }
}

/// Partner edges only; there is no parentage in memory
#[async_trait]
impl MemberStore for MemoryGateway {
    async fn tree_member(&self, actor: ActorId) -> RelayerResult<Option<FamilyTreeMember>> {
        let partner = self.get_marriage(actor).await?.first().map(|r| r.partner_id);
        Ok(partner.map(|partner_id| FamilyTreeMember {
            partner_id: Some(partner_id),
            ..FamilyTreeMember::new(actor)
        }))
    }
}

/// Chat platform with fixed contents that records replies
pub struct FakePlatform {
    shard_ids: Vec<ShardId>,
    guilds: DashMap<GuildId, Guild>,
    remote_guilds: DashMap<GuildId, Guild>,
    messages: DashMap<(ChannelId, MessageId), ChatMessage>,
    members: DashMap<ActorId, Actor>,
    sent: Mutex<Vec<(ChannelId, String)>>,
}

impl FakePlatform {
    pub fn new(shard_ids: Vec<ShardId>) -> Self {
        Self {
            shard_ids,
            guilds: DashMap::new(),
            remote_guilds: DashMap::new(),
            messages: DashMap::new(),
            members: DashMap::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn add_guild(&self, guild: Guild) {
        self.guilds.insert(guild.id, guild);
    }

    /// Only reachable through `fetch_guild`
    pub fn add_remote_guild(&self, guild: Guild) {
        self.remote_guilds.insert(guild.id, guild);
    }

    pub fn add_message(&self, message: ChatMessage) {
        self.members.insert(message.author.id, message.author);
        self.messages
            .insert((message.channel_id, message.id), message);
    }

    pub fn add_member(&self, actor: Actor) {
        self.members.insert(actor.id, actor);
    }

    pub fn sent(&self) -> Vec<(ChannelId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    fn shard_ids(&self) -> &[ShardId] {
        &self.shard_ids
    }

    fn cached_guild(&self, guild_id: GuildId) -> Option<Guild> {
        self.guilds.get(&guild_id).map(|g| g.clone())
    }

    async fn fetch_guild(&self, guild_id: GuildId) -> RelayerResult<Option<Guild>> {
        Ok(self.remote_guilds.get(&guild_id).map(|g| g.clone()))
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
        self.sent
            .lock()
            .unwrap()
            .push((channel_id, content.to_string()));
        Ok(())
    }
}
