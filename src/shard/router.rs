//! Replays globally broadcast commands on every shard
//!
//! Every shard applies the command's side effects; only the shard that owns
//! the guild emits the reply.

use super::context::CommandContext;
use crate::bus::{ChannelHandler, RunGlobalCommand};
use crate::chat::ChatPlatform;
use crate::commands::CommandSurface;
use crate::error::{HandlerFailure, RouteError};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Local,
    Remote,
}

impl Ownership {
    pub fn label(&self) -> &'static str {
        match self {
            Ownership::Local => "local",
            Ownership::Remote => "remote",
        }
    }
}

pub struct ShardCommandRouter {
    platform: Arc<dyn ChatPlatform>,
    commands: Arc<CommandSurface>,
}

impl ShardCommandRouter {
    pub fn new(platform: Arc<dyn ChatPlatform>, commands: Arc<CommandSurface>) -> Self {
        Self { platform, commands }
    }

    /// Resolve the referenced message and run the embedded command
    pub async fn route(&self, payload: RunGlobalCommand) -> Result<Ownership, RouteError> {
        let guild = match self.platform.cached_guild(payload.guild_id) {
            Some(guild) => guild,
            None => {
                debug!("Guild {} not cached, fetching", payload.guild_id);
                self.platform
                    .fetch_guild(payload.guild_id)
                    .await?
                    .ok_or(RouteError::GuildNotFound(payload.guild_id))?
            }
        };

        if !guild.has_channel(payload.channel_id) {
            return Err(RouteError::ResourceNotFound {
                resource: "channel",
                id: payload.channel_id,
            });
        }

        let mut message = self
            .platform
            .fetch_message(payload.channel_id, payload.message_id)
            .await?
            .ok_or(RouteError::ResourceNotFound {
                resource: "message",
                id: payload.message_id,
            })?;
        message.content = payload.command;

        let (ownership, ctx) = if self.platform.owns_guild(&guild) {
            (
                Ownership::Local,
                CommandContext::emitting(message, self.platform.clone()),
            )
        } else {
            (
                Ownership::Remote,
                CommandContext::silent(message, self.platform.clone()),
            )
        };

        info!(
            "Replaying global command for guild {} (shard {}, {})",
            guild.id,
            guild.shard_id,
            ownership.label()
        );
        self.commands.invoke(&ctx).await?;

        crate::metrics::record_global_command(ownership.label());
        Ok(ownership)
    }
}

#[async_trait]
impl ChannelHandler for ShardCommandRouter {
    type Payload = RunGlobalCommand;

    async fn handle(&self, payload: RunGlobalCommand) -> Result<(), HandlerFailure> {
        self.route(payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatMessage, Guild, MessageHub};
    use crate::relationship::{Actor, EventKind};
    use crate::state::PersistenceGateway;
    use crate::testing::{chat_message, coordinator, FakePlatform, MemoryGateway};

    const GUILD: u64 = 1;
    const CHANNEL: u64 = 20;
    const MESSAGE: u64 = 300;

    fn original() -> ChatMessage {
        chat_message(MESSAGE, Some(GUILD), CHANNEL, Actor::human(1), "m!help")
    }

    fn shard(shard_id: u32, gateway: Arc<MemoryGateway>) -> (ShardCommandRouter, Arc<FakePlatform>) {
        let platform = Arc::new(FakePlatform::new(vec![shard_id]));
        platform.add_guild(Guild {
            id: GUILD,
            shard_id: 1,
            channels: vec![CHANNEL],
        });
        platform.add_message(original());
        platform.add_member(Actor::human(2));

        let commands = Arc::new(CommandSurface::new(
            Arc::new(coordinator(gateway, MessageHub::new(8))),
            platform.clone(),
            "m!",
        ));
        (ShardCommandRouter::new(platform.clone(), commands), platform)
    }

    fn payload(command: &str) -> RunGlobalCommand {
        RunGlobalCommand {
            guild_id: GUILD,
            channel_id: CHANNEL,
            message_id: MESSAGE,
            command: command.to_string(),
        }
    }

    #[tokio::test]
    async fn test_exactly_one_shard_replies() {
        let gateway = Arc::new(MemoryGateway::default());
        gateway.marry(2, 7).await.unwrap();

        let shards: Vec<_> = (0..3).map(|id| shard(id, gateway.clone())).collect();
        let mut ownerships = Vec::new();
        for (router, _) in &shards {
            ownerships.push(router.route(payload("m!propose <@2>")).await.unwrap());
        }

        assert_eq!(
            ownerships,
            vec![Ownership::Remote, Ownership::Local, Ownership::Remote]
        );
        let replies: Vec<usize> = shards.iter().map(|(_, p)| p.sent().len()).collect();
        assert_eq!(replies, vec![0, 1, 0]);

        // Side effects were applied on all three shards
        let proposals = gateway
            .events()
            .into_iter()
            .filter(|(_, _, kind)| *kind == EventKind::Proposal)
            .count();
        assert_eq!(proposals, 3);
    }

    #[tokio::test]
    async fn test_command_text_replaces_message_content() {
        let gateway = Arc::new(MemoryGateway::default());
        gateway.marry(1, 2).await.unwrap();
        let (router, platform) = shard(1, gateway.clone());

        router.route(payload("m!divorce <@2>")).await.unwrap();

        assert_eq!(
            platform.sent(),
            vec![(CHANNEL, "You are now divorced.".to_string())]
        );
        assert!(gateway.active_marriages().is_empty());
    }

    #[tokio::test]
    async fn test_guild_fetched_when_not_cached() {
        let gateway = Arc::new(MemoryGateway::default());
        let platform = Arc::new(FakePlatform::new(vec![0]));
        platform.add_remote_guild(Guild {
            id: GUILD,
            shard_id: 0,
            channels: vec![CHANNEL],
        });
        platform.add_message(original());
        let commands = Arc::new(CommandSurface::new(
            Arc::new(coordinator(gateway, MessageHub::new(8))),
            platform.clone(),
            "m!",
        ));
        let router = ShardCommandRouter::new(platform.clone(), commands);

        let ownership = router.route(payload("m!divorce <@2>")).await.unwrap();
        assert_eq!(ownership, Ownership::Local);
        assert_eq!(platform.sent(), vec![(CHANNEL, "You're not married.".to_string())]);
    }

    #[tokio::test]
    async fn test_missing_resources() {
        let (router, platform) = shard(1, Arc::new(MemoryGateway::default()));

        let mut unknown_guild = payload("m!divorce <@2>");
        unknown_guild.guild_id = 404;
        assert!(matches!(
            router.route(unknown_guild).await,
            Err(RouteError::GuildNotFound(404))
        ));

        let mut unknown_channel = payload("m!divorce <@2>");
        unknown_channel.channel_id = 21;
        assert!(matches!(
            router.route(unknown_channel).await,
            Err(RouteError::ResourceNotFound { resource: "channel", id: 21 })
        ));

        let mut unknown_message = payload("m!divorce <@2>");
        unknown_message.message_id = 301;
        assert!(matches!(
            router.route(unknown_message).await,
            Err(RouteError::ResourceNotFound { resource: "message", id: 301 })
        ));

        assert!(platform.sent().is_empty());
    }

    #[tokio::test]
    async fn test_handler_reports_route_failures() {
        let (router, _platform) = shard(1, Arc::new(MemoryGateway::default()));
        let mut unknown_guild = payload("m!divorce <@2>");
        unknown_guild.guild_id = 404;

        let failure = router.handle(unknown_guild).await.unwrap_err();
        assert!(failure.to_string().contains("Guild 404 not found"));
    }
}
