//! Text command surface over the proposal coordinator
//!
//! Used both for commands typed on an owned shard and for commands replayed
//! by the shard router.

use crate::chat::{ChatMessage, ChatPlatform};
use crate::error::{CommandError, DivorceError, ProposalError, TargetRejection};
use crate::relationship::{ActorId, Opening, Outcome, ProposalCoordinator};
use crate::shard::CommandContext;

use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

lazy_static! {
    static ref MENTION: Regex = Regex::new(r"^<@!?(\d+)>$").expect("mention pattern is valid");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Propose(ActorId),
    Divorce(ActorId),
}

impl Command {
    /// `Ok(None)` when the text is not addressed to us at all
    pub fn parse(prefix: &str, content: &str) -> Result<Option<Command>, CommandError> {
        let Some(rest) = content.trim().strip_prefix(prefix) else {
            return Ok(None);
        };

        let mut parts = rest.split_whitespace();
        let verb = parts.next().unwrap_or_default().to_lowercase();
        let target = parts.next().and_then(parse_actor);

        match verb.as_str() {
            "propose" | "marry" => target
                .map(|t| Some(Command::Propose(t)))
                .ok_or(CommandError::MissingTarget("propose")),
            "divorce" => target
                .map(|t| Some(Command::Divorce(t)))
                .ok_or(CommandError::MissingTarget("divorce")),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn parse_actor(token: &str) -> Option<ActorId> {
    match MENTION.captures(token) {
        Some(caps) => caps[1].parse().ok(),
        None => token.parse().ok(),
    }
}

pub struct CommandSurface {
    coordinator: Arc<ProposalCoordinator>,
    platform: Arc<dyn ChatPlatform>,
    prefix: String,
}

impl CommandSurface {
    pub fn new(
        coordinator: Arc<ProposalCoordinator>,
        platform: Arc<dyn ChatPlatform>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            platform,
            prefix: prefix.into(),
        }
    }

    pub async fn invoke(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let Some(command) = Command::parse(&self.prefix, &ctx.message().content)? else {
            debug!("Ignoring non-command message {}", ctx.message().id);
            return Ok(());
        };

        debug!("Invoking {:?} for {} ({:?})", command, ctx.author().id, ctx.output());
        match command {
            Command::Propose(target) => self.propose(ctx, target).await,
            Command::Divorce(target) => self.divorce(ctx, target).await,
        }
    }

    async fn propose(&self, ctx: &CommandContext, target_id: ActorId) -> Result<(), CommandError> {
        let instigator = ctx.author();
        let target = self
            .platform
            .fetch_member(ctx.message().guild_id, target_id)
            .await?
            .ok_or(CommandError::UnknownMember(target_id))?;

        let opening = match self
            .coordinator
            .open(&instigator, &target, ctx.message().channel_id)
            .await
        {
            Ok(opening) => opening,
            Err(ProposalError::Gateway(e)) => return Err(e.into()),
            Err(e) => {
                ctx.reply(proposal_refusal(&e)).await?;
                return Ok(());
            }
        };

        let pending = match opening {
            Opening::TargetUnavailable => {
                ctx.reply(outcome_text(&Outcome::TargetUnavailable)).await?;
                return Ok(());
            }
            Opening::Pending(pending) => pending,
        };

        ctx.reply(&format!(
            "<@{}>, do you accept <@{}>'s proposal?",
            target.id, instigator.id
        ))
        .await?;

        match pending.conclude().await {
            Ok(outcome) => ctx.reply(outcome_text(&outcome)).await?,
            Err(ProposalError::Gateway(e)) => return Err(e.into()),
            Err(e) => ctx.reply(proposal_refusal(&e)).await?,
        }
        Ok(())
    }

    async fn divorce(&self, ctx: &CommandContext, target: ActorId) -> Result<(), CommandError> {
        let text = match self.coordinator.divorce(ctx.author().id, target).await {
            Ok(()) => "You are now divorced.",
            Err(DivorceError::NotMarried) => "You're not married.",
            Err(DivorceError::WrongPartner) => "You aren't married to that person.",
            Err(DivorceError::Gateway(e)) => return Err(e.into()),
        };
        ctx.reply(text).await?;
        Ok(())
    }

    /// Dispatch prefixed commands typed in guilds this process owns
    pub async fn listen(self: Arc<Self>, mut inbox: broadcast::Receiver<ChatMessage>) {
        info!("Command listener started (prefix {:?})", self.prefix);

        loop {
            let message = match inbox.recv().await {
                Ok(message) => message,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Command listener lagged, skipped {} messages", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if message.author.bot
                || !message.content.trim().starts_with(&self.prefix)
                || !self.owns(&message)
            {
                continue;
            }

            // Proposals wait on replies, so every command runs on its own task
            let surface = self.clone();
            tokio::spawn(async move {
                let ctx = CommandContext::emitting(message, surface.platform.clone());
                if let Err(e) = surface.invoke(&ctx).await {
                    warn!("Command {} failed: {}", ctx.message().id, e);
                }
            });
        }

        info!("Command listener stopped");
    }

    fn owns(&self, message: &ChatMessage) -> bool {
        match message.guild_id {
            Some(guild_id) => self
                .platform
                .cached_guild(guild_id)
                .map(|guild| self.platform.owns_guild(&guild))
                .unwrap_or(false),
            // Direct messages are delivered to shard 0
            None => self.platform.shard_ids().contains(&0),
        }
    }
}

fn proposal_refusal(e: &ProposalError) -> &'static str {
    match e {
        ProposalError::ConcurrentProposal(crate::error::Party::Instigator) => {
            "You can only propose to one person at a time."
        }
        ProposalError::ConcurrentProposal(crate::error::Party::Target) => {
            "That person has already been proposed to. Please wait."
        }
        ProposalError::InvalidTarget(TargetRejection::ServiceIdentity) => {
            "I'm flattered, but no."
        }
        ProposalError::InvalidTarget(TargetRejection::NonHuman) => "You can't marry a bot.",
        ProposalError::InvalidTarget(TargetRejection::SelfTarget) => "You can't marry yourself.",
        ProposalError::AlreadyRelated => "They're already part of your family.",
        ProposalError::AlreadyMarried => "You can't marry someone while you're already married.",
        ProposalError::Gateway(_) => "Something went wrong, please try again.",
    }
}

fn outcome_text(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Married(_) => "I now pronounce you married.",
        Outcome::Declined => "That's fair. The marriage has been called off.",
        Outcome::TimedOut => "Your proposal has timed out. Try again when they're online!",
        Outcome::TargetUnavailable => "They're already married.",
    }
}
