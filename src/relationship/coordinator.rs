//! Proposal state machine and divorce handling

use super::classifier::{Response, ResponseClassifier};
use super::exclusivity::{ExclusivitySet, Reservation};
use super::tree::RelationshipGraph;
use super::types::{Actor, ActorId, EventKind, Marriage, Proposal};
use crate::bus::{EventBus, TREE_MEMBER_UPDATE};
use crate::chat::{ChannelId, ChatMessage, MessageHub};
use crate::config::{ProposalConfig, RelayerConfig};
use crate::error::{DivorceError, ProposalError, RelayerError, TargetRejection};
use crate::state::PersistenceGateway;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// The service's own identity; never a valid target
    pub bot_user_id: ActorId,
    pub response_window: Duration,
    pub tree_depth: u32,
}

impl CoordinatorConfig {
    pub fn from_settings(relayer: &RelayerConfig, proposals: &ProposalConfig) -> Self {
        Self {
            bot_user_id: relayer.bot_user_id,
            response_window: proposals.response_window(),
            tree_depth: proposals.family_tree_depth,
        }
    }
}

/// Terminal result of a proposal that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Married(Marriage),
    Declined,
    TimedOut,
    TargetUnavailable,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Married(_) => "married",
            Outcome::Declined => "declined",
            Outcome::TimedOut => "timed_out",
            Outcome::TargetUnavailable => "target_unavailable",
        }
    }
}

/// Result of the first phase of a proposal
pub enum Opening {
    TargetUnavailable,
    Pending(PendingProposal),
}

/// Applies committed partner changes to the family tree and announces them
#[derive(Clone)]
struct PartnerSync {
    graph: Arc<dyn RelationshipGraph>,
    bus: Option<Arc<EventBus>>,
}

impl PartnerSync {
    /// Failures are logged: the database already holds the committed change
    async fn apply(&self, changes: [(ActorId, Option<ActorId>); 2]) {
        for (actor, partner) in changes {
            let member = match self.graph.set_partner(actor, partner).await {
                Ok(member) => member,
                Err(e) => {
                    warn!("Failed to update family tree for {}: {}", actor, e);
                    continue;
                }
            };

            if let Some(bus) = &self.bus {
                if let Err(e) = bus.publish(TREE_MEMBER_UPDATE, &member).await {
                    warn!("Failed to publish tree update for {}: {}", actor, e);
                }
            }
        }
    }
}

/// Coordinates proposals and divorces for one process
pub struct ProposalCoordinator {
    gateway: Arc<dyn PersistenceGateway>,
    graph: Arc<dyn RelationshipGraph>,
    partners: PartnerSync,
    classifier: Arc<dyn ResponseClassifier>,
    inbox: MessageHub,
    exclusivity: Arc<ExclusivitySet>,
    config: CoordinatorConfig,
}

impl ProposalCoordinator {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        graph: Arc<dyn RelationshipGraph>,
        classifier: Arc<dyn ResponseClassifier>,
        inbox: MessageHub,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            gateway,
            partners: PartnerSync {
                graph: graph.clone(),
                bus: None,
            },
            graph,
            classifier,
            inbox,
            exclusivity: Arc::new(ExclusivitySet::new()),
            config,
        }
    }

    /// Publish `TreeMemberUpdate` for both partners after every marriage and divorce
    pub fn with_tree_updates(mut self, bus: Arc<EventBus>) -> Self {
        self.partners.bus = Some(bus);
        self
    }

    pub fn exclusivity(&self) -> &Arc<ExclusivitySet> {
        &self.exclusivity
    }

    /// Run a proposal from validation through to its terminal outcome
    pub async fn propose(
        &self,
        instigator: &Actor,
        target: &Actor,
        channel_id: ChannelId,
    ) -> Result<Outcome, ProposalError> {
        match self.open(instigator, target, channel_id).await? {
            Opening::TargetUnavailable => Ok(Outcome::TargetUnavailable),
            Opening::Pending(pending) => pending.conclude().await,
        }
    }

    /// Validate a proposal and, if both parties are free, start the wait.
    ///
    /// Checks run in order and stop at the first failure.
    pub async fn open(
        &self,
        instigator: &Actor,
        target: &Actor,
        channel_id: ChannelId,
    ) -> Result<Opening, ProposalError> {
        let result = self.try_open(instigator, target, channel_id).await;
        match &result {
            Ok(Opening::TargetUnavailable) => {
                crate::metrics::record_proposal(Outcome::TargetUnavailable.label())
            }
            Ok(Opening::Pending(_)) => {}
            Err(e) => crate::metrics::record_proposal_rejected(rejection_label(e)),
        }
        result
    }

    async fn try_open(
        &self,
        instigator: &Actor,
        target: &Actor,
        channel_id: ChannelId,
    ) -> Result<Opening, ProposalError> {
        self.exclusivity
            .check(instigator.id, target.id)
            .map_err(ProposalError::ConcurrentProposal)?;

        if target.id == self.config.bot_user_id {
            return Err(ProposalError::InvalidTarget(TargetRejection::ServiceIdentity));
        }
        if target.bot || instigator.bot {
            return Err(ProposalError::InvalidTarget(TargetRejection::NonHuman));
        }
        if instigator.id == target.id {
            return Err(ProposalError::InvalidTarget(TargetRejection::SelfTarget));
        }

        let tree = self
            .graph
            .build_tree(instigator.id, self.config.tree_depth)
            .await?;
        if tree.contains(target.id) {
            debug!(
                "Actor {} is {:?} hops from {}",
                target.id,
                tree.distance(target.id),
                instigator.id
            );
            return Err(ProposalError::AlreadyRelated);
        }

        if !self.gateway.get_marriage(instigator.id).await?.is_empty() {
            return Err(ProposalError::AlreadyMarried);
        }

        if !self.gateway.get_marriage(target.id).await?.is_empty() {
            self.gateway
                .add_event(instigator.id, target.id, EventKind::Proposal)
                .await?;
            self.gateway
                .add_event(target.id, instigator.id, EventKind::AlreadyMarried)
                .await?;
            info!(
                "Proposal from {} to {} refused: target already married",
                instigator.id, target.id
            );
            return Ok(Opening::TargetUnavailable);
        }

        // Re-validated under the lock: another call may have reserved either
        // actor while this one was suspended on the lookups above.
        let reservation = self
            .exclusivity
            .reserve(instigator.id, target.id)
            .map_err(ProposalError::ConcurrentProposal)?;

        // Subscribe before the proposal is visible so no reply can be missed
        let replies = self.inbox.subscribe();

        self.gateway
            .add_event(instigator.id, target.id, EventKind::Proposal)
            .await?;

        info!(
            "Proposal from {} to {} pending in channel {}",
            instigator.id, target.id, channel_id
        );

        Ok(Opening::Pending(PendingProposal {
            proposal: Proposal {
                instigator: instigator.id,
                target: target.id,
                channel_id,
                created_at: Utc::now(),
            },
            replies,
            reservation,
            gateway: self.gateway.clone(),
            partners: self.partners.clone(),
            classifier: self.classifier.clone(),
            window: self.config.response_window,
        }))
    }

    /// Dissolve the instigator's marriage with `target`
    pub async fn divorce(&self, instigator: ActorId, target: ActorId) -> Result<(), DivorceError> {
        let records = self.gateway.get_marriage(instigator).await?;
        if records.is_empty() {
            return Err(DivorceError::NotMarried);
        }
        let Some(record) = records.iter().find(|r| r.partner_id == target) else {
            return Err(DivorceError::WrongPartner);
        };

        // A concurrent divorce may have ended it since the lookup
        if !self
            .gateway
            .divorce(instigator, target, record.marriage_id)
            .await?
        {
            return Err(DivorceError::NotMarried);
        }

        self.partners
            .apply([(instigator, None), (target, None)])
            .await;
        crate::metrics::record_divorce();
        info!("Actor {} divorced {}", instigator, target);
        Ok(())
    }
}

fn rejection_label(e: &ProposalError) -> &'static str {
    match e {
        ProposalError::ConcurrentProposal(_) => "concurrent_proposal",
        ProposalError::InvalidTarget(_) => "invalid_target",
        ProposalError::AlreadyRelated => "already_related",
        ProposalError::AlreadyMarried => "already_married",
        ProposalError::Gateway(_) => "gateway",
    }
}

enum Verdict {
    Accepted,
    Refused,
}

/// A proposal waiting for the target's reply.
///
/// Holds both actors in the exclusivity set until it is concluded or dropped.
pub struct PendingProposal {
    proposal: Proposal,
    replies: broadcast::Receiver<ChatMessage>,
    reservation: Reservation,
    gateway: Arc<dyn PersistenceGateway>,
    partners: PartnerSync,
    classifier: Arc<dyn ResponseClassifier>,
    window: Duration,
}

impl PendingProposal {
    pub fn proposal(&self) -> &Proposal {
        &self.proposal
    }

    /// Wait out the response window and record the result
    pub async fn conclude(mut self) -> Result<Outcome, ProposalError> {
        let reply = tokio::time::timeout(self.window, self.next_reply()).await;
        let instigator = self.proposal.instigator;
        let target = self.proposal.target;

        let outcome = match reply {
            Err(_) => {
                self.gateway
                    .add_event(target, instigator, EventKind::Timeout)
                    .await?;
                Outcome::TimedOut
            }
            Ok(Verdict::Refused) => {
                self.gateway
                    .add_event(target, instigator, EventKind::IDont)
                    .await?;
                Outcome::Declined
            }
            Ok(Verdict::Accepted) => {
                self.gateway
                    .add_event(target, instigator, EventKind::IDo)
                    .await?;
                let marriage = self
                    .gateway
                    .marry(instigator, target)
                    .await
                    .map_err(|e| match e {
                        RelayerError::MarriageConflict { .. } => ProposalError::AlreadyMarried,
                        other => ProposalError::Gateway(other),
                    })?;
                self.partners
                    .apply([(instigator, Some(target)), (target, Some(instigator))])
                    .await;
                Outcome::Married(marriage)
            }
        };

        info!(
            "Proposal from {} to {} concluded: {}",
            instigator,
            target,
            outcome.label()
        );
        crate::metrics::record_proposal(outcome.label());
        debug!("Releasing {:?}", self.reservation.actors());
        Ok(outcome)
    }

    async fn next_reply(&mut self) -> Verdict {
        loop {
            let message = match self.replies.recv().await {
                Ok(message) => message,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Proposal reply stream lagged, skipped {} messages", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return std::future::pending().await,
            };

            if message.author.id != self.proposal.target
                || message.channel_id != self.proposal.channel_id
            {
                continue;
            }

            match self.classifier.classify(&message.content) {
                Response::Affirmative => return Verdict::Accepted,
                Response::Negative => return Verdict::Refused,
                Response::Unrecognized => continue,
            }
        }
    }
}
