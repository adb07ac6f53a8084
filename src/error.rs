//! Error types for the Kinship Relayer

use crate::chat::GuildId;
use crate::relationship::ActorId;

use thiserror::Error;

/// Infrastructure error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Pub/sub error on channel {channel}: {message}")]
    PubSub { channel: String, message: String },

    #[error("Channel {channel} already has a subscriber")]
    AlreadySubscribed { channel: String },

    #[error("Actor {actor_id} already has an active marriage")]
    MarriageConflict { actor_id: ActorId },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayerError::Database(_) | RelayerError::PubSub { .. })
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;

/// Which side of a proposal is already engaged elsewhere
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Instigator,
    Target,
}

/// Why a proposal target was refused before any lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRejection {
    ServiceIdentity,
    NonHuman,
    SelfTarget,
}

#[derive(Error, Debug)]
pub enum ProposalError {
    #[error("{0:?} already has a pending proposal")]
    ConcurrentProposal(Party),

    #[error("Invalid proposal target: {0:?}")]
    InvalidTarget(TargetRejection),

    #[error("Target is already part of the instigator's family")]
    AlreadyRelated,

    #[error("Instigator is already married")]
    AlreadyMarried,

    #[error(transparent)]
    Gateway(#[from] RelayerError),
}

#[derive(Error, Debug)]
pub enum DivorceError {
    #[error("Instigator is not married")]
    NotMarried,

    #[error("Instigator is not married to the target")]
    WrongPartner,

    #[error(transparent)]
    Gateway(#[from] RelayerError),
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Command {0} needs a target user")]
    MissingTarget(&'static str),

    #[error("User {0} is not known to this shard")]
    UnknownMember(ActorId),

    #[error(transparent)]
    Relayer(#[from] RelayerError),
}

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Guild {0} not found")]
    GuildNotFound(GuildId),

    #[error("{resource} {id} not found")]
    ResourceNotFound { resource: &'static str, id: u64 },

    #[error("Command failed: {0}")]
    Command(#[from] CommandError),

    #[error(transparent)]
    Platform(#[from] RelayerError),
}

/// Failure reported by a channel handler; never terminates the channel loop
#[derive(Error, Debug)]
#[error("Handler failure: {0}")]
pub struct HandlerFailure(pub String);

impl From<RouteError> for HandlerFailure {
    fn from(e: RouteError) -> Self {
        HandlerFailure(e.to_string())
    }
}

impl From<RelayerError> for HandlerFailure {
    fn from(e: RelayerError) -> Self {
        HandlerFailure(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RelayerError::PubSub {
            channel: "TreeMemberUpdate".to_string(),
            message: "connection reset".to_string(),
        }
        .is_retryable());
        assert!(!RelayerError::MarriageConflict { actor_id: 7 }.is_retryable());
        assert!(!RelayerError::Config("bad".to_string()).is_retryable());
    }
}
