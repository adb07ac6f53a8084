//! Relationship domain records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable chat-platform user id
pub type ActorId = u64;

/// A participant as resolved by the chat platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    #[serde(default)]
    pub bot: bool,
}

impl Actor {
    pub fn human(id: ActorId) -> Self {
        Self { id, bot: false }
    }
}

/// A pending negotiation; lives only in memory for the response window
#[derive(Debug, Clone)]
pub struct Proposal {
    pub instigator: ActorId,
    pub target: ActorId,
    pub channel_id: u64,
    pub created_at: DateTime<Utc>,
}

/// One side of an active marriage as stored by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerRecord {
    pub marriage_id: Uuid,
    pub user_id: ActorId,
    pub partner_id: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Marriage {
    pub marriage_id: Uuid,
    pub partner_a: ActorId,
    pub partner_b: ActorId,
}

impl Marriage {
    pub fn involves(&self, actor: ActorId) -> bool {
        self.partner_a == actor || self.partner_b == actor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Proposal,
    AlreadyMarried,
    Timeout,
    IDont,
    IDo,
}

impl EventKind {
    /// Persisted representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Proposal => "PROPOSAL",
            EventKind::AlreadyMarried => "ALREADY MARRIED",
            EventKind::Timeout => "TIMEOUT",
            EventKind::IDont => "I DONT",
            EventKind::IDo => "I DO",
        }
    }
}

/// Append-only audit record of a relationship transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub instigator: ActorId,
    pub target: ActorId,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}
