//! State management with PostgreSQL persistence
//!
//! Handles:
//! - Active marriage lookup and commits
//! - The append-only relationship event log
//! - Parentage lookups for family tree members

mod manager;

pub use manager::{RelationshipStats, StateManager};

use crate::error::RelayerResult;
use crate::relationship::{ActorId, EventKind, Marriage, PartnerRecord};

use async_trait::async_trait;
use uuid::Uuid;

/// The storage surface the proposal coordinator depends on.
///
/// Every call is a short transaction that releases its connection on all
/// exit paths.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Active partner records for an actor; empty when unmarried
    async fn get_marriage(&self, actor: ActorId) -> RelayerResult<Vec<PartnerRecord>>;

    async fn add_event(
        &self,
        instigator: ActorId,
        target: ActorId,
        kind: EventKind,
    ) -> RelayerResult<()>;

    /// Fails with `MarriageConflict` if either actor is already married
    async fn marry(&self, a: ActorId, b: ActorId) -> RelayerResult<Marriage>;

    /// `false` when the marriage was no longer active
    async fn divorce(
        &self,
        instigator: ActorId,
        target: ActorId,
        marriage_id: Uuid,
    ) -> RelayerResult<bool>;
}
