//! Relationship coordination
//!
//! The coordinator:
//! 1. Guards each actor to one in-flight proposal at a time
//! 2. Blocks marriages inside an existing family lineage
//! 3. Waits a bounded window for the target's yes/no reply
//! 4. Records every transition as an audit event

pub mod classifier;
pub mod coordinator;
pub mod exclusivity;
pub mod tree;
pub mod types;

pub use classifier::{PatternClassifier, Response, ResponseClassifier};
pub use coordinator::{CoordinatorConfig, Opening, Outcome, PendingProposal, ProposalCoordinator};
pub use exclusivity::{ExclusivitySet, Reservation};
pub use tree::{FamilyTree, FamilyTreeMember, MemberStore, RelationshipGraph, TreeCache};
pub use types::{Actor, ActorId, Event, EventKind, Marriage, PartnerRecord, Proposal};
