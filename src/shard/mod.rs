//! Shard ownership and cross-shard command replay

pub mod context;
pub mod router;

pub use context::{CommandContext, OutputMode};
pub use router::{Ownership, ShardCommandRouter};
