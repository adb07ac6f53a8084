//! Kinship Relayer - sharded relationship-command service
//!
//! Runs marriage proposals and divorces for a chat platform that is split
//! across many shard processes. Shards share a PostgreSQL database and
//! coordinate through a named-channel event bus.

pub mod api;
pub mod bus;
pub mod chat;
pub mod commands;
pub mod config;
pub mod error;
pub mod metrics;
pub mod relationship;
pub mod shard;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
