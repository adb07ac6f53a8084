//! Cross-shard event bus
//!
//! Each named channel gets one long-lived subscription loop that:
//! 1. Blocks until a message arrives
//! 2. Decodes the JSON payload into the handler's schema
//! 3. Awaits the handler before taking the next message
//!
//! Handler failures are logged and the loop moves on. There is no
//! redelivery and no ordering across channels.

pub mod messages;
pub mod subscriber;
pub mod transport;

pub use messages::{
    ChannelMessage, OutboundReply, RunGlobalCommand, CHAT_INBOUND, CHAT_OUTBOUND,
    RUN_GLOBAL_COMMAND, TREE_MEMBER_UPDATE,
};
pub use subscriber::{ChannelHandler, EventBus};
pub use transport::{MemoryTransport, PgTransport, PubSubTransport, Subscription};
