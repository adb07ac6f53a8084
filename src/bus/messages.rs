//! Channel names and payload schemas carried between shard processes

use crate::chat::{ChannelId, GuildId, MessageId};

use serde::{Deserialize, Serialize};

/// Refreshes cached relationship-graph members
pub const TREE_MEMBER_UPDATE: &str = "TreeMemberUpdate";
/// Replays a command on every shard; only the owning shard replies
pub const RUN_GLOBAL_COMMAND: &str = "RunGlobalCommand";
/// Gateway to relayer: every message the gateway observes
pub const CHAT_INBOUND: &str = "ChatInbound";
/// Relayer to gateway: replies to deliver
pub const CHAT_OUTBOUND: &str = "ChatOutbound";

/// A raw delivery; consumed once, never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunGlobalCommand {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundReply {
    pub channel_id: ChannelId,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_global_command_schema() {
        let parsed: RunGlobalCommand = serde_json::from_str(
            r#"{"guild_id": 1, "channel_id": 2, "message_id": 3, "command": "m!divorce <@4>"}"#,
        )
        .unwrap();
        assert_eq!(parsed.command, "m!divorce <@4>");

        let missing: Result<RunGlobalCommand, _> =
            serde_json::from_str(r#"{"guild_id": 1, "channel_id": 2, "command": "x"}"#);
        assert!(missing.is_err());

        let extra: Result<RunGlobalCommand, _> = serde_json::from_str(
            r#"{"guild_id": 1, "channel_id": 2, "message_id": 3, "command": "x", "shard": 0}"#,
        );
        assert!(extra.is_err());
    }
}
