//! Execution context handed to a command invocation

use crate::chat::{ChatMessage, ChatPlatform};
use crate::error::RelayerResult;
use crate::relationship::Actor;

use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Replies are delivered to the channel
    Emit,
    /// Side effects run, replies are dropped
    Suppress,
}

pub struct CommandContext {
    message: ChatMessage,
    output: OutputMode,
    platform: Arc<dyn ChatPlatform>,
}

impl CommandContext {
    pub fn emitting(message: ChatMessage, platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            message,
            output: OutputMode::Emit,
            platform,
        }
    }

    pub fn silent(message: ChatMessage, platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            message,
            output: OutputMode::Suppress,
            platform,
        }
    }

    pub fn message(&self) -> &ChatMessage {
        &self.message
    }

    pub fn author(&self) -> Actor {
        self.message.author
    }

    pub fn output(&self) -> OutputMode {
        self.output
    }

    pub async fn reply(&self, content: &str) -> RelayerResult<()> {
        match self.output {
            OutputMode::Emit => {
                self.platform
                    .send_message(self.message.channel_id, content)
                    .await
            }
            OutputMode::Suppress => {
                debug!(
                    "Suppressed reply in channel {}: {}",
                    self.message.channel_id, content
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chat_message, FakePlatform};

    #[tokio::test]
    async fn test_only_emitting_context_sends() {
        let platform = Arc::new(FakePlatform::new(vec![0]));
        let message = chat_message(1, Some(2), 3, Actor::human(4), "m!divorce <@5>");

        CommandContext::silent(message.clone(), platform.clone())
            .reply("hidden")
            .await
            .unwrap();
        CommandContext::emitting(message, platform.clone())
            .reply("shown")
            .await
            .unwrap();

        assert_eq!(platform.sent(), vec![(3, "shown".to_string())]);
    }
}
