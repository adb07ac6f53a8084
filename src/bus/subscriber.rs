//! Per-channel subscription loops

use super::messages::ChannelMessage;
use super::transport::{PubSubTransport, Subscription};
use crate::error::{HandlerFailure, RelayerError, RelayerResult};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Receives the decoded payloads of one channel
#[async_trait]
pub trait ChannelHandler: Send + Sync + 'static {
    type Payload: DeserializeOwned + Debug + Send + 'static;

    async fn handle(&self, payload: Self::Payload) -> Result<(), HandlerFailure>;
}

struct ChannelTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns one long-lived subscription loop per channel
pub struct EventBus {
    transport: Arc<dyn PubSubTransport>,
    channels: DashMap<String, ChannelTask>,
    reconnect_delay: Duration,
}

impl EventBus {
    pub fn new(transport: Arc<dyn PubSubTransport>, reconnect_delay: Duration) -> Self {
        Self {
            transport,
            channels: DashMap::new(),
            reconnect_delay,
        }
    }

    /// Subscribe `handler` to `channel` and start its loop.
    ///
    /// A channel whose loop has already exited can be subscribed again.
    pub async fn subscribe<H: ChannelHandler>(
        &self,
        channel: &str,
        handler: Arc<H>,
    ) -> RelayerResult<()> {
        if self.is_subscribed(channel) {
            return Err(RelayerError::AlreadySubscribed {
                channel: channel.to_string(),
            });
        }

        debug!("Subscribing to channel {}", channel);
        let subscription = self.transport.subscribe(channel).await?;

        match self.channels.entry(channel.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(self.spawn_loop(channel, subscription, handler));
                info!("Subscribed to channel {}", channel);
                return Ok(());
            }
            Entry::Occupied(mut slot) if slot.get().handle.is_finished() => {
                slot.insert(self.spawn_loop(channel, subscription, handler));
                info!("Resubscribed to channel {} after its loop exited", channel);
                return Ok(());
            }
            Entry::Occupied(_) => {}
        }

        // Lost a race with a concurrent subscribe to the same channel
        if let Err(e) = subscription.close().await {
            warn!("Failed to release duplicate subscription to {}: {}", channel, e);
        }
        Err(RelayerError::AlreadySubscribed {
            channel: channel.to_string(),
        })
    }

    fn spawn_loop<H: ChannelHandler>(
        &self,
        channel: &str,
        subscription: Box<dyn Subscription>,
        handler: Arc<H>,
    ) -> ChannelTask {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_channel(
            channel.to_string(),
            subscription,
            handler,
            shutdown_rx,
            self.reconnect_delay,
        ));
        ChannelTask { shutdown, handle }
    }

    /// Stop the loop for `channel` and release its subscription.
    ///
    /// Unknown or already-removed channels are a no-op.
    pub async fn unsubscribe(&self, channel: &str) {
        let Some((_, task)) = self.channels.remove(channel) else {
            debug!("Channel {} has no active subscription", channel);
            return;
        };

        // The loop may already have exited on its own
        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            if e.is_panic() {
                error!("Subscription loop for {} panicked", channel);
            }
        }
        info!("Unsubscribed from channel {}", channel);
    }

    /// Unsubscribe from every channel, including loops that already exited
    pub async fn shutdown(&self) {
        let channels: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        futures::future::join_all(channels.iter().map(|c| self.unsubscribe(c))).await;
        info!("Event bus stopped ({} channels released)", channels.len());
    }

    /// Channels whose loop is still running
    pub fn channels(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|e| !e.value().handle.is_finished())
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels
            .get(channel)
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    /// Serialise `payload` as JSON and publish it
    pub async fn publish<T: Serialize + Sync>(&self, channel: &str, payload: &T) -> RelayerResult<()> {
        let payload = serde_json::to_string(payload)?;
        self.transport.publish(channel, &payload).await
    }
}

async fn run_channel<H: ChannelHandler>(
    channel: String,
    mut subscription: Box<dyn Subscription>,
    handler: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
    reconnect_delay: Duration,
) {
    debug!("Looping to wait for messages on channel {}", channel);

    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = subscription.next_message() => received,
        };

        match received {
            Ok(Some(message)) => {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        warn!("Abandoning in-flight message on {} for shutdown", channel);
                        break;
                    }
                    _ = dispatch(&channel, handler.as_ref(), message) => {}
                }
            }
            Ok(None) => {
                warn!("Subscription to {} closed by transport", channel);
                break;
            }
            Err(e) if !e.is_retryable() => {
                error!("Stopping channel {}: {}", channel, e);
                break;
            }
            Err(e) => {
                warn!("Receive error on channel {}: {}", channel, e);
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }

    if let Err(e) = subscription.close().await {
        warn!("Failed to release subscription to {}: {}", channel, e);
    }
}

async fn dispatch<H: ChannelHandler>(channel: &str, handler: &H, message: ChannelMessage) {
    debug!("Received message on channel {}", channel);
    crate::metrics::record_bus_message(channel);

    let payload: H::Payload = match serde_json::from_str(&message.payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Discarding malformed payload on {}: {}", channel, e);
            crate::metrics::record_handler_failure(channel);
            return;
        }
    };
    debug!("{} payload: {:?}", channel, payload);

    if let Err(e) = handler.handle(payload).await {
        error!("Handler for {} failed: {}", channel, e);
        crate::metrics::record_handler_failure(channel);
    }
}
