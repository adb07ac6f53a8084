//! Pub/sub transports
//!
//! - PostgreSQL LISTEN/NOTIFY, shared by every shard process on the database
//! - An in-process broadcast transport for single-process deployments

use super::messages::ChannelMessage;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::{PgListener, PgPool};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Subscription is live once this returns
    async fn subscribe(&self, channel: &str) -> RelayerResult<Box<dyn Subscription>>;

    async fn publish(&self, channel: &str, payload: &str) -> RelayerResult<()>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Next raw message; `None` once the subscription can no longer deliver
    async fn next_message(&mut self) -> RelayerResult<Option<ChannelMessage>>;

    /// Release the underlying subscription
    async fn close(self: Box<Self>) -> RelayerResult<()>;
}

/// LISTEN/NOTIFY transport; one listener connection per channel
pub struct PgTransport {
    pool: PgPool,
}

impl PgTransport {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PubSubTransport for PgTransport {
    async fn subscribe(&self, channel: &str) -> RelayerResult<Box<dyn Subscription>> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(channel).await?;
        debug!("LISTEN {}", channel);

        Ok(Box::new(PgSubscription {
            channel: channel.to_string(),
            listener,
        }))
    }

    async fn publish(&self, channel: &str, payload: &str) -> RelayerResult<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| RelayerError::PubSub {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

struct PgSubscription {
    channel: String,
    listener: PgListener,
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn next_message(&mut self) -> RelayerResult<Option<ChannelMessage>> {
        // recv() re-establishes a dropped connection and re-issues LISTEN
        let notification = self.listener.recv().await.map_err(|e| RelayerError::PubSub {
            channel: self.channel.clone(),
            message: e.to_string(),
        })?;

        Ok(Some(ChannelMessage {
            channel: notification.channel().to_string(),
            payload: notification.payload().to_string(),
        }))
    }

    async fn close(mut self: Box<Self>) -> RelayerResult<()> {
        let channel = self.channel.clone();
        self.listener.unlisten(&channel).await?;
        debug!("UNLISTEN {}", channel);
        Ok(())
    }
}

/// Broadcast-backed transport that never leaves the process
pub struct MemoryTransport {
    channels: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl MemoryTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
    async fn subscribe(&self, channel: &str) -> RelayerResult<Box<dyn Subscription>> {
        Ok(Box::new(MemorySubscription {
            channel: channel.to_string(),
            rx: self.sender(channel).subscribe(),
        }))
    }

    async fn publish(&self, channel: &str, payload: &str) -> RelayerResult<()> {
        if self.sender(channel).send(payload.to_string()).is_err() {
            debug!("No subscribers on channel {}", channel);
        }
        Ok(())
    }
}

struct MemorySubscription {
    channel: String,
    rx: broadcast::Receiver<String>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> RelayerResult<Option<ChannelMessage>> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => {
                    return Ok(Some(ChannelMessage {
                        channel: self.channel.clone(),
                        payload,
                    }))
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Channel {} lagged, dropped {} messages", self.channel, skipped);
                }
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn close(self: Box<Self>) -> RelayerResult<()> {
        Ok(())
    }
}
