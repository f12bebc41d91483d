//! Bridge from database change notifications to the in-process event bus.

use std::sync::Arc;

use acueducto_core::ChangeEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A notification as delivered by the database.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub channel: String,
    pub payload: Option<String>,
}

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Failed to connect to database: {0}")]
    Connect(String),

    #[error("Failed to listen on channel {channel}: {message}")]
    Subscribe { channel: String, message: String },

    #[error("Notification stream error: {0}")]
    Stream(String),
}

pub type RawEventStream = BoxStream<'static, Result<RawEvent, ListenerError>>;

/// Source of change notifications for a named channel.
#[async_trait]
pub trait ChangeListener: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<RawEventStream, ListenerError>;
}

/// Republishes notifications from one channel to any number of
/// subscribers.
///
/// Subscribers only see events published after they attach. Each one has
/// a bounded buffer; a subscriber that falls behind loses the oldest
/// events instead of holding up the others.
pub struct NotificationBridge {
    channel: String,
    tx: broadcast::Sender<ChangeEvent>,
}

impl NotificationBridge {
    pub fn new(channel: impl Into<String>, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            channel: channel.into(),
            tx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Sends an event to current subscribers; returns how many there were.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        // Ignore send errors (no subscribers)
        self.tx.send(event).unwrap_or(0)
    }

    /// Runs [`NotificationBridge::run`] on a background task.
    pub fn spawn(self: &Arc<Self>, listener: Arc<dyn ChangeListener>) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move { bridge.run(listener.as_ref()).await })
    }

    /// Listens until the notification stream ends.
    ///
    /// Never fails: if the listener cannot be set up the error is logged and
    /// the feed simply stays quiet.
    pub async fn run(&self, listener: &dyn ChangeListener) {
        let mut notifications = match listener.subscribe(&self.channel).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    channel = %self.channel,
                    error = %e,
                    "Error setting up change notifications, live feed disabled"
                );
                return;
            }
        };

        tracing::info!(channel = %self.channel, "Listening for change notifications");

        while let Some(notification) = notifications.next().await {
            match notification {
                Ok(raw) if raw.channel == self.channel => {
                    let event = ChangeEvent::consumo_update(raw.payload.as_deref());
                    let delivered = self.publish(event);
                    tracing::debug!(delivered, "Published consumption change");
                }
                Ok(raw) => {
                    tracing::debug!(channel = %raw.channel, "Ignoring notification on other channel");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Change notification error");
                }
            }
        }

        tracing::warn!(channel = %self.channel, "Change notification stream ended");
    }
}
