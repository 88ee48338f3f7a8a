//! Outbound message publishing
//!
//! Publishing is fire-and-forget: a successful `publish` only means the
//! message was handed to the transport queue, not that it was delivered.
//! `try_publish` never waits; callers holding a channel lock use it for
//! notices that may be dropped when the transport falls behind.

use crate::error::{CoordinatorError, Result};
use crate::metrics::MetricsCollector;
use crate::types::OutboundMessage;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Trait for publishing chat messages to the transport
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<()>;

    /// Enqueue without waiting for room in the transport queue
    fn try_publish(&self, message: OutboundMessage) -> Result<()>;
}

/// Publisher backed by a bounded tokio channel drained by the transport
#[derive(Clone)]
pub struct ChannelMessagePublisher {
    sender: mpsc::Sender<OutboundMessage>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ChannelMessagePublisher {
    /// Create a publisher and the receiving end the transport drains
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (
            Self {
                sender,
                metrics: None,
            },
            receiver,
        )
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether the transport stopped draining the queue
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn record_published(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.service().messages_published_total.inc();
        }
    }

    fn record_dropped(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.service().messages_dropped_total.inc();
        }
    }
}

#[async_trait]
impl MessagePublisher for ChannelMessagePublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        debug!(
            "Publishing {:?} message to channel {}",
            message.format, message.channel_id
        );

        match self.sender.send(message).await {
            Ok(()) => {
                self.record_published();
                Ok(())
            }
            Err(e) => {
                self.record_dropped();
                Err(CoordinatorError::PublishFailed {
                    reason: format!(
                        "transport closed, dropped message for {}",
                        e.0.channel_id
                    ),
                }
                .into())
            }
        }
    }

    fn try_publish(&self, message: OutboundMessage) -> Result<()> {
        match self.sender.try_send(message) {
            Ok(()) => {
                self.record_published();
                Ok(())
            }
            Err(e) => {
                self.record_dropped();
                let reason = match e {
                    TrySendError::Full(message) => {
                        format!("transport queue full, dropped message for {}", message.channel_id)
                    }
                    TrySendError::Closed(message) => {
                        format!("transport closed, dropped message for {}", message.channel_id)
                    }
                };
                Err(CoordinatorError::PublishFailed { reason }.into())
            }
        }
    }
}

/// Mock publisher that captures messages for testing
#[derive(Debug, Default)]
pub struct MockMessagePublisher {
    published: std::sync::Mutex<Vec<OutboundMessage>>,
}

impl MockMessagePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published messages (for testing)
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Messages sent to one channel, in publish order
    pub fn messages_for(&self, channel_id: &str) -> Vec<OutboundMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.channel_id == channel_id)
            .collect()
    }

    pub fn texts_for(&self, channel_id: &str) -> Vec<String> {
        self.messages_for(channel_id)
            .into_iter()
            .map(|m| m.text)
            .collect()
    }

    /// Clear published messages (for testing)
    pub fn clear(&self) {
        if let Ok(mut messages) = self.published.lock() {
            messages.clear();
        }
    }
}

#[async_trait]
impl MessagePublisher for MockMessagePublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        self.try_publish(message)
    }

    fn try_publish(&self, message: OutboundMessage) -> Result<()> {
        if let Ok(mut messages) = self.published.lock() {
            messages.push(message);
        }
        Ok(())
    }
}
