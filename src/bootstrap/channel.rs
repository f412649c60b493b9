//! Broadcast transport boundary.
//!
//! The pub/sub service itself lives outside this crate; these traits describe
//! the slice of it the invalidation protocol needs: named subscriptions on a
//! topic, at-least-once delivery, and explicit acknowledgement.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Opaque options forwarded to the transport when connecting.
pub type ChannelOptions = Map<String, Value>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("failed to connect to event channel: {0}")]
    Connect(String),
    #[error("failed to create subscription `{subscription}` on topic `{topic}`: {reason}")]
    Subscribe {
        topic: String,
        subscription: String,
        reason: String,
    },
    #[error("failed to acknowledge message `{message_id}`: {reason}")]
    Ack { message_id: String, reason: String },
}

/// Builds an [`EventChannel`] from per-project options.
pub trait ChannelConnector: Send + Sync {
    fn connect(&self, options: &ChannelOptions) -> Result<Arc<dyn EventChannel>, ChannelError>;
}

/// A pub/sub service capable of creating named subscriptions.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Create (or attach to) `subscription` on `topic`.
    async fn create_subscription(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Box<dyn Subscription>, ChannelError>;
}

/// Stream of deliveries for one subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery; `None` once the subscription is closed.
    async fn next_delivery(&mut self) -> Option<Box<dyn Delivery>>;
}

/// A single delivered message awaiting acknowledgement.
#[async_trait]
pub trait Delivery: Send {
    fn message_id(&self) -> &str;

    fn payload(&self) -> &[u8];

    /// Signal successful processing; consumes the delivery.
    async fn ack(self: Box<Self>) -> Result<(), ChannelError>;
}
