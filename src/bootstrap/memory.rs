//! In-process event channel.
//!
//! Each named subscription owns one queue. Subscribers attaching with the same
//! name share that queue and compete for its messages, while distinct names
//! on a topic each receive every published message. Deliveries dropped
//! without an ack are queued again.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::debug;
use uuid::Uuid;

use super::channel::{
    ChannelConnector, ChannelError, ChannelOptions, Delivery, EventChannel, Subscription,
};
use super::lock::mutex_lock;

const SOURCE: &str = "bootstrap::memory";
/// Most recent acknowledgements retained by [`MemoryBroker::acked`].
pub const ACK_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Envelope {
    id: String,
    payload: Bytes,
}

#[derive(Clone)]
struct SubscriptionQueue {
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<Envelope>>>,
}

impl SubscriptionQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
        }
    }
}

#[derive(Default)]
struct BrokerInner {
    topics: DashMap<String, HashMap<String, SubscriptionQueue>>,
    acked: Mutex<VecDeque<String>>,
    fail_connect: AtomicBool,
    fail_subscriptions: AtomicBool,
}

/// In-memory pub/sub broker usable as both connector and channel.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `payload` to every subscription on `topic`, returning the message id.
    ///
    /// Messages published to a topic without subscriptions are dropped.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> String {
        let envelope = Envelope {
            id: Uuid::new_v4().to_string(),
            payload: payload.into(),
        };

        let mut delivered = 0usize;
        if let Some(subscriptions) = self.inner.topics.get(topic) {
            for queue in subscriptions.values() {
                if queue.sender.send(envelope.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        debug!(
            topic,
            message_id = %envelope.id,
            delivered,
            "Memory broker message published"
        );
        envelope.id
    }

    /// Serialize `value` as JSON and publish it.
    pub fn publish_json(&self, topic: &str, value: &serde_json::Value) -> String {
        self.publish(topic, value.to_string())
    }

    /// Ids of the most recent acknowledged messages in ack order, across all
    /// topics. At most [`ACK_LOG_CAPACITY`] ids are kept.
    pub fn acked(&self) -> Vec<String> {
        mutex_lock(&self.inner.acked, SOURCE, "acked")
            .iter()
            .cloned()
            .collect()
    }

    /// Names of subscriptions created on `topic`, sorted.
    pub fn subscriptions(&self, topic: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .topics
            .get(topic)
            .map(|subscriptions| subscriptions.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Make subsequent `connect` calls fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `create_subscription` calls fail.
    pub fn set_fail_subscriptions(&self, fail: bool) {
        self.inner.fail_subscriptions.store(fail, Ordering::SeqCst);
    }
}

impl ChannelConnector for MemoryBroker {
    fn connect(&self, _options: &ChannelOptions) -> Result<Arc<dyn EventChannel>, ChannelError> {
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(ChannelError::Connect("memory broker refused connection".into()));
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl EventChannel for MemoryBroker {
    async fn create_subscription(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Box<dyn Subscription>, ChannelError> {
        if self.inner.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(ChannelError::Subscribe {
                topic: topic.to_string(),
                subscription: subscription.to_string(),
                reason: "memory broker refused subscription".into(),
            });
        }

        let queue = self
            .inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .entry(subscription.to_string())
            .or_insert_with(SubscriptionQueue::new)
            .clone();

        Ok(Box::new(MemorySubscription {
            broker: Arc::clone(&self.inner),
            queue,
        }))
    }
}

struct MemorySubscription {
    broker: Arc<BrokerInner>,
    queue: SubscriptionQueue,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Option<Box<dyn Delivery>> {
        let envelope = self.queue.receiver.lock().await.recv().await?;
        Some(Box::new(MemoryDelivery {
            broker: Arc::clone(&self.broker),
            requeue: self.queue.sender.clone(),
            envelope: Some(envelope),
        }))
    }
}

struct MemoryDelivery {
    broker: Arc<BrokerInner>,
    requeue: mpsc::UnboundedSender<Envelope>,
    envelope: Option<Envelope>,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn message_id(&self) -> &str {
        self.envelope.as_ref().map_or("", |envelope| envelope.id.as_str())
    }

    fn payload(&self) -> &[u8] {
        self.envelope
            .as_ref()
            .map_or(&[][..], |envelope| envelope.payload.as_ref())
    }

    async fn ack(self: Box<Self>) -> Result<(), ChannelError> {
        let mut delivery = self;
        if let Some(envelope) = delivery.envelope.take() {
            let mut acked = mutex_lock(&delivery.broker.acked, SOURCE, "ack");
            if acked.len() == ACK_LOG_CAPACITY {
                acked.pop_front();
            }
            acked.push_back(envelope.id);
        }
        Ok(())
    }
}

impl Drop for MemoryDelivery {
    fn drop(&mut self) {
        if let Some(envelope) = self.envelope.take() {
            debug!(message_id = %envelope.id, "Unacknowledged delivery queued for redelivery");
            let _ = self.requeue.send(envelope);
        }
    }
}
