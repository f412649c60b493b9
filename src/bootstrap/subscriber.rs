//! Subscription-driven invalidation.
//!
//! One [`InvalidationSubscriber`] exists per project instance. It starts the
//! subscription's listener task; every delivered message clears the project's
//! cache, is acknowledged, and schedules a background prewarm of the announced
//! revision. Prewarm outcomes are logged, counted, and broadcast to anyone
//! holding a receiver from [`InvalidationSubscriber::prewarm_outcomes`].

use std::sync::{Arc, RwLock};

use metrics::counter;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use super::channel::{ChannelConnector, ChannelError, ChannelOptions, Delivery, Subscription};
use super::events::InvalidationMessage;
use super::keys::{CacheKey, ProjectId};
use super::lock::{rw_read, rw_write};
use super::resolver::{FetchError, RevisionResolver};
use super::subscription::SubscriptionIdentity;

const SOURCE: &str = "bootstrap::subscriber";
const PREWARM_OUTCOME_CAPACITY: usize = 64;

pub const METRIC_INVALIDATION: &str = "bootdoc_invalidation_total";
pub const METRIC_PREWARM_FAILED: &str = "bootdoc_prewarm_failed_total";
pub const METRIC_SUBSCRIPTION_SETUP_FAILED: &str = "bootdoc_subscription_setup_failed_total";
pub const METRIC_ACK_FAILED: &str = "bootdoc_ack_failed_total";

/// The subscription could not be established; invalidations are disabled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("subscription `{identity}` could not be established: {source}")]
pub struct SubscriptionSetupError {
    pub identity: SubscriptionIdentity,
    #[source]
    pub source: ChannelError,
}

/// Lifecycle of a project's subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Setup has not finished yet.
    Pending,
    /// Listening for invalidations.
    Active,
    /// Setup failed; the cache will never be invalidated by broadcast.
    Disabled { reason: String },
    /// The transport closed the subscription.
    Closed,
}

/// Result of one background prewarm.
#[derive(Debug, Clone)]
pub struct PrewarmOutcome {
    pub project: ProjectId,
    pub key: CacheKey,
    pub message_id: String,
    pub result: Result<(), FetchError>,
}

pub struct InvalidationSubscriber {
    identity: SubscriptionIdentity,
    resolver: RevisionResolver,
    state: RwLock<SubscriptionState>,
    prewarm_tx: broadcast::Sender<PrewarmOutcome>,
}

impl InvalidationSubscriber {
    pub fn new(identity: SubscriptionIdentity, resolver: RevisionResolver) -> Self {
        let (prewarm_tx, _) = broadcast::channel(PREWARM_OUTCOME_CAPACITY);
        Self {
            identity,
            resolver,
            state: RwLock::new(SubscriptionState::Pending),
            prewarm_tx,
        }
    }

    pub fn identity(&self) -> &SubscriptionIdentity {
        &self.identity
    }

    pub fn state(&self) -> SubscriptionState {
        rw_read(&self.state, SOURCE, "state").clone()
    }

    /// Subscribe to prewarm results published after this call.
    pub fn prewarm_outcomes(&self) -> broadcast::Receiver<PrewarmOutcome> {
        self.prewarm_tx.subscribe()
    }

    /// Connect to the channel, create the subscription, and start listening.
    ///
    /// Failure is reported and leaves the subscriber `Disabled`; the project
    /// keeps serving from its cache without broadcast invalidation.
    pub async fn establish(
        self: &Arc<Self>,
        connector: &dyn ChannelConnector,
        options: &ChannelOptions,
    ) -> Result<(), SubscriptionSetupError> {
        let subscription = match self.open(connector, options).await {
            Ok(subscription) => subscription,
            Err(source) => {
                let err = SubscriptionSetupError {
                    identity: self.identity.clone(),
                    source,
                };
                counter!(
                    METRIC_SUBSCRIPTION_SETUP_FAILED,
                    "project" => self.project().to_string()
                )
                .increment(1);
                error!(
                    project = %self.project(),
                    topic = self.identity.topic(),
                    subscription = self.identity.subscription(),
                    error = %err,
                    hint = "cache will not be invalidated by deploys until restart",
                    "Invalidation subscription setup failed"
                );
                *rw_write(&self.state, SOURCE, "establish.disabled") = SubscriptionState::Disabled {
                    reason: err.source.to_string(),
                };
                return Err(err);
            }
        };

        *rw_write(&self.state, SOURCE, "establish.active") = SubscriptionState::Active;
        info!(
            project = %self.project(),
            topic = self.identity.topic(),
            subscription = self.identity.subscription(),
            "Invalidation subscription established"
        );

        let span = info_span!(
            "invalidation_listener",
            project = %self.project(),
            subscription = self.identity.subscription()
        );
        // The listener keeps the subscriber alive for as long as the subscription is open.
        tokio::spawn(Arc::clone(self).listen(subscription).instrument(span));
        Ok(())
    }

    async fn open(
        &self,
        connector: &dyn ChannelConnector,
        options: &ChannelOptions,
    ) -> Result<Box<dyn Subscription>, ChannelError> {
        let channel = connector.connect(options)?;
        channel
            .create_subscription(self.identity.topic(), self.identity.subscription())
            .await
    }

    async fn listen(self: Arc<Self>, mut subscription: Box<dyn Subscription>) {
        while let Some(delivery) = subscription.next_delivery().await {
            self.handle(delivery).await;
        }
        *rw_write(&self.state, SOURCE, "listen.closed") = SubscriptionState::Closed;
        warn!(project = %self.project(), "Invalidation subscription closed");
    }

    /// Process one delivery: clear, acknowledge, then prewarm in the background.
    ///
    /// Safe to call repeatedly for a redelivered message. Returns the handle of
    /// the spawned prewarm task.
    pub async fn handle(&self, delivery: Box<dyn Delivery>) -> JoinHandle<()> {
        let message_id = delivery.message_id().to_string();
        let message = match InvalidationMessage::parse(delivery.payload()) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    project = %self.project(),
                    message_id = %message_id,
                    error = %err,
                    "Unparsable invalidation payload, clearing cache anyway"
                );
                InvalidationMessage::default()
            }
        };
        let key = message.prewarm_key();

        let cleared = self.resolver.cache().clear();
        counter!(METRIC_INVALIDATION, "project" => self.project().to_string()).increment(1);
        info!(
            project = %self.project(),
            message_id = %message_id,
            cleared,
            prewarm_key = %key,
            "Revision cache invalidated"
        );

        if let Err(err) = delivery.ack().await {
            counter!(METRIC_ACK_FAILED, "project" => self.project().to_string()).increment(1);
            warn!(
                project = %self.project(),
                message_id = %message_id,
                error = %err,
                "Invalidation acknowledgement failed; message may be redelivered"
            );
        }

        self.spawn_prewarm(key, message_id)
    }

    /// Re-resolve `key` in a background task and report the outcome.
    pub fn spawn_prewarm(&self, key: CacheKey, message_id: String) -> JoinHandle<()> {
        let resolver = self.resolver.clone();
        let outcomes = self.prewarm_tx.clone();
        tokio::spawn(async move {
            let result = resolver.resolve_key(&key).await.map(|_| ());
            match &result {
                Ok(()) => info!(
                    project = %resolver.project(),
                    cache_key = %key,
                    message_id = %message_id,
                    "Revision prewarmed"
                ),
                Err(err) => {
                    counter!(
                        METRIC_PREWARM_FAILED,
                        "project" => resolver.project().to_string()
                    )
                    .increment(1);
                    warn!(
                        project = %resolver.project(),
                        cache_key = %key,
                        message_id = %message_id,
                        error = %err,
                        "Revision prewarm failed; next request will fetch"
                    );
                }
            }
            // No receivers is fine; outcomes are advisory.
            let _ = outcomes.send(PrewarmOutcome {
                project: resolver.project().clone(),
                key,
                message_id,
                result,
            });
        })
    }

    fn project(&self) -> &ProjectId {
        self.resolver.project()
    }
}
