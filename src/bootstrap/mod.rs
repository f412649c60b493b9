//! Bootstrap document cache.
//!
//! Keeps one revision cache per project, fills it cache-aside through an
//! injected fetcher with single-flight deduplication, and clears it whenever a
//! deploy broadcasts an invalidation on the project's topic:
//!
//! ```text
//! render ─► DocumentRenderer ─► CacheRegistry ─► RevisionResolver ─► ProjectCache
//!                                                       │ miss
//!                                                       ▼
//!                                               RevisionFetcher
//!
//! EventChannel ─► InvalidationSubscriber ─► clear ProjectCache ─► ack ─► prewarm
//! ```
//!
//! There is no time-based expiry: entries live until the next invalidation.

mod channel;
mod config;
mod events;
mod fetcher;
mod keys;
mod lock;
mod memory;
mod registry;
mod renderer;
mod resolver;
mod store;
mod subscriber;
mod subscription;
mod template;

pub use channel::{
    ChannelConnector, ChannelError, ChannelOptions, Delivery, EventChannel, Subscription,
};
pub use config::{BootstrapConfig, ConfigError, DEFAULT_ENV, ProjectOptions};
pub use events::InvalidationMessage;
pub use fetcher::{BoxError, RevisionFetcher};
pub use keys::{ACTIVE_KEY, CacheKey, ProjectId, RevisionData};
pub use memory::{ACK_LOG_CAPACITY, MemoryBroker};
pub use registry::{CacheRegistry, LookupError, ProjectHandle};
pub use renderer::{DocumentError, DocumentRenderer, REVISION_KEY_FIELD, RenderedOutput};
pub use resolver::{FetchError, RevisionResolver};
pub use store::{CacheEntry, Generation, Lookup, ProjectCache, SharedFetch};
pub use subscriber::{
    InvalidationSubscriber, PrewarmOutcome, SubscriptionSetupError, SubscriptionState,
};
pub use subscription::SubscriptionIdentity;
pub use template::{CompiledTemplate, InterpolationEngine, RenderError, TemplateEngine};

/// Metric names emitted by this module, for describing and asserting.
pub mod metric_names {
    pub use super::renderer::METRIC_RENDER_FAILED as RENDER_FAILED;
    pub use super::resolver::{
        METRIC_CACHE_HIT as CACHE_HIT, METRIC_CACHE_JOIN as CACHE_JOIN,
        METRIC_CACHE_MISS as CACHE_MISS, METRIC_FETCH_FAILED as FETCH_FAILED,
        METRIC_FETCH_MS as FETCH_MS,
    };
    pub use super::subscriber::{
        METRIC_ACK_FAILED as ACK_FAILED, METRIC_INVALIDATION as INVALIDATION,
        METRIC_PREWARM_FAILED as PREWARM_FAILED,
        METRIC_SUBSCRIPTION_SETUP_FAILED as SUBSCRIPTION_SETUP_FAILED,
    };
}
