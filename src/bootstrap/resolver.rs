//! Cache-aside revision resolution with single-flight deduplication.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::fetcher::RevisionFetcher;
use super::keys::{CacheKey, ProjectId, RevisionData};
use super::store::{Lookup, ProjectCache};

pub const METRIC_CACHE_HIT: &str = "bootdoc_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "bootdoc_cache_miss_total";
pub const METRIC_CACHE_JOIN: &str = "bootdoc_cache_join_total";
pub const METRIC_FETCH_MS: &str = "bootdoc_fetch_ms";
pub const METRIC_FETCH_FAILED: &str = "bootdoc_fetch_failed_total";

/// Failure to obtain revision data from the fetcher.
///
/// Cloneable so that every caller joined on one fetch receives the same error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("revision lookup for `{project}` key `{key}` failed: {message}")]
    Backend {
        project: String,
        key: String,
        message: String,
    },
    #[error("revision lookup for `{project}` key `{key}` timed out after {timeout_ms} ms")]
    TimedOut {
        project: String,
        key: String,
        timeout_ms: u64,
    },
}

/// Resolves revisions for one project through its [`ProjectCache`].
#[derive(Clone)]
pub struct RevisionResolver {
    project: ProjectId,
    cache: Arc<ProjectCache>,
    fetcher: Arc<dyn RevisionFetcher>,
    fetch_timeout: Duration,
}

impl RevisionResolver {
    pub fn new(
        project: ProjectId,
        cache: Arc<ProjectCache>,
        fetcher: Arc<dyn RevisionFetcher>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            project,
            cache,
            fetcher,
            fetch_timeout,
        }
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    /// Resolve `revision_key` (or the active revision) to its data.
    ///
    /// Cache hits return without suspending. Concurrent misses for the same
    /// key share a single fetcher call and all observe its outcome. Failures
    /// are never cached.
    #[instrument(skip(self), fields(project = %self.project))]
    pub async fn resolve(&self, revision_key: Option<&str>) -> Result<RevisionData, FetchError> {
        let key = CacheKey::from_revision(revision_key);
        self.resolve_key(&key).await
    }

    /// Resolve an already-normalized cache key.
    pub async fn resolve_key(&self, key: &CacheKey) -> Result<RevisionData, FetchError> {
        let lookup = self
            .cache
            .lookup_or_register(key, |flight_id, generation| {
                let cache = Arc::clone(&self.cache);
                let fetcher = Arc::clone(&self.fetcher);
                let project = self.project.clone();
                let key = key.clone();
                let timeout = self.fetch_timeout;
                async move {
                    let outcome = fetch_once(fetcher.as_ref(), &project, &key, timeout).await;
                    let stored = cache.complete(&key, flight_id, generation, &outcome);
                    if outcome.is_ok() && !stored {
                        debug!(
                            project = %project,
                            cache_key = %key,
                            "Fetched revision discarded: cache cleared while in flight"
                        );
                    }
                    outcome
                }
                .boxed()
                .shared()
            });

        match lookup {
            Lookup::Hit(value) => {
                counter!(METRIC_CACHE_HIT, "project" => self.project.to_string()).increment(1);
                debug!(cache_key = %key, "Revision cache hit");
                Ok(value)
            }
            Lookup::Joined(flight) => {
                counter!(METRIC_CACHE_JOIN, "project" => self.project.to_string()).increment(1);
                debug!(cache_key = %key, "Joined in-flight revision fetch");
                flight.await
            }
            Lookup::Started(flight) => {
                counter!(METRIC_CACHE_MISS, "project" => self.project.to_string()).increment(1);
                debug!(cache_key = %key, "Revision cache miss, fetching");
                flight.await
            }
        }
    }

    /// The cache this resolver reads and populates.
    pub fn cache(&self) -> &Arc<ProjectCache> {
        &self.cache
    }
}

async fn fetch_once(
    fetcher: &dyn RevisionFetcher,
    project: &ProjectId,
    key: &CacheKey,
    timeout: Duration,
) -> Result<RevisionData, FetchError> {
    let started_at = Instant::now();
    let result = tokio::time::timeout(timeout, fetcher.find_revision(project, key.revision())).await;
    histogram!(METRIC_FETCH_MS, "project" => project.to_string())
        .record(started_at.elapsed().as_secs_f64() * 1000.0);

    let outcome = match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(FetchError::Backend {
            project: project.to_string(),
            key: key.to_string(),
            message: err.to_string(),
        }),
        Err(_elapsed) => Err(FetchError::TimedOut {
            project: project.to_string(),
            key: key.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    };

    if let Err(err) = &outcome {
        counter!(METRIC_FETCH_FAILED, "project" => project.to_string()).increment(1);
        warn!(error = %err, "Revision fetch failed");
    }
    outcome
}
