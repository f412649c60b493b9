//! Process-wide project registry.
//!
//! Construct one [`CacheRegistry`] at startup and share it (it is cheap to
//! clone). Each project gets exactly one cache, resolver, and invalidation
//! subscriber, created by the first [`CacheRegistry::get_or_create`] call for
//! that project and kept until the process exits.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, instrument};

use super::channel::ChannelConnector;
use super::config::BootstrapConfig;
use super::keys::{ProjectId, RevisionData};
use super::resolver::{FetchError, RevisionResolver};
use super::store::ProjectCache;
use super::subscriber::{InvalidationSubscriber, SubscriptionState};
use super::subscription::SubscriptionIdentity;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("project `{0}` has not been set up")]
    UnknownProject(ProjectId),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Everything the registry holds for one project.
pub struct ProjectHandle {
    config: BootstrapConfig,
    cache: Arc<ProjectCache>,
    resolver: RevisionResolver,
    subscriber: Arc<InvalidationSubscriber>,
}

impl ProjectHandle {
    fn new(config: BootstrapConfig) -> Self {
        let cache = Arc::new(ProjectCache::new());
        let resolver = RevisionResolver::new(
            config.project.clone(),
            Arc::clone(&cache),
            Arc::clone(&config.find_revision),
            config.fetch_timeout,
        );
        let identity = SubscriptionIdentity::from_config(&config);
        let subscriber = Arc::new(InvalidationSubscriber::new(identity, resolver.clone()));

        Self {
            config,
            cache,
            resolver,
            subscriber,
        }
    }

    pub fn project(&self) -> &ProjectId {
        &self.config.project
    }

    /// The configuration supplied by the call that created this project.
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ProjectCache> {
        &self.cache
    }

    pub fn resolver(&self) -> &RevisionResolver {
        &self.resolver
    }

    pub fn subscriber(&self) -> &Arc<InvalidationSubscriber> {
        &self.subscriber
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscriber.state()
    }
}

/// Maps project identifiers to their cache state.
#[derive(Clone)]
pub struct CacheRegistry {
    projects: Arc<DashMap<ProjectId, Arc<ProjectHandle>>>,
    connector: Arc<dyn ChannelConnector>,
}

impl CacheRegistry {
    pub fn new(connector: Arc<dyn ChannelConnector>) -> Self {
        Self {
            projects: Arc::new(DashMap::new()),
            connector,
        }
    }

    /// Return the handle for `config.project`, creating it on first use.
    ///
    /// First caller wins: once a project exists, `config` from later calls is
    /// ignored entirely, including its fetcher and subscription options. The
    /// creating call also sets up the invalidation subscription; a setup
    /// failure is logged and the handle is returned regardless. Setup keeps
    /// running to completion even if this future is dropped.
    #[instrument(skip_all, fields(project = %config.project))]
    pub async fn get_or_create(&self, config: BootstrapConfig) -> Arc<ProjectHandle> {
        let handle = match self.projects.entry(config.project.clone()) {
            Entry::Occupied(existing) => {
                debug!("Project already registered; ignoring supplied config");
                return Arc::clone(existing.get());
            }
            Entry::Vacant(vacant) => {
                let handle = Arc::new(ProjectHandle::new(config));
                vacant.insert(Arc::clone(&handle));
                handle
            }
        };

        info!(
            env = %handle.config.env,
            version = handle.config.version.as_deref().unwrap_or(""),
            subscription = handle.subscriber.identity().subscription(),
            "Project registered"
        );

        // Setup runs in its own task so a caller dropped mid-await cannot leave
        // the project stuck in `Pending`. Failure is already reported by the
        // subscriber and must not abort setup.
        let subscriber = Arc::clone(&handle.subscriber);
        let connector = Arc::clone(&self.connector);
        let options = handle.config.pubsub_options.clone();
        let setup = tokio::spawn(
            async move {
                let _ = subscriber.establish(connector.as_ref(), &options).await;
            }
            .in_current_span(),
        );
        if let Err(err) = setup.await {
            error!(error = %err, "Invalidation subscription setup task failed");
        }

        handle
    }

    /// Look up an existing project without creating it.
    pub fn get(&self, project: &ProjectId) -> Option<Arc<ProjectHandle>> {
        self.projects
            .get(project)
            .map(|handle| Arc::clone(handle.value()))
    }

    /// Resolve a revision for a registered project.
    pub async fn resolve(
        &self,
        project: &ProjectId,
        revision_key: Option<&str>,
    ) -> Result<RevisionData, LookupError> {
        let handle = self
            .get(project)
            .ok_or_else(|| LookupError::UnknownProject(project.clone()))?;
        Ok(handle.resolver.resolve(revision_key).await?)
    }

    /// Registered project ids, sorted.
    pub fn projects(&self) -> Vec<ProjectId> {
        let mut ids: Vec<ProjectId> = self.projects.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::super::channel::{ChannelError, ChannelOptions, EventChannel, Subscription};
    use super::super::config::ProjectOptions;
    use super::super::fetcher::{BoxError, RevisionFetcher};
    use super::super::memory::MemoryBroker;
    use super::*;

    fn config(options: ProjectOptions, body: &'static str) -> BootstrapConfig {
        let fetcher: Arc<dyn RevisionFetcher> =
            Arc::new(move |_project: ProjectId, _key: Option<String>| async move {
                Ok::<_, BoxError>(RevisionData::from(body))
            });
        BootstrapConfig::new(options, fetcher).expect("valid config")
    }

    #[tokio::test]
    async fn creation_is_idempotent_and_first_caller_wins() {
        let broker = MemoryBroker::new();
        let registry = CacheRegistry::new(Arc::new(broker.clone()));

        let first = registry
            .get_or_create(config(ProjectOptions::for_project("docs").env("prod"), "first"))
            .await;
        let second = registry
            .get_or_create(config(ProjectOptions::for_project("docs").env("staging"), "second"))
            .await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().env, "prod");
        assert_eq!(registry.len(), 1);
        assert_eq!(broker.subscriptions("docs-prod"), vec!["docs-prod"]);
        assert!(broker.subscriptions("docs-staging").is_empty());

        let value = registry.resolve(&"docs".into(), None).await.expect("resolves");
        assert_eq!(value.as_str(), "first");
    }

    #[tokio::test]
    async fn unknown_project_is_reported() {
        let registry = CacheRegistry::new(Arc::new(MemoryBroker::new()));
        let err = registry
            .resolve(&"missing".into(), None)
            .await
            .expect_err("not registered");
        assert_eq!(err, LookupError::UnknownProject("missing".into()));
        assert!(registry.get(&"missing".into()).is_none());
    }

    #[tokio::test]
    async fn concurrent_first_calls_create_one_project() {
        let broker = MemoryBroker::new();
        let registry = CacheRegistry::new(Arc::new(broker.clone()));
        let created = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let created = Arc::clone(&created);
                tokio::spawn(async move {
                    let handle = registry
                        .get_or_create(config(ProjectOptions::for_project("docs"), "x"))
                        .await;
                    created.fetch_add(1, Ordering::SeqCst);
                    handle
                })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.expect("task joins"));
        }
        assert_eq!(created.load(Ordering::SeqCst), 4);
        assert!(handles.iter().all(|handle| Arc::ptr_eq(handle, &handles[0])));
        assert_eq!(registry.projects(), vec![ProjectId::from("docs")]);
    }

    /// Connector whose subscriptions take a while to be created.
    struct SlowConnector {
        broker: MemoryBroker,
    }

    struct SlowChannel {
        broker: MemoryBroker,
    }

    impl ChannelConnector for SlowConnector {
        fn connect(&self, _options: &ChannelOptions) -> Result<Arc<dyn EventChannel>, ChannelError> {
            Ok(Arc::new(SlowChannel {
                broker: self.broker.clone(),
            }))
        }
    }

    #[async_trait]
    impl EventChannel for SlowChannel {
        async fn create_subscription(
            &self,
            topic: &str,
            subscription: &str,
        ) -> Result<Box<dyn Subscription>, ChannelError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.broker.create_subscription(topic, subscription).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_first_call_still_establishes_subscription() {
        let broker = MemoryBroker::new();
        let registry = CacheRegistry::new(Arc::new(SlowConnector {
            broker: broker.clone(),
        }));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            registry.get_or_create(config(ProjectOptions::for_project("docs"), "x")),
        )
        .await;
        assert!(abandoned.is_err());

        let handle = registry
            .get_or_create(config(ProjectOptions::for_project("docs"), "x"))
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(handle.subscription_state(), SubscriptionState::Active);
        assert_eq!(broker.subscriptions("docs-development"), vec!["docs-development"]);
    }

    #[tokio::test]
    async fn subscription_failure_is_not_fatal() {
        let broker = MemoryBroker::new();
        broker.set_fail_subscriptions(true);
        let registry = CacheRegistry::new(Arc::new(broker));

        let handle = registry
            .get_or_create(config(ProjectOptions::for_project("docs"), "<html></html>"))
            .await;

        assert!(matches!(
            handle.subscription_state(),
            SubscriptionState::Disabled { .. }
        ));
        let value = handle.resolver().resolve(None).await.expect("resolves");
        assert_eq!(value.as_str(), "<html></html>");
    }
}
