//! Per-project setup options.
//!
//! [`ProjectOptions`] is the raw, deserializable form (file, env, or code);
//! [`BootstrapConfig`] is the validated form paired with the revision fetcher.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::channel::ChannelOptions;
use super::fetcher::RevisionFetcher;
use super::keys::ProjectId;

pub const DEFAULT_ENV: &str = "development";
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required option `project`")]
    MissingProject,
    #[error("invalid option `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Raw setup options as supplied by the host.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ProjectOptions {
    pub project: Option<String>,
    pub env: Option<String>,
    pub version: Option<String>,
    #[serde(alias = "subscriptionPostfix")]
    pub subscription_postfix: Option<String>,
    #[serde(alias = "pubsubOptions")]
    pub pubsub_options: ChannelOptions,
    pub fetch_timeout_ms: Option<u64>,
}

impl ProjectOptions {
    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            ..Default::default()
        }
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn subscription_postfix(mut self, postfix: impl Into<String>) -> Self {
        self.subscription_postfix = Some(postfix.into());
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

/// Validated setup for one project.
#[derive(Clone)]
pub struct BootstrapConfig {
    pub project: ProjectId,
    pub env: String,
    pub version: Option<String>,
    pub subscription_postfix: Option<String>,
    pub pubsub_options: ChannelOptions,
    pub fetch_timeout: Duration,
    pub find_revision: Arc<dyn RevisionFetcher>,
}

impl fmt::Debug for BootstrapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapConfig")
            .field("project", &self.project)
            .field("env", &self.env)
            .field("version", &self.version)
            .field("subscription_postfix", &self.subscription_postfix)
            .field("pubsub_options", &self.pubsub_options)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl BootstrapConfig {
    /// Validate `options`; a missing or blank `project` is rejected.
    pub fn new(
        options: ProjectOptions,
        find_revision: Arc<dyn RevisionFetcher>,
    ) -> Result<Self, ConfigError> {
        let ProjectOptions {
            project,
            env,
            version,
            subscription_postfix,
            pubsub_options,
            fetch_timeout_ms,
        } = options;

        let project = non_blank(project).ok_or(ConfigError::MissingProject)?;
        let env = non_blank(env).unwrap_or_else(|| DEFAULT_ENV.to_string());

        let timeout_ms = fetch_timeout_ms.unwrap_or(DEFAULT_FETCH_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "fetch_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            project: ProjectId::new(project),
            env,
            version: non_blank(version),
            subscription_postfix: non_blank(subscription_postfix),
            pubsub_options,
            fetch_timeout: Duration::from_millis(timeout_ms),
            find_revision,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
