//! Topic and subscription naming.
//!
//! Names are derived deterministically so every process of one deployment
//! lands on the same topic. The subscription name only differs between
//! processes when a per-instance postfix is supplied; without one, processes
//! sharing a version attach to the same subscription and split its messages
//! between them instead of each receiving all of them.

use std::fmt;

use super::config::BootstrapConfig;

/// Externally visible names for one project instance's subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionIdentity {
    topic: String,
    subscription: String,
}

impl SubscriptionIdentity {
    /// Topic: `<project>-<env>`. Subscription: topic, then `-<version>` and
    /// `-<postfix>` when present.
    pub fn derive(
        project: &str,
        env: &str,
        version: Option<&str>,
        instance_postfix: Option<&str>,
    ) -> Self {
        let topic = sanitize(&format!("{project}-{env}"));

        let mut subscription = topic.clone();
        for part in [version, instance_postfix].into_iter().flatten() {
            subscription.push('-');
            subscription.push_str(&sanitize(part));
        }

        Self {
            topic,
            subscription,
        }
    }

    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self::derive(
            config.project.as_str(),
            &config.env,
            config.version.as_deref(),
            config.subscription_postfix.as_deref(),
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }
}

impl fmt::Display for SubscriptionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.subscription)
    }
}

/// Replace characters pub/sub services reject in resource names.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' | '+' | '%' => ch,
            _ => '-',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_ignores_version_and_postfix() {
        let a = SubscriptionIdentity::derive("docs", "production", Some("v1"), Some("pod-a"));
        let b = SubscriptionIdentity::derive("docs", "production", Some("v2"), None);
        assert_eq!(a.topic(), "docs-production");
        assert_eq!(a.topic(), b.topic());
    }

    #[test]
    fn subscription_appends_present_parts() {
        let bare = SubscriptionIdentity::derive("docs", "development", None, None);
        assert_eq!(bare.subscription(), "docs-development");

        let versioned = SubscriptionIdentity::derive("docs", "development", Some("v1"), None);
        assert_eq!(versioned.subscription(), "docs-development-v1");

        let full = SubscriptionIdentity::derive("docs", "development", Some("v1"), Some("pod-a"));
        assert_eq!(full.subscription(), "docs-development-v1-pod-a");

        let postfix_only = SubscriptionIdentity::derive("docs", "development", None, Some("pod-a"));
        assert_eq!(postfix_only.subscription(), "docs-development-pod-a");
    }

    #[test]
    fn instances_without_postfix_collide() {
        let first = SubscriptionIdentity::derive("docs", "production", Some("v1"), None);
        let second = SubscriptionIdentity::derive("docs", "production", Some("v1"), None);
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_characters_are_replaced() {
        let identity =
            SubscriptionIdentity::derive("my docs", "prod/eu", Some("1.2.0"), Some("pod:7"));
        assert_eq!(identity.topic(), "my-docs-prod-eu");
        assert_eq!(identity.subscription(), "my-docs-prod-eu-1.2.0-pod-7");
        assert_eq!(identity.to_string(), "my-docs-prod-eu/my-docs-prod-eu-1.2.0-pod-7");
    }
}
