//! Bootstrap document rendering.

use std::sync::Arc;

use metrics::counter;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{instrument, warn};

use super::keys::{CacheKey, ProjectId};
use super::registry::{CacheRegistry, LookupError};
use super::resolver::FetchError;
use super::template::{RenderError, TemplateEngine};

/// Field injected into the template data naming the revision that served it.
pub const REVISION_KEY_FIELD: &str = "revisionKey";

pub const METRIC_RENDER_FAILED: &str = "bootdoc_render_failed_total";

/// Why a document could not be produced. Fetch and render failures stay distinct.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("project `{0}` has not been set up")]
    UnknownProject(ProjectId),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl From<LookupError> for DocumentError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::UnknownProject(project) => Self::UnknownProject(project),
            LookupError::Fetch(err) => Self::Fetch(err),
        }
    }
}

/// A rendered document and the cache slot it was rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedOutput {
    pub body: String,
    pub cache_key: CacheKey,
}

/// Renders cached revisions with caller-supplied data.
#[derive(Clone)]
pub struct DocumentRenderer {
    registry: CacheRegistry,
    engine: Arc<dyn TemplateEngine>,
}

impl DocumentRenderer {
    pub fn new(registry: CacheRegistry, engine: Arc<dyn TemplateEngine>) -> Self {
        Self { registry, engine }
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    /// Resolve the revision and render it with `template_data`.
    ///
    /// `template_data[revisionKey]` is overwritten with the resolved cache key.
    /// A render failure leaves the cached revision in place.
    #[instrument(skip(self, project, template_data), fields(project = %project))]
    pub async fn render(
        &self,
        project: &ProjectId,
        mut template_data: Map<String, Value>,
        revision_key: Option<&str>,
    ) -> Result<RenderedOutput, DocumentError> {
        let cache_key = CacheKey::from_revision(revision_key);
        let source = self.registry.resolve(project, revision_key).await?;

        template_data.insert(
            REVISION_KEY_FIELD.to_string(),
            Value::String(cache_key.to_string()),
        );
        let data = Value::Object(template_data);

        let body = self
            .engine
            .compile(source.as_str())
            .and_then(|template| template.render(&data))
            .inspect_err(|err| {
                counter!(METRIC_RENDER_FAILED, "project" => project.to_string()).increment(1);
                warn!(cache_key = %cache_key, error = %err, "Bootstrap document render failed");
            })?;

        Ok(RenderedOutput { body, cache_key })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::super::config::{BootstrapConfig, ProjectOptions};
    use super::super::fetcher::{BoxError, RevisionFetcher};
    use super::super::keys::RevisionData;
    use super::super::memory::MemoryBroker;
    use super::super::template::InterpolationEngine;
    use super::*;

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    async fn renderer_with(
        templates: &'static [(&'static str, &'static str)],
        calls: Arc<AtomicUsize>,
    ) -> DocumentRenderer {
        let fetcher: Arc<dyn RevisionFetcher> =
            Arc::new(move |_project: ProjectId, key: Option<String>| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let wanted = key.unwrap_or_else(|| "active".to_string());
                    templates
                        .iter()
                        .find(|(name, _)| *name == wanted)
                        .map(|(_, body)| RevisionData::from(*body))
                        .ok_or_else(|| BoxError::from(format!("unknown revision {wanted}")))
                }
            });
        let registry = CacheRegistry::new(Arc::new(MemoryBroker::new()));
        registry
            .get_or_create(
                BootstrapConfig::new(ProjectOptions::for_project("docs"), fetcher)
                    .expect("valid config"),
            )
            .await;
        DocumentRenderer::new(registry, Arc::new(InterpolationEngine))
    }

    #[tokio::test]
    async fn renders_active_revision_with_injected_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let renderer = renderer_with(
            &[("active", "<html>{{name}} ({{revisionKey}})</html>")],
            Arc::clone(&calls),
        )
        .await;

        let output = renderer
            .render(&"docs".into(), data(json!({ "name": "Ada" })), None)
            .await
            .expect("renders");
        assert_eq!(output.body, "<html>Ada (active)</html>");
        assert_eq!(output.cache_key, CacheKey::Active);
    }

    #[tokio::test]
    async fn caller_supplied_revision_key_field_is_overwritten() {
        let calls = Arc::new(AtomicUsize::new(0));
        let renderer = renderer_with(&[("rev2", "{{revisionKey}}")], calls).await;

        let output = renderer
            .render(&"docs".into(), data(json!({ "revisionKey": "spoofed" })), Some("rev2"))
            .await
            .expect("renders");
        assert_eq!(output.body, "rev2");
    }

    #[tokio::test]
    async fn render_error_keeps_cached_revision() {
        let calls = Arc::new(AtomicUsize::new(0));
        let renderer = renderer_with(&[("active", "<html>{{name</html>")], Arc::clone(&calls)).await;

        for _ in 0..2 {
            let err = renderer
                .render(&"docs".into(), Map::new(), None)
                .await
                .expect_err("template is broken");
            assert!(matches!(err, DocumentError::Render(RenderError::Compile { .. })));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_error_is_not_a_render_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let renderer = renderer_with(&[], calls).await;

        let err = renderer
            .render(&"docs".into(), Map::new(), Some("rev9"))
            .await
            .expect_err("revision missing");
        assert!(matches!(err, DocumentError::Fetch(FetchError::Backend { .. })));

        let unknown = renderer
            .render(&"other".into(), Map::new(), None)
            .await
            .expect_err("project missing");
        assert_eq!(unknown, DocumentError::UnknownProject("other".into()));
    }
}
