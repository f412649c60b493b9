use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bootdoc::bootstrap::{
    BootstrapConfig, BoxError, CacheRegistry, ChannelError, Delivery, DocumentRenderer,
    InterpolationEngine, MemoryBroker, ProjectId, ProjectOptions, RevisionData, RevisionFetcher,
    metric_names,
};
use metrics_util::debugging::DebuggingRecorder;
use serde_json::Map;

/// Serves a broken template for `active`, sleeps on `slow`, fails everything else.
fn fetcher() -> Arc<dyn RevisionFetcher> {
    Arc::new(|_project: ProjectId, key: Option<String>| async move {
        match key.as_deref() {
            None => Ok(RevisionData::from("<p>{{unterminated</p>")),
            Some("slow") => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(RevisionData::from("slow"))
            }
            Some(other) => Err(BoxError::from(format!("no revision {other}"))),
        }
    })
}

struct RejectedAck;

#[async_trait]
impl Delivery for RejectedAck {
    fn message_id(&self) -> &str {
        "msg-rejected"
    }

    fn payload(&self) -> &[u8] {
        br#"{"revisionKey":"missing"}"#
    }

    async fn ack(self: Box<Self>) -> Result<(), ChannelError> {
        Err(ChannelError::Ack {
            message_id: "msg-rejected".into(),
            reason: "lease expired".into(),
        })
    }
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let broker = MemoryBroker::new();
    let registry = CacheRegistry::new(Arc::new(broker.clone()));
    let handle = registry
        .get_or_create(
            BootstrapConfig::new(ProjectOptions::for_project("docs"), fetcher())
                .expect("valid config"),
        )
        .await;
    let project = ProjectId::from("docs");

    // miss, join, fetch latency
    let (first, second) = tokio::join!(
        registry.resolve(&project, Some("slow")),
        registry.resolve(&project, Some("slow")),
    );
    first.expect("slow resolves");
    second.expect("slow resolves");
    // hit
    registry
        .resolve(&project, Some("slow"))
        .await
        .expect("slow cached");
    // fetch failure
    registry
        .resolve(&project, Some("gone"))
        .await
        .expect_err("gone fails");

    // render failure
    let renderer = DocumentRenderer::new(registry.clone(), Arc::new(InterpolationEngine));
    renderer
        .render(&project, Map::new(), None)
        .await
        .expect_err("template is broken");

    // invalidation, ack failure, prewarm failure
    let prewarm = handle.subscriber().handle(Box::new(RejectedAck)).await;
    prewarm.await.expect("prewarm task joins");

    // subscription setup failure
    broker.set_fail_subscriptions(true);
    registry
        .get_or_create(
            BootstrapConfig::new(ProjectOptions::for_project("other"), fetcher())
                .expect("valid config"),
        )
        .await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        metric_names::CACHE_HIT,
        metric_names::CACHE_MISS,
        metric_names::CACHE_JOIN,
        metric_names::FETCH_MS,
        metric_names::FETCH_FAILED,
        metric_names::INVALIDATION,
        metric_names::PREWARM_FAILED,
        metric_names::SUBSCRIPTION_SETUP_FAILED,
        metric_names::ACK_FAILED,
        metric_names::RENDER_FAILED,
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
