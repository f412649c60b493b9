//! Revision lookup backend supplied by the host application.

use std::future::Future;

use async_trait::async_trait;

use super::keys::{ProjectId, RevisionData};

/// Boxed error returned by fetcher implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Looks up the revision payload for a project.
///
/// `revision_key` is `None` when the live revision is requested. Implementations
/// must tolerate concurrent calls for different keys; the resolver guarantees
/// at most one call per key per fetch cycle.
#[async_trait]
pub trait RevisionFetcher: Send + Sync {
    async fn find_revision(
        &self,
        project: &ProjectId,
        revision_key: Option<&str>,
    ) -> Result<RevisionData, BoxError>;
}

#[async_trait]
impl<F, Fut> RevisionFetcher for F
where
    F: Fn(ProjectId, Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RevisionData, BoxError>> + Send + 'static,
{
    async fn find_revision(
        &self,
        project: &ProjectId,
        revision_key: Option<&str>,
    ) -> Result<RevisionData, BoxError> {
        (self)(project.clone(), revision_key.map(str::to_string)).await
    }
}
