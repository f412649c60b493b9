//! Filesystem-backed revision storage used by the `bootdoc` binary.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/<project>/ACTIVE          name of the live revision
//! <root>/<project>/<revision>.html template source for that revision
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::bootstrap::{BoxError, ProjectId, RevisionData, RevisionFetcher};

/// File naming the live revision inside a project directory.
pub const ACTIVE_POINTER: &str = "ACTIVE";
const TEMPLATE_EXTENSION: &str = "html";

#[derive(Debug, Error)]
pub enum RevisionStoreError {
    #[error("invalid path segment `{0}`")]
    InvalidSegment(String),
    #[error("project `{0}` has no active revision")]
    NoActiveRevision(String),
    #[error("revision `{revision}` of project `{project}` not found")]
    NotFound { project: String, revision: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct FsRevisionFetcher {
    root: PathBuf,
}

impl FsRevisionFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the revision named by `ACTIVE`.
    pub async fn active_revision(&self, project: &str) -> Result<String, RevisionStoreError> {
        let pointer = self.project_dir(project)?.join(ACTIVE_POINTER);
        let name = match fs::read_to_string(&pointer).await {
            Ok(name) => name,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RevisionStoreError::NoActiveRevision(project.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(RevisionStoreError::NoActiveRevision(project.to_string()));
        }
        validate_segment(name)?;
        Ok(name.to_string())
    }

    /// Load the template source for an explicit revision.
    pub async fn load(&self, project: &str, revision: &str) -> Result<String, RevisionStoreError> {
        validate_segment(revision)?;
        let path = self
            .project_dir(project)?
            .join(format!("{revision}.{TEMPLATE_EXTENSION}"));
        debug!(path = %path.display(), "Reading revision from disk");
        match fs::read_to_string(&path).await {
            Ok(source) => Ok(source),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(RevisionStoreError::NotFound {
                    project: project.to_string(),
                    revision: revision.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn project_dir(&self, project: &str) -> Result<PathBuf, RevisionStoreError> {
        validate_segment(project)?;
        Ok(self.root.join(project))
    }
}

#[async_trait]
impl RevisionFetcher for FsRevisionFetcher {
    async fn find_revision(
        &self,
        project: &ProjectId,
        revision_key: Option<&str>,
    ) -> Result<RevisionData, BoxError> {
        let revision = match revision_key {
            Some(revision) => revision.to_string(),
            None => self.active_revision(project.as_str()).await?,
        };
        let source = self.load(project.as_str(), &revision).await?;
        Ok(RevisionData::from(source))
    }
}

/// A single path segment: non-empty, no separators, no dot-only names.
fn validate_segment(segment: &str) -> Result<(), RevisionStoreError> {
    let invalid = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\', '\0']);
    if invalid {
        return Err(RevisionStoreError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn fixture() -> (TempDir, FsRevisionFetcher) {
        let dir = TempDir::new().expect("temp dir");
        let project = dir.path().join("docs");
        fs::create_dir_all(&project).await.expect("project dir");
        fs::write(project.join(ACTIVE_POINTER), "rev1\n")
            .await
            .expect("active pointer");
        fs::write(project.join("rev1.html"), "<p>one</p>")
            .await
            .expect("rev1");
        fs::write(project.join("rev2.html"), "<p>two</p>")
            .await
            .expect("rev2");
        let fetcher = FsRevisionFetcher::new(dir.path());
        (dir, fetcher)
    }

    #[tokio::test]
    async fn active_key_follows_pointer_file() {
        let (_dir, fetcher) = fixture().await;
        let value = fetcher
            .find_revision(&ProjectId::from("docs"), None)
            .await
            .expect("active resolves");
        assert_eq!(value.as_str(), "<p>one</p>");
    }

    #[tokio::test]
    async fn explicit_revision_is_read_directly() {
        let (_dir, fetcher) = fixture().await;
        let value = fetcher
            .find_revision(&ProjectId::from("docs"), Some("rev2"))
            .await
            .expect("rev2 resolves");
        assert_eq!(value.as_str(), "<p>two</p>");
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let (_dir, fetcher) = fixture().await;
        for revision in ["../docs/rev1", "..", "a\\b", ""] {
            let err = fetcher.load("docs", revision).await.expect_err("rejected");
            assert!(matches!(err, RevisionStoreError::InvalidSegment(_)), "{revision}");
        }
        assert!(matches!(
            fetcher.load("../etc", "rev1").await,
            Err(RevisionStoreError::InvalidSegment(_))
        ));
    }

    #[tokio::test]
    async fn missing_files_are_reported() {
        let (dir, fetcher) = fixture().await;
        assert!(matches!(
            fetcher.load("docs", "rev9").await,
            Err(RevisionStoreError::NotFound { .. })
        ));

        fs::create_dir_all(dir.path().join("empty"))
            .await
            .expect("empty project");
        assert!(matches!(
            fetcher.active_revision("empty").await,
            Err(RevisionStoreError::NoActiveRevision(_))
        ));
    }
}
