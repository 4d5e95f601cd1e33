//! Dual persistence for a batch: the issue body (authoritative when
//! reachable) and the local cache file.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::github::IssueTracker;
use crate::metadata::{self, MetadataError, RenderOptions};
use crate::model::CandidateBatch;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no candidate batch found in the issue or the local cache")]
    NotFound,
    #[error("local cache holds batch {found:?}, expected {expected}")]
    Mismatch { expected: u64, found: Option<u64> },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("batch cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to update issue {number}: {source:#}")]
    Tracker {
        number: u64,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Clone)]
pub struct BatchStore {
    cache_path: PathBuf,
    tracker: Option<Arc<dyn IssueTracker>>,
    render: RenderOptions,
}

impl std::fmt::Debug for BatchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStore")
            .field("cache_path", &self.cache_path)
            .field("tracker", &self.tracker.is_some())
            .finish()
    }
}

impl BatchStore {
    pub fn new(cache_path: impl Into<PathBuf>, tracker: Option<Arc<dyn IssueTracker>>) -> Self {
        Self {
            cache_path: cache_path.into(),
            tracker,
            render: RenderOptions::default(),
        }
    }

    pub fn with_render_options(mut self, render: RenderOptions) -> Self {
        self.render = render;
        self
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn tracker(&self) -> Option<&Arc<dyn IssueTracker>> {
        self.tracker.as_ref()
    }

    /// Load the batch to act on. The issue is tried first; a fetch error, a
    /// missing block or a corrupt block falls back to the local cache.
    pub async fn resolve(&self, batch_id: Option<u64>) -> Result<CandidateBatch, StoreError> {
        if let (Some(tracker), Some(number)) = (&self.tracker, batch_id) {
            match tracker.fetch_issue(number).await {
                Ok(body) => match metadata::decode(&body) {
                    Ok(Some(mut batch)) => {
                        batch.batch_id.get_or_insert(number);
                        info!(batch_id = number, "batch loaded from issue");
                        return Ok(batch);
                    }
                    Ok(None) => warn!(batch_id = number, "issue has no metadata block; using local cache"),
                    Err(err) => warn!(batch_id = number, %err, "issue metadata unusable; using local cache"),
                },
                Err(err) => warn!(batch_id = number, "failed to fetch issue: {:#}; using local cache", err),
            }
        }

        let batch = self.read_cache().await?.ok_or(StoreError::NotFound)?;
        if let Some(expected) = batch_id {
            if batch.batch_id.is_some_and(|found| found != expected) {
                return Err(StoreError::Mismatch {
                    expected,
                    found: batch.batch_id,
                });
            }
        }
        info!(path = %self.cache_path.display(), "batch loaded from local cache");
        Ok(batch)
    }

    /// Read the local cache; `None` when the file does not exist.
    pub async fn read_cache(&self) -> Result<Option<CandidateBatch>, StoreError> {
        match fs::read_to_string(&self.cache_path).await {
            Ok(raw) => Ok(Some(metadata::parse_payload(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path: self.cache_path.clone(),
                source,
            }),
        }
    }

    pub async fn write_cache(&self, batch: &CandidateBatch) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.cache_path.clone(),
            source,
        };
        if let Some(parent) = self.cache_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut body = serde_json::to_string_pretty(batch)
            .map_err(|err| MetadataError::Corrupt(err.to_string()))?;
        body.push('\n');
        fs::write(&self.cache_path, body).await.map_err(io_err)?;
        debug!(path = %self.cache_path.display(), "batch cache written");
        Ok(())
    }

    /// Render the issue body for `batch`.
    pub fn render(&self, batch: &CandidateBatch) -> Result<String, StoreError> {
        Ok(metadata::encode_with(batch, &self.render)?)
    }

    /// Write the cache, then the issue body when the batch has one.
    pub async fn save(&self, batch: &CandidateBatch) -> Result<(), StoreError> {
        self.write_cache(batch).await?;
        if let (Some(tracker), Some(number)) = (&self.tracker, batch.batch_id) {
            let body = self.render(batch)?;
            tracker
                .update_issue(number, &body)
                .await
                .map_err(|source| StoreError::Tracker { number, source })?;
            debug!(batch_id = number, "issue body updated");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Candidate, CandidateImage, CandidateStatus};
    use chrono::Utc;
    use tempfile::tempdir;

    fn batch(batch_id: Option<u64>) -> CandidateBatch {
        CandidateBatch {
            batch_id,
            generated_at: Utc::now(),
            timezone: "Asia/Tokyo".into(),
            run_id: Some("run-1".into()),
            candidates: vec![Candidate {
                id: 1,
                source_title: "Feed".into(),
                article_title: "Title".into(),
                url: "https://news.example/a".into(),
                category: "general".into(),
                comment: "comment".into(),
                image: CandidateImage {
                    file_name: Some("candidate-01.png".into()),
                    alt: "Feed Title".into(),
                    bytes: Vec::new(),
                },
                status: CandidateStatus::Proposed,
                rejection_reason: None,
                published_id: None,
                published_at: None,
            }],
        }
    }

    #[tokio::test]
    async fn cache_round_trip() {
        let td = tempdir().unwrap();
        let store = BatchStore::new(td.path().join("out").join("latest-metadata.json"), None);
        assert!(store.read_cache().await.unwrap().is_none());
        let b = batch(None);
        store.save(&b).await.unwrap();
        assert_eq!(store.resolve(None).await.unwrap(), b);
    }

    #[tokio::test]
    async fn missing_everything_is_not_found() {
        let td = tempdir().unwrap();
        let store = BatchStore::new(td.path().join("latest-metadata.json"), None);
        assert!(matches!(store.resolve(Some(3)).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn mismatched_cache_is_rejected() {
        let td = tempdir().unwrap();
        let store = BatchStore::new(td.path().join("latest-metadata.json"), None);
        store.write_cache(&batch(Some(5))).await.unwrap();
        let err = store.resolve(Some(6)).await.unwrap_err();
        assert!(matches!(err, StoreError::Mismatch { expected: 6, found: Some(5) }));
    }

    #[tokio::test]
    async fn corrupt_cache_is_an_error() {
        let td = tempdir().unwrap();
        let path = td.path().join("latest-metadata.json");
        fs::write(&path, "{not json").await.unwrap();
        let store = BatchStore::new(path, None);
        assert!(matches!(store.resolve(None).await, Err(StoreError::Metadata(_))));
    }
}
