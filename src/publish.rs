//! Publish orchestration: walk the approved candidates of a batch, upload
//! their cards, post them and record every success in the ledger.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

use crate::ledger::{url_hash, Ledger, LedgerError};
use crate::metadata::{card_path, post_link};
use crate::model::{Candidate, CandidateBatch, CandidateStatus, LedgerEntry, SkipReason};
use crate::social::{MediaUploader, Publisher};
use crate::store::{BatchStore, StoreError};

/// Network collaborators for one run.
#[derive(Clone)]
pub struct Endpoints {
    pub primary: Arc<dyn MediaUploader>,
    pub fallback: Option<Arc<dyn MediaUploader>>,
    pub publisher: Arc<dyn Publisher>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Posted { published_id: String },
    Skipped(SkipReason),
    /// Already terminal in the loaded batch.
    Unchanged(CandidateStatus),
    NotInBatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateOutcome {
    pub id: u32,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub outcomes: Vec<CandidateOutcome>,
    /// Human-readable line per posted candidate.
    pub lines: Vec<String>,
}

impl PublishReport {
    pub fn posted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Posted { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Skipped(_)))
            .count()
    }

    pub fn missing(&self) -> Vec<u32> {
        self.outcomes
            .iter()
            .filter(|o| o.outcome == Outcome::NotInBatch)
            .map(|o| o.id)
            .collect()
    }

    /// Summary comment for the batch issue.
    pub fn summary(&self, approved: &[u32]) -> String {
        let numbers = approved
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut out = format!("approve: {numbers}\n");
        for line in &self.lines {
            out.push_str("\n- ");
            out.push_str(line);
        }
        for o in &self.outcomes {
            if let Outcome::Skipped(reason) = o.outcome {
                out.push_str(&format!("\n- #{} skipped: {}", o.id, reason.as_str()));
            }
        }
        out
    }
}

/// Result of one publish run. The report is always available; `saved`
/// carries the outcome of persisting the mutated batch, which can fail
/// after posts (and ledger entries) already happened.
#[derive(Debug)]
pub struct PublishRun {
    pub report: PublishReport,
    pub saved: Result<(), StoreError>,
}

impl PublishRun {
    pub fn into_result(self) -> Result<PublishReport, StoreError> {
        self.saved.map(|()| self.report)
    }
}

pub struct Orchestrator<'a> {
    ledger: &'a mut Ledger,
    endpoints: &'a Endpoints,
    out_dir: PathBuf,
}

impl<'a> Orchestrator<'a> {
    /// `out_dir` is the directory card paths (`cards/<runId>/<file>`) are
    /// relative to.
    pub fn new(ledger: &'a mut Ledger, endpoints: &'a Endpoints, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            ledger,
            endpoints,
            out_dir: out_dir.into(),
        }
    }

    /// Process `approved` in increasing id order, then persist the batch
    /// through `store` whatever the individual outcomes were. A failed save
    /// is returned alongside the report, never in place of it.
    #[instrument(skip_all, fields(batch_id = ?batch.batch_id))]
    pub async fn run(
        &mut self,
        batch: &mut CandidateBatch,
        approved: &[u32],
        store: &BatchStore,
    ) -> PublishRun {
        let mut ids = approved.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut report = PublishReport::default();
        let run_id = batch.run_id.clone();
        let batch_id = batch.batch_id;
        for id in ids {
            let Some(candidate) = batch.candidates.iter_mut().find(|c| c.id == id) else {
                warn!(id, "approved number is not in the batch");
                report.outcomes.push(CandidateOutcome {
                    id,
                    outcome: Outcome::NotInBatch,
                });
                continue;
            };
            let outcome = self
                .process(candidate, run_id.as_deref(), batch_id)
                .await;
            if let Outcome::Posted { published_id } = &outcome {
                report.lines.push(format!(
                    "#{} {} {}",
                    candidate.id,
                    candidate.article_title,
                    post_link(published_id)
                ));
            }
            report.outcomes.push(CandidateOutcome { id, outcome });
        }

        let saved = store.save(batch).await;
        if let Err(err) = &saved {
            error!(posted = report.posted(), "failed to persist batch after publishing: {}", err);
        }
        info!(
            posted = report.posted(),
            skipped = report.skipped(),
            missing = report.missing().len(),
            "publish run finished"
        );
        PublishRun { report, saved }
    }

    async fn process(
        &mut self,
        candidate: &mut Candidate,
        run_id: Option<&str>,
        batch_id: Option<u64>,
    ) -> Outcome {
        let id = candidate.id;
        let url = candidate.url.clone();
        let hash = url_hash(&url);

        if candidate.status.is_terminal() {
            info!(id, status = candidate.status.as_str(), "candidate already settled");
            return Outcome::Unchanged(candidate.status);
        }
        if self.ledger.contains(&hash) {
            info!(id, %url, "already published; skipping");
            candidate.mark_skipped(SkipReason::AlreadyPublished);
            return Outcome::Skipped(SkipReason::AlreadyPublished);
        }

        let media_id = match self.upload(candidate, run_id).await {
            Ok(media_id) => media_id,
            Err(err) => {
                error!(id, %url, stage = "upload", "{:#}", err);
                candidate.mark_skipped(SkipReason::MediaUploadFailed);
                return Outcome::Skipped(SkipReason::MediaUploadFailed);
            }
        };

        let text = post_text(candidate);
        let published_id = match self.endpoints.publisher.publish(&text, &[media_id]).await {
            Ok(published_id) => published_id,
            Err(err) => {
                error!(id, %url, stage = "publish", "{:#}", err);
                candidate.mark_skipped(SkipReason::PublishFailed);
                return Outcome::Skipped(SkipReason::PublishFailed);
            }
        };

        let now = Utc::now();
        candidate.mark_posted(published_id.clone(), now);
        info!(id, %url, %published_id, "posted");

        // The post exists now; ledger failures are only logged.
        if self.ledger.contains(&hash) {
            debug!(id, url_hash = %hash, "ledger already holds this url");
        } else {
            let entry = LedgerEntry {
                url_hash: hash,
                url,
                published_at: now,
                batch_id,
                published_id: published_id.clone(),
            };
            match self.ledger.append(entry).await {
                Ok(()) => {}
                Err(LedgerError::Conflict { url_hash }) => {
                    debug!(id, %url_hash, "ledger conflict on append");
                }
                Err(err) => error!(id, stage = "ledger", %err, "failed to record publish"),
            }
        }
        Outcome::Posted { published_id }
    }

    async fn upload(&self, candidate: &Candidate, run_id: Option<&str>) -> Result<String> {
        let bytes = self.card_bytes(candidate, run_id).await?;
        let alt = candidate.image.alt.as_str();
        let primary = &self.endpoints.primary;
        match primary.upload(&bytes, alt).await {
            Ok(media_id) => Ok(media_id),
            Err(err) => {
                let Some(fallback) = &self.endpoints.fallback else {
                    return Err(err);
                };
                warn!(
                    id = candidate.id,
                    primary = primary.strategy().as_str(),
                    fallback = fallback.strategy().as_str(),
                    "primary upload failed: {:#}; trying fallback",
                    err
                );
                fallback.upload(&bytes, alt).await
            }
        }
    }

    async fn card_bytes(&self, candidate: &Candidate, run_id: Option<&str>) -> Result<Vec<u8>> {
        if !candidate.image.bytes.is_empty() {
            return Ok(candidate.image.bytes.clone());
        }
        let file_name = candidate
            .image
            .file_name
            .as_deref()
            .ok_or_else(|| anyhow!("candidate {} has no card image", candidate.id))?;
        let run_id = run_id.ok_or_else(|| anyhow!("batch has no runId to locate card images"))?;
        let path = card_location(&self.out_dir, run_id, file_name);
        fs::read(&path)
            .await
            .map_err(|err| anyhow!("failed to read card {}: {}", path.display(), err))
    }
}

pub fn card_location(out_dir: &Path, run_id: &str, file_name: &str) -> PathBuf {
    out_dir.join(card_path(run_id, file_name))
}

/// Post body: the comment, then the article link.
pub fn post_text(candidate: &Candidate) -> String {
    let comment = candidate.comment.trim();
    if comment.is_empty() {
        candidate.url.clone()
    } else {
        format!("{comment}\n{}", candidate.url)
    }
}
