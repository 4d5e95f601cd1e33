//! Ingestion: feeds → selected articles → rendered candidates → batch.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use tokio::fs;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::card::{CardInput, CardRenderer};
use crate::config::{Config, ImageMode};
use crate::metadata::{card_path, issue_title};
use crate::model::{Article, Candidate, CandidateBatch, CandidateImage, CandidateStatus, FeedSource};
use crate::store::BatchStore;

pub mod comment;
pub mod feeds;
pub mod og;

pub use comment::{CommentWriter, HeadlineWriter};

/// An article that was selected but could not become a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub url: String,
    pub title: String,
    pub stage: &'static str,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Collected {
    pub batch: Option<CandidateBatch>,
    pub failures: Vec<Failure>,
}

pub struct Collector<'a> {
    config: &'a Config,
    http: &'a Client,
    comments: &'a dyn CommentWriter,
    renderer: &'a CardRenderer,
    timeout: Duration,
}

impl<'a> Collector<'a> {
    pub fn new(
        config: &'a Config,
        http: &'a Client,
        comments: &'a dyn CommentWriter,
        renderer: &'a CardRenderer,
    ) -> Self {
        Self {
            config,
            http,
            comments,
            renderer,
            timeout: Duration::from_secs(config.app.request_timeout_secs),
        }
    }

    /// Fetch, select and render. `published` holds the ledger's url hashes.
    #[instrument(skip_all, fields(sources = sources.len()))]
    pub async fn collect(&self, sources: &[FeedSource], published: &HashSet<String>) -> Collected {
        let fetched = feeds::fetch_all(self.http, sources, self.timeout).await;
        let selected = feeds::select(
            fetched,
            &self.config.filters,
            published,
            self.config.app.max_candidates,
            self.config.app.max_per_category,
        );
        info!(selected = selected.len(), "articles selected");
        self.build(selected).await
    }

    /// Turn already-selected articles into a batch. Articles that fail are
    /// recorded and do not consume an id.
    pub async fn build(&self, articles: Vec<Article>) -> Collected {
        let mut collected = Collected::default();
        let mut candidates = Vec::new();
        for article in articles {
            let id = candidates.len() as u32 + 1;
            match self.candidate(id, &article).await {
                Ok(candidate) => {
                    info!(id, title = %article.title, "candidate added");
                    candidates.push(candidate);
                }
                Err((stage, err)) => {
                    error!(url = %article.link, stage, "candidate dropped: {:#}", err);
                    collected.failures.push(Failure {
                        url: article.link.clone(),
                        title: article.title.clone(),
                        stage,
                        reason: format!("{err:#}"),
                    });
                }
            }
        }
        if !candidates.is_empty() {
            collected.batch = Some(CandidateBatch {
                batch_id: None,
                generated_at: Utc::now(),
                timezone: self.config.app.timezone.clone(),
                run_id: Some(Uuid::new_v4().to_string()),
                candidates,
            });
        }
        collected
    }

    async fn candidate(
        &self,
        id: u32,
        article: &Article,
    ) -> Result<Candidate, (&'static str, anyhow::Error)> {
        let og = og::scrape(self.http, &article.link, self.timeout).await.unwrap_or_default();
        let comment = self
            .comments
            .write(article, og.title.as_deref())
            .await
            .map_err(|err| ("comment", err))?;

        let background = match (&og.image, self.config.image.mode) {
            (Some(image_url), ImageMode::PublisherOverlay) => {
                match og::resolve_publisher_image(
                    self.http,
                    image_url,
                    &article.link,
                    &self.config.image.license,
                    self.timeout,
                )
                .await
                {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        warn!(id, url = %article.link, "publisher image unusable: {:#}", err);
                        None
                    }
                }
            }
            _ => None,
        };

        let input = CardInput {
            id,
            comment: &comment,
            title: &article.title,
            publisher: &article.feed_title,
        };
        let card = self
            .renderer
            .render(&input, background.as_deref())
            .map_err(|err| ("card", anyhow::Error::from(err)))?;

        Ok(Candidate {
            id,
            source_title: article.feed_title.clone(),
            article_title: article.title.clone(),
            url: article.link.clone(),
            category: article.category.clone(),
            comment,
            image: CandidateImage {
                file_name: Some(card.file_name),
                alt: card.caption,
                bytes: card.bytes,
            },
            status: CandidateStatus::Proposed,
            rejection_reason: None,
            published_id: None,
            published_at: None,
        })
    }
}

/// Write every card image under `<out_dir>/cards/<runId>/`.
pub async fn write_cards(batch: &CandidateBatch, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let run_id = batch.run_id.as_deref().context("batch has no runId")?;
    let mut written = Vec::new();
    for candidate in &batch.candidates {
        let Some(file_name) = candidate.image.file_name.as_deref() else {
            continue;
        };
        if candidate.image.bytes.is_empty() {
            continue;
        }
        let path = out_dir.join(card_path(run_id, file_name));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, &candidate.image.bytes)
            .await
            .with_context(|| format!("failed to write card {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

/// Persist a fresh batch: cards and local cache first, then (when an issue
/// tracker is configured) the proposal issue, whose number becomes the
/// batch id.
#[instrument(skip_all)]
pub async fn persist(
    batch: &mut CandidateBatch,
    out_dir: &Path,
    store: &BatchStore,
    label: &str,
    utc_offset_minutes: i32,
) -> Result<()> {
    let cards = write_cards(batch, out_dir).await?;
    info!(cards = cards.len(), "card images written");
    store.write_cache(batch).await?;
    info!(path = %store.cache_path().display(), "local batch cache written");

    let Some(tracker) = store.tracker() else {
        warn!("GITHUB_TOKEN or GITHUB_REPOSITORY missing; proposal issue not created");
        return Ok(());
    };
    tracker.ensure_label(label).await?;
    let title = issue_title(batch.generated_at, utc_offset_minutes);
    let body = store.render(batch)?;
    let issue = tracker.create_issue(&title, &body, &[label.to_string()]).await?;
    batch.batch_id = Some(issue.number);
    store.save(batch).await?;
    info!(batch_id = issue.number, url = %issue.html_url, "proposal issue created");
    Ok(())
}
