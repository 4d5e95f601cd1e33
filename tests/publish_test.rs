use anyhow::{anyhow, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use news_autopost::config::MediaStrategy;
use news_autopost::github::{CreatedIssue, IssueTracker};
use news_autopost::ledger::{url_hash, Ledger};
use news_autopost::metadata::card_path;
use news_autopost::model::{
    Candidate, CandidateBatch, CandidateImage, CandidateStatus, LedgerEntry,
};
use news_autopost::publish::{Endpoints, Orchestrator, Outcome};
use news_autopost::social::{MediaUploader, Publisher};
use news_autopost::store::{BatchStore, StoreError};

const RUN_ID: &str = "run-test";

#[derive(Clone)]
struct RecordingUploader {
    strategy: MediaStrategy,
    responses: Arc<Mutex<VecDeque<Result<String>>>>,
    calls: Arc<Mutex<Vec<(usize, String)>>>,
}

impl RecordingUploader {
    fn with_responses(strategy: MediaStrategy, responses: Vec<Result<String>>) -> Self {
        Self {
            strategy,
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn calls(&self) -> Vec<(usize, String)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl MediaUploader for RecordingUploader {
    fn strategy(&self) -> MediaStrategy {
        self.strategy
    }

    async fn upload(&self, bytes: &[u8], alt_text: &str) -> Result<String> {
        self.calls.lock().await.push((bytes.len(), alt_text.to_string()));
        let mut guard = self.responses.lock().await;
        guard.pop_front().unwrap_or_else(|| Ok("media".into()))
    }
}

#[derive(Clone, Default)]
struct RecordingPublisher {
    responses: Arc<Mutex<VecDeque<Result<String>>>>,
    calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl RecordingPublisher {
    fn with_responses(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, text: &str, media_ids: &[String]) -> Result<String> {
        self.calls
            .lock()
            .await
            .push((text.to_string(), media_ids.to_vec()));
        let mut guard = self.responses.lock().await;
        guard.pop_front().unwrap_or_else(|| Ok("post".into()))
    }
}

struct Harness {
    primary: RecordingUploader,
    fallback: RecordingUploader,
    publisher: RecordingPublisher,
}

impl Harness {
    fn new(primary: Vec<Result<String>>, fallback: Vec<Result<String>>, posts: Vec<Result<String>>) -> Self {
        Self {
            primary: RecordingUploader::with_responses(MediaStrategy::V2, primary),
            fallback: RecordingUploader::with_responses(MediaStrategy::V1_1, fallback),
            publisher: RecordingPublisher::with_responses(posts),
        }
    }

    fn endpoints(&self) -> Endpoints {
        Endpoints {
            primary: Arc::new(self.primary.clone()),
            fallback: Some(Arc::new(self.fallback.clone())),
            publisher: Arc::new(self.publisher.clone()),
        }
    }

    async fn network_calls(&self) -> usize {
        self.primary.calls().await.len()
            + self.fallback.calls().await.len()
            + self.publisher.calls().await.len()
    }
}

fn candidate(id: u32) -> Candidate {
    Candidate {
        id,
        source_title: "Example Wire".into(),
        article_title: format!("Story {id}"),
        url: format!("https://news.example/story/{id}"),
        category: "economy".into(),
        comment: format!("見出し{id}"),
        image: CandidateImage {
            file_name: Some(format!("candidate-{id:02}.png")),
            alt: format!("Example Wire Story {id}"),
            bytes: Vec::new(),
        },
        status: CandidateStatus::Proposed,
        rejection_reason: None,
        published_id: None,
        published_at: None,
    }
}

fn batch(count: u32) -> CandidateBatch {
    CandidateBatch {
        batch_id: Some(7),
        generated_at: Utc::now(),
        timezone: "Asia/Tokyo".into(),
        run_id: Some(RUN_ID.into()),
        candidates: (1..=count).map(candidate).collect(),
    }
}

async fn write_cards(out_dir: &Path, batch: &CandidateBatch) {
    for c in &batch.candidates {
        let path = out_dir.join(card_path(RUN_ID, c.image.file_name.as_deref().unwrap()));
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, vec![c.id as u8; 16]).await.unwrap();
    }
}

#[tokio::test]
async fn already_published_url_makes_no_calls() {
    let td = tempfile::tempdir().unwrap();
    let out = td.path().join("out");
    let mut b = batch(1);
    write_cards(&out, &b).await;

    let mut ledger = Ledger::load(td.path().join("posted.json")).await;
    ledger
        .append(LedgerEntry {
            url_hash: url_hash(&b.candidates[0].url),
            url: b.candidates[0].url.clone(),
            published_at: Utc::now(),
            batch_id: Some(3),
            published_id: "old".into(),
        })
        .await
        .unwrap();

    let harness = Harness::new(vec![], vec![], vec![]);
    let endpoints = harness.endpoints();
    let store = BatchStore::new(out.join("latest-metadata.json"), None);
    let report = Orchestrator::new(&mut ledger, &endpoints, &out)
        .run(&mut b, &[1], &store)
        .await
        .into_result()
        .unwrap();

    assert_eq!(harness.network_calls().await, 0);
    let c = &b.candidates[0];
    assert_eq!(c.status, CandidateStatus::Skipped);
    assert_eq!(c.rejection_reason.as_deref(), Some("already-published"));
    assert_eq!(report.skipped(), 1);
    assert_eq!(ledger.entries().len(), 1);
}

#[tokio::test]
async fn one_failure_does_not_stop_the_others() {
    let td = tempfile::tempdir().unwrap();
    let out = td.path().join("out");
    let mut b = batch(3);
    write_cards(&out, &b).await;

    let harness = Harness::new(
        vec![Ok("m1".into()), Ok("m2".into()), Ok("m3".into())],
        vec![],
        vec![Ok("p1".into()), Err(anyhow!("503 from publish")), Ok("p3".into())],
    );
    let endpoints = harness.endpoints();
    let ledger_path = td.path().join("data").join("posted.json");
    let mut ledger = Ledger::load(&ledger_path).await;
    let store = BatchStore::new(out.join("latest-metadata.json"), None);

    let report = Orchestrator::new(&mut ledger, &endpoints, &out)
        .run(&mut b, &[3, 1, 2, 2], &store)
        .await
        .into_result()
        .unwrap();

    assert_eq!(report.posted(), 2);
    assert_eq!(report.skipped(), 1);
    let ids: Vec<u32> = report.outcomes.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    assert_eq!(b.candidates[0].status, CandidateStatus::Posted);
    assert_eq!(b.candidates[0].published_id.as_deref(), Some("p1"));
    assert_eq!(b.candidates[1].status, CandidateStatus::Skipped);
    assert_eq!(b.candidates[1].rejection_reason.as_deref(), Some("publish-failed"));
    assert_eq!(b.candidates[2].status, CandidateStatus::Posted);

    let posts = harness.publisher.calls().await;
    assert_eq!(posts.len(), 3);
    assert_eq!(posts[0].0, "見出し1\nhttps://news.example/story/1");
    assert_eq!(posts[0].1, vec!["m1".to_string()]);

    // Partial progress is on disk: cache and ledger.
    let cached = store.read_cache().await.unwrap().unwrap();
    assert_eq!(cached, b);
    let reloaded = Ledger::load(&ledger_path).await;
    assert_eq!(reloaded.entries().len(), 2);
    assert!(reloaded.contains(&url_hash("https://news.example/story/1")));
    assert!(!reloaded.contains(&url_hash("https://news.example/story/2")));
    assert_eq!(reloaded.entries()[0].batch_id, Some(7));
}

#[tokio::test]
async fn fallback_upload_is_tried_once() {
    let td = tempfile::tempdir().unwrap();
    let out = td.path().join("out");
    let mut b = batch(2);
    write_cards(&out, &b).await;

    let harness = Harness::new(
        vec![Err(anyhow!("v2 down")), Err(anyhow!("v2 down"))],
        vec![Ok("legacy-1".into()), Err(anyhow!("v1.1 down"))],
        vec![Ok("p1".into())],
    );
    let endpoints = harness.endpoints();
    let mut ledger = Ledger::load(td.path().join("posted.json")).await;
    let store = BatchStore::new(out.join("latest-metadata.json"), None);

    Orchestrator::new(&mut ledger, &endpoints, &out)
        .run(&mut b, &[1, 2], &store)
        .await
        .into_result()
        .unwrap();

    assert_eq!(b.candidates[0].status, CandidateStatus::Posted);
    assert_eq!(b.candidates[1].status, CandidateStatus::Skipped);
    assert_eq!(b.candidates[1].rejection_reason.as_deref(), Some("media-upload-failed"));
    assert_eq!(harness.primary.calls().await.len(), 2);
    assert_eq!(harness.fallback.calls().await.len(), 2);
    let posts = harness.publisher.calls().await;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].1, vec!["legacy-1".to_string()]);
    let uploads = harness.primary.calls().await;
    assert_eq!(uploads[0], (16, "Example Wire Story 1".to_string()));
}

#[tokio::test]
async fn missing_card_file_is_an_upload_failure() {
    let td = tempfile::tempdir().unwrap();
    let out = td.path().join("out");
    let mut b = batch(1);

    let harness = Harness::new(vec![], vec![], vec![]);
    let endpoints = harness.endpoints();
    let mut ledger = Ledger::load(td.path().join("posted.json")).await;
    let store = BatchStore::new(out.join("latest-metadata.json"), None);

    Orchestrator::new(&mut ledger, &endpoints, &out)
        .run(&mut b, &[1], &store)
        .await
        .into_result()
        .unwrap();

    assert_eq!(b.candidates[0].rejection_reason.as_deref(), Some("media-upload-failed"));
    assert_eq!(harness.network_calls().await, 0);
    assert!(ledger.entries().is_empty());
}

#[tokio::test]
async fn settled_and_unknown_candidates_are_left_alone() {
    let td = tempfile::tempdir().unwrap();
    let out = td.path().join("out");
    let mut b = batch(2);
    write_cards(&out, &b).await;
    b.candidates[0].mark_posted("earlier".into(), Utc::now());

    let harness = Harness::new(vec![], vec![], vec![]);
    let endpoints = harness.endpoints();
    let mut ledger = Ledger::load(td.path().join("posted.json")).await;
    let store = BatchStore::new(out.join("latest-metadata.json"), None);

    let report = Orchestrator::new(&mut ledger, &endpoints, &out)
        .run(&mut b, &[1, 9], &store)
        .await
        .into_result()
        .unwrap();

    assert_eq!(harness.network_calls().await, 0);
    assert_eq!(b.candidates[0].published_id.as_deref(), Some("earlier"));
    assert_eq!(b.candidates[1].status, CandidateStatus::Proposed);
    assert_eq!(report.missing(), vec![9]);
    assert_eq!(
        report.outcomes[0].outcome,
        Outcome::Unchanged(CandidateStatus::Posted)
    );
    assert!(store.read_cache().await.unwrap().is_some());
}

#[tokio::test]
async fn second_run_over_reloaded_batch_posts_nothing_twice() {
    let td = tempfile::tempdir().unwrap();
    let out = td.path().join("out");
    let fresh = batch(1);
    write_cards(&out, &fresh).await;
    let ledger_path = td.path().join("posted.json");
    let store = BatchStore::new(out.join("latest-metadata.json"), None);

    let harness = Harness::new(vec![], vec![], vec![Ok("p1".into())]);
    let endpoints = harness.endpoints();
    let mut first = fresh.clone();
    let mut ledger = Ledger::load(&ledger_path).await;
    Orchestrator::new(&mut ledger, &endpoints, &out)
        .run(&mut first, &[1], &store)
        .await
        .into_result()
        .unwrap();
    assert_eq!(harness.publisher.calls().await.len(), 1);

    // An approval replayed against a stale copy of the batch.
    let mut stale = fresh.clone();
    let mut ledger = Ledger::load(&ledger_path).await;
    Orchestrator::new(&mut ledger, &endpoints, &out)
        .run(&mut stale, &[1], &store)
        .await
        .into_result()
        .unwrap();
    assert_eq!(harness.publisher.calls().await.len(), 1);
    assert_eq!(stale.candidates[0].rejection_reason.as_deref(), Some("already-published"));
}

/// Issue tracker that accepts nothing.
struct UnavailableTracker;

#[async_trait::async_trait]
impl IssueTracker for UnavailableTracker {
    async fn create_issue(&self, _title: &str, _body: &str, _labels: &[String]) -> Result<CreatedIssue> {
        Err(anyhow!("503 github"))
    }

    async fn update_issue(&self, _number: u64, _body: &str) -> Result<()> {
        Err(anyhow!("503 github"))
    }

    async fn fetch_issue(&self, _number: u64) -> Result<String> {
        Err(anyhow!("503 github"))
    }

    async fn comment(&self, _number: u64, _body: &str) -> Result<()> {
        Err(anyhow!("503 github"))
    }

    async fn ensure_label(&self, _name: &str) -> Result<()> {
        Err(anyhow!("503 github"))
    }
}

#[tokio::test]
async fn failed_issue_update_still_reports_posts_and_keeps_ledger() {
    let td = tempfile::tempdir().unwrap();
    let out = td.path().join("out");
    let mut b = batch(1);
    write_cards(&out, &b).await;
    let ledger_path = td.path().join("posted.json");

    let harness = Harness::new(vec![], vec![], vec![Ok("p1".into())]);
    let endpoints = harness.endpoints();
    let tracker: Arc<dyn IssueTracker> = Arc::new(UnavailableTracker);
    let store = BatchStore::new(out.join("latest-metadata.json"), Some(tracker));
    let mut ledger = Ledger::load(&ledger_path).await;

    let run = Orchestrator::new(&mut ledger, &endpoints, &out)
        .run(&mut b, &[1], &store)
        .await;

    assert_eq!(run.report.posted(), 1);
    assert!(matches!(run.saved, Err(StoreError::Tracker { number: 7, .. })));
    assert_eq!(b.candidates[0].status, CandidateStatus::Posted);
    assert_eq!(Ledger::load(&ledger_path).await.entries().len(), 1);

    // The local copy is written before the issue, so a later run sees the post.
    let cached = store.read_cache().await.unwrap().unwrap();
    assert_eq!(cached.candidates[0].status, CandidateStatus::Posted);
    assert!(run.into_result().is_err());
}
