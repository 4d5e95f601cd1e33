use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Proposed,
    Posted,
    Skipped,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Proposed => "proposed",
            CandidateStatus::Posted => "posted",
            CandidateStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CandidateStatus::Proposed)
    }
}

/// Why a candidate left the `proposed` state without being posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyPublished,
    MediaUploadFailed,
    PublishFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyPublished => "already-published",
            SkipReason::MediaUploadFailed => "media-upload-failed",
            SkipReason::PublishFailed => "publish-failed",
        }
    }
}

/// Rendered card attached to a candidate. Bytes never leave the process
/// through the metadata document; they live at `cards/<runId>/<fileName>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CandidateImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub alt: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Candidate {
    pub id: u32,
    pub source_title: String,
    pub article_title: String,
    pub url: String,
    pub category: String,
    pub comment: String,
    pub image: CandidateImage,
    pub status: CandidateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl Candidate {
    pub fn mark_posted(&mut self, published_id: String, at: DateTime<Utc>) {
        self.status = CandidateStatus::Posted;
        self.published_id = Some(published_id);
        self.published_at = Some(at);
        self.rejection_reason = None;
    }

    pub fn mark_skipped(&mut self, reason: SkipReason) {
        self.status = CandidateStatus::Skipped;
        self.rejection_reason = Some(reason.as_str().to_string());
        self.published_id = None;
        self.published_at = None;
    }

    /// Check the status/field coupling. Returns a description of the first
    /// violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let published = self.published_id.is_some() && self.published_at.is_some();
        let partially_published = self.published_id.is_some() || self.published_at.is_some();
        match self.status {
            CandidateStatus::Posted if !published => Err(format!(
                "candidate {} is posted without publishedId/publishedAt",
                self.id
            )),
            CandidateStatus::Skipped if self.rejection_reason.is_none() => Err(format!(
                "candidate {} is skipped without rejectionReason",
                self.id
            )),
            CandidateStatus::Skipped | CandidateStatus::Proposed if partially_published => Err(
                format!("candidate {} carries publish fields while {}", self.id, self.status.as_str()),
            ),
            CandidateStatus::Posted | CandidateStatus::Proposed
                if self.rejection_reason.is_some() =>
            {
                Err(format!(
                    "candidate {} carries rejectionReason while {}",
                    self.id,
                    self.status.as_str()
                ))
            }
            _ => Ok(()),
        }
    }
}

/// One run's proposal set. Membership is fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CandidateBatch {
    pub batch_id: Option<u64>,
    pub generated_at: DateTime<Utc>,
    pub timezone: String,
    pub run_id: Option<String>,
    pub candidates: Vec<Candidate>,
}

impl CandidateBatch {
    pub fn check_invariants(&self) -> Result<(), String> {
        for (idx, candidate) in self.candidates.iter().enumerate() {
            let expected = idx as u32 + 1;
            if candidate.id != expected {
                return Err(format!(
                    "candidate ids must be contiguous from 1: expected {}, found {}",
                    expected, candidate.id
                ));
            }
            candidate.check_invariants()?;
        }
        Ok(())
    }

    pub fn candidate(&self, id: u32) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    pub fn count_by_status(&self, status: CandidateStatus) -> usize {
        self.candidates.iter().filter(|c| c.status == status).count()
    }
}

/// Immutable record of a successful publish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub url_hash: String,
    pub url: String,
    #[serde(alias = "postedAt")]
    pub published_at: DateTime<Utc>,
    #[serde(default, alias = "issueNumber")]
    pub batch_id: Option<u64>,
    #[serde(default, alias = "tweetId")]
    pub published_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedSource {
    pub title: String,
    pub url: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub language: Option<String>,
}

fn default_category() -> String {
    "general".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub url_hash: String,
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub snippet: String,
    pub feed_title: String,
    pub category: String,
}
