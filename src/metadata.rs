//! Two-layer document codec for a candidate batch.
//!
//! The document is markdown for humans plus one HTML comment block tagged
//! `autopost:metadata` carrying the canonical JSON of the batch. Only the
//! block is ever parsed back; the markdown is regenerated on every write.
//! Image bytes are not embedded: each card is referenced by
//! `cards/<runId>/<fileName>`.
use chrono::{DateTime, FixedOffset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::model::{Candidate, CandidateBatch, CandidateStatus};

pub const METADATA_TAG: &str = "autopost:metadata";

static BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?s)<!--\s*{}\s*\n?(.*?)\s*-->",
        regex::escape(METADATA_TAG)
    ))
    .expect("valid metadata regex")
});

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata block is corrupt: {0}")]
    Corrupt(String),
}

/// Rendering knobs for the cosmetic layer.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Absolute base the relative card paths are joined to for inline
    /// previews, e.g. `https://raw.githubusercontent.com/<owner>/<repo>/<branch>`.
    pub image_base_url: Option<String>,
}

impl RenderOptions {
    pub fn from_env() -> Self {
        let repository = std::env::var("GITHUB_REPOSITORY").ok();
        let branch = std::env::var("GITHUB_REF_NAME").ok().or_else(|| {
            std::env::var("GITHUB_REF")
                .ok()
                .and_then(|r| r.strip_prefix("refs/heads/").map(str::to_string))
        });
        let image_base_url = match (repository, branch) {
            (Some(repo), Some(branch)) if !repo.is_empty() && !branch.is_empty() => {
                Some(format!("https://raw.githubusercontent.com/{repo}/{branch}"))
            }
            _ => None,
        };
        Self { image_base_url }
    }
}

/// Relative path of a candidate's card image.
pub fn card_path(run_id: &str, file_name: &str) -> String {
    format!("cards/{run_id}/{file_name}")
}

/// Card file name for candidate `id`.
pub fn card_file_name(id: u32) -> String {
    format!("candidate-{id:02}.png")
}

/// Public URL of a published post.
pub fn post_link(published_id: &str) -> String {
    format!("https://x.com/i/web/status/{published_id}")
}

pub fn encode(batch: &CandidateBatch) -> Result<String, MetadataError> {
    encode_with(batch, &RenderOptions::default())
}

pub fn encode_with(batch: &CandidateBatch, opts: &RenderOptions) -> Result<String, MetadataError> {
    let payload = serde_json::to_string(batch)
        .map_err(|err| MetadataError::Corrupt(format!("failed to serialize batch: {err}")))?;
    // '>' only occurs inside JSON strings, so escaping it keeps "-->" out of
    // the comment without changing the decoded value.
    let payload = payload.replace('>', "\\u003e");

    let mut sections = vec![
        "# AutoPost candidates".to_string(),
        "Reply with a comment such as `approve: 1,3` to publish candidates.".to_string(),
    ];
    sections.extend(
        batch
            .candidates
            .iter()
            .map(|c| render_candidate(batch, c, opts)),
    );
    sections.push(format!("<!-- {METADATA_TAG}\n{payload}\n-->"));
    Ok(sections.join("\n\n"))
}

fn render_candidate(batch: &CandidateBatch, c: &Candidate, opts: &RenderOptions) -> String {
    let marker = match c.status {
        CandidateStatus::Proposed => "🟡 proposed",
        CandidateStatus::Posted => "✅ posted",
        CandidateStatus::Skipped => "⏭️ skipped",
    };
    let mut lines = vec![
        format!("## Candidate {} ({marker})", c.id),
        format!("Source: {}", c.source_title),
        format!("Category: {}", c.category),
        format!("Comment: **{}**", c.comment),
        c.article_title.clone(),
        format!("[Article link]({})", c.url),
    ];
    if let (Some(run_id), Some(file_name)) = (batch.run_id.as_deref(), c.image.file_name.as_deref())
    {
        let path = card_path(run_id, file_name);
        let href = match opts.image_base_url.as_deref() {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), path),
            None => path,
        };
        lines.push(format!("![Card {}]({href})", c.id));
    }
    if let Some(id) = c.published_id.as_deref() {
        lines.push(format!("Published: {}", post_link(id)));
    }
    if let Some(reason) = c.rejection_reason.as_deref() {
        lines.push(format!("Skip reason: {reason}"));
    }
    // Free text must never open a comment block of its own.
    lines.join("\n").replace("<!--", "&lt;!--")
}

/// Extract the batch from a document. `Ok(None)` when no block is present.
pub fn decode(document: &str) -> Result<Option<CandidateBatch>, MetadataError> {
    let mut blocks = BLOCK.captures_iter(document);
    let Some(first) = blocks.next() else {
        return Ok(None);
    };
    if blocks.next().is_some() {
        return Err(MetadataError::Corrupt(format!(
            "more than one {METADATA_TAG} block"
        )));
    }
    parse_payload(&first[1]).map(Some)
}

/// Parse and validate the JSON payload (also the local cache format).
pub fn parse_payload(json: &str) -> Result<CandidateBatch, MetadataError> {
    let batch: CandidateBatch = serde_json::from_str(json)
        .map_err(|err| MetadataError::Corrupt(format!("invalid batch JSON: {err}")))?;
    batch.check_invariants().map_err(MetadataError::Corrupt)?;
    Ok(batch)
}

/// Title for the proposal issue, in the configured UTC offset.
pub fn issue_title(at: DateTime<Utc>, utc_offset_minutes: i32) -> String {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
    format!(
        "AutoPost proposals {}",
        at.with_timezone(&offset).format("%Y-%m-%d %H:%M")
    )
}
