use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

static APPROVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bapprove\s*:\s*([0-9,\s]+)").expect("valid approval regex"));

/// Extract approved candidate numbers from a free-form comment such as
/// `approve: 1, 3`. The result is deduplicated and ascending; an empty
/// result means the comment carries no approval intent.
pub fn parse(text: &str) -> Vec<u32> {
    let Some(caps) = APPROVE.captures(text) else {
        return Vec::new();
    };
    let mut numbers: Vec<u32> = caps[1]
        .split(',')
        .filter_map(|part| part.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .collect();
    numbers.sort_unstable();
    numbers.dedup();
    numbers
}

/// Normalise an explicit list (e.g. from the command line) the same way.
pub fn normalize(mut numbers: Vec<u32>) -> Vec<u32> {
    numbers.retain(|n| *n > 0);
    numbers.sort_unstable();
    numbers.dedup();
    numbers
}

/// The parts of an issue-comment event payload the post run needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalEvent {
    pub body: String,
    pub issue_number: Option<u64>,
    pub author: Option<String>,
}

#[derive(Deserialize)]
struct EventPayload {
    #[serde(default)]
    comment: Option<EventComment>,
    #[serde(default)]
    issue: Option<EventIssue>,
}

#[derive(Deserialize)]
struct EventComment {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<EventUser>,
}

#[derive(Deserialize)]
struct EventIssue {
    number: u64,
}

#[derive(Deserialize)]
struct EventUser {
    login: String,
}

impl ApprovalEvent {
    pub fn from_json(raw: &str) -> Result<Self> {
        let payload: EventPayload = serde_json::from_str(raw).context("invalid event payload")?;
        let (body, author) = match payload.comment {
            Some(c) => (c.body.unwrap_or_default(), c.user.map(|u| u.login)),
            None => (String::new(), None),
        };
        Ok(Self {
            body,
            issue_number: payload.issue.map(|i| i.number),
            author,
        })
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read event payload {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn approved(&self) -> Vec<u32> {
        parse(&self.body)
    }
}
