//! Clients for the social network: media upload (two API generations),
//! post creation and token refresh.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::warn;

use crate::config::MediaStrategy;

pub mod media;
pub mod oauth;
pub mod post;

pub use media::{UploadV11, UploadV2};
pub use oauth::{refresh_access_token, AccessToken};
pub use post::PostClient;

/// Longest alt text the upload endpoints accept, in characters.
pub const ALT_TEXT_MAX_CHARS: usize = 1000;

#[async_trait]
pub trait MediaUploader: Send + Sync {
    fn strategy(&self) -> MediaStrategy;

    /// Upload one image and return the opaque media id.
    async fn upload(&self, bytes: &[u8], alt_text: &str) -> Result<String>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Create a post and return its id.
    async fn publish(&self, text: &str, media_ids: &[String]) -> Result<String>;
}

pub(crate) fn clip_alt(alt: &str) -> String {
    alt.chars().take(ALT_TEXT_MAX_CHARS).collect()
}

pub(crate) async fn execute(
    http: &Client,
    request: reqwest::Request,
    what: &str,
) -> Result<reqwest::Response> {
    let res = http
        .execute(request)
        .await
        .with_context(|| format!("failed to reach {what} endpoint"))?;
    if res.status() == StatusCode::TOO_MANY_REQUESTS {
        let body = res.text().await.unwrap_or_default();
        warn!("Rate limited on {}: {}", what, body);
        return Err(anyhow!("received 429 from {what}: {body}"));
    }
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(anyhow!("{what} failed {status}: {body}"));
    }
    Ok(res)
}
