use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::info;

use crate::config::{Config, Credentials, MediaStrategy};
use crate::github::{GitHubClient, IssueTracker};
use crate::metadata::RenderOptions;
use crate::publish::Endpoints;
use crate::social::{refresh_access_token, MediaUploader, PostClient, UploadV11, UploadV2};
use crate::store::BatchStore;

const USER_AGENT: &str = concat!("news-autopost/", env!("CARGO_PKG_VERSION"));

/// Everything a command needs, built once at startup.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: Config,
    pub credentials: Credentials,
    pub http: Client,
}

impl AppContext {
    pub fn new(config: Config, credentials: Credentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.app.request_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            config,
            credentials,
            http,
        })
    }

    pub fn issue_tracker(&self) -> Option<Arc<dyn IssueTracker>> {
        let (owner, repo, token) = self.credentials.github()?;
        Some(Arc::new(GitHubClient::new(self.http.clone(), owner, repo, token)))
    }

    pub fn batch_store(&self) -> BatchStore {
        BatchStore::new(self.config.cache_path(), self.issue_tracker())
            .with_render_options(RenderOptions::from_env())
    }

    /// Refresh the access token and wire the configured upload strategy
    /// with the other one as fallback.
    pub async fn publish_endpoints(&self) -> Result<Endpoints> {
        let (client_id, client_secret, refresh) = self.credentials.require_oauth2()?;
        let strategy = self.credentials.media_strategy(&self.config)?;
        let token = refresh_access_token(&self.http, &client_id, &client_secret, &refresh).await?;
        info!(expires_in = token.expires_in, "access token refreshed");

        let v2: Arc<dyn MediaUploader> =
            Arc::new(UploadV2::new(self.http.clone(), token.access_token.clone()));
        let v11: Arc<dyn MediaUploader> =
            Arc::new(UploadV11::new(self.http.clone(), self.credentials.oauth1()));
        let (primary, fallback) = match strategy {
            MediaStrategy::V2 => (v2, v11),
            MediaStrategy::V1_1 => (v11, v2),
        };
        Ok(Endpoints {
            primary,
            fallback: Some(fallback),
            publisher: Arc::new(PostClient::new(self.http.clone(), token.access_token)),
        })
    }
}
