use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{execute, Publisher};

const API_BASE: &str = "https://api.x.com/";

#[derive(Clone)]
pub struct PostClient {
    http: Client,
    base_url: Url,
    access_token: String,
}

impl fmt::Debug for PostClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct CreatedPost {
    data: CreatedPostData,
}

#[derive(Deserialize)]
struct CreatedPostData {
    id: String,
}

pub fn build_post_body(text: &str, media_ids: &[String]) -> Value {
    let mut body = json!({ "text": text });
    if !media_ids.is_empty() {
        body["media"] = json!({ "media_ids": media_ids });
    }
    body
}

impl PostClient {
    pub fn new(http: Client, access_token: String) -> Self {
        let base_url = Url::parse(API_BASE).expect("valid default API URL");
        Self::with_base_url(http, base_url, access_token)
    }

    pub fn with_base_url(http: Client, base_url: Url, access_token: String) -> Self {
        Self {
            http,
            base_url,
            access_token,
        }
    }

    pub fn build_request(&self, text: &str, media_ids: &[String]) -> Result<reqwest::Request> {
        self.http
            .post(self.base_url.join("2/tweets").context("invalid API base URL")?)
            .bearer_auth(&self.access_token)
            .json(&build_post_body(text, media_ids))
            .build()
            .context("failed to build post request")
    }
}

#[async_trait]
impl Publisher for PostClient {
    async fn publish(&self, text: &str, media_ids: &[String]) -> Result<String> {
        let request = self.build_request(text, media_ids)?;
        let created: CreatedPost = execute(&self.http, request, "post")
            .await?
            .json()
            .await
            .context("invalid post response")?;
        info!(post_id = %created.data.id, "created post");
        Ok(created.data.id)
    }
}
