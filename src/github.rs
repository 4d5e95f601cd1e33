use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info, warn};

const GITHUB_API_BASE: &str = "https://api.github.com/";

/// Issue tracker used as the externally stored copy of a batch.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<CreatedIssue>;

    async fn update_issue(&self, number: u64, body: &str) -> Result<()>;

    /// Body of issue `number` (empty when the issue has none).
    async fn fetch_issue(&self, number: u64) -> Result<String>;

    async fn comment(&self, number: u64, body: &str) -> Result<()>;

    async fn ensure_label(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedIssue {
    pub number: u64,
    pub html_url: String,
}

#[derive(Deserialize)]
struct IssueResponse {
    #[serde(default)]
    body: Option<String>,
}

#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    base_url: Url,
    owner: String,
    repo: String,
    token: String,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    pub fn new(http: Client, owner: String, repo: String, token: String) -> Self {
        let base_url = Url::parse(GITHUB_API_BASE).expect("valid default GitHub URL");
        Self::with_base_url(http, base_url, owner, repo, token)
    }

    pub fn with_base_url(
        http: Client,
        base_url: Url,
        owner: String,
        repo: String,
        token: String,
    ) -> Self {
        Self {
            http,
            base_url,
            owner,
            repo,
            token,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(&format!("repos/{}/{}/{}", self.owner, self.repo, path))
            .context("invalid GitHub base URL")
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Request> {
        let mut builder = self
            .http
            .request(method, self.endpoint(path)?)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "news-autopost")
            .header("Accept", "application/vnd.github+json");
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder.build().context("failed to build GitHub request")
    }

    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "github request");
        let res = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("failed to reach GitHub: {method} {url}"))?;
        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("Rate limited by GitHub: {}", body);
            return Err(anyhow!("received 429 from GitHub: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("github error {} for {} {}: {}", status, method, url, body));
        }
        Ok(res)
    }
}

#[async_trait]
impl IssueTracker for GitHubClient {
    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<CreatedIssue> {
        let payload = build_create_issue_body(title, body, labels);
        let request = self.build_request(Method::POST, "issues", Some(&payload))?;
        let created: CreatedIssue = self
            .execute(request)
            .await?
            .json()
            .await
            .context("invalid GitHub create-issue response")?;
        info!(number = created.number, url = %created.html_url, "created issue");
        Ok(created)
    }

    async fn update_issue(&self, number: u64, body: &str) -> Result<()> {
        let payload = json!({ "body": body });
        let request =
            self.build_request(Method::PATCH, &format!("issues/{number}"), Some(&payload))?;
        self.execute(request).await?;
        Ok(())
    }

    async fn fetch_issue(&self, number: u64) -> Result<String> {
        let request = self.build_request(Method::GET, &format!("issues/{number}"), None)?;
        let issue: IssueResponse = self
            .execute(request)
            .await?
            .json()
            .await
            .context("invalid GitHub issue response")?;
        Ok(issue.body.unwrap_or_default())
    }

    async fn comment(&self, number: u64, body: &str) -> Result<()> {
        let payload = json!({ "body": body });
        let request = self.build_request(
            Method::POST,
            &format!("issues/{number}/comments"),
            Some(&payload),
        )?;
        self.execute(request).await?;
        Ok(())
    }

    async fn ensure_label(&self, name: &str) -> Result<()> {
        let request = self.build_request(Method::GET, &format!("labels/{name}"), None)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach GitHub")?;
        if res.status().is_success() {
            return Ok(());
        }
        if res.status() != StatusCode::NOT_FOUND {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("label lookup failed {}: {}", status, body));
        }
        let payload = json!({
            "name": name,
            "color": "8c8c8c",
            "description": "News post candidates awaiting review",
        });
        let request = self.build_request(Method::POST, "labels", Some(&payload))?;
        self.execute(request).await?;
        info!(label = name, "created label");
        Ok(())
    }
}

pub fn build_create_issue_body(title: &str, body: &str, labels: &[String]) -> Value {
    json!({
        "title": title,
        "body": body,
        "labels": labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GitHubClient {
        GitHubClient::new(Client::new(), "octo".into(), "news".into(), "secret".into())
    }

    #[test]
    fn build_request_sets_headers() {
        let request = client()
            .build_request(Method::PATCH, "issues/12", Some(&json!({ "body": "x" })))
            .unwrap();
        assert_eq!(request.method(), Method::PATCH);
        assert_eq!(request.url().path(), "/repos/octo/news/issues/12");
        let headers = request.headers();
        assert_eq!(
            headers.get("Authorization").and_then(|h| h.to_str().ok()),
            Some("Bearer secret")
        );
        assert_eq!(
            headers.get("Accept").and_then(|h| h.to_str().ok()),
            Some("application/vnd.github+json")
        );
        assert_eq!(
            headers.get("Content-Type").and_then(|h| h.to_str().ok()),
            Some("application/json")
        );
    }

    #[test]
    fn create_issue_body_carries_labels() {
        let body = build_create_issue_body("t", "b", &["news-proposal".to_string()]);
        assert_eq!(body["labels"][0], "news-proposal");
        assert_eq!(body["title"], "t");
    }

    #[test]
    fn debug_redacts_token() {
        let rendered = format!("{:?}", client());
        assert!(!rendered.contains("secret"));
    }
}
