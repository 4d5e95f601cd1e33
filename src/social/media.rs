use std::fmt;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::oauth::authorization_header;
use super::{clip_alt, execute, MediaUploader};
use crate::config::{MediaStrategy, OAuth1Keys};

const UPLOAD_BASE: &str = "https://upload.twitter.com/";

fn default_base() -> Url {
    Url::parse(UPLOAD_BASE).expect("valid default upload URL")
}

/// Bearer-token upload against the v2 media endpoint.
#[derive(Clone)]
pub struct UploadV2 {
    http: Client,
    base_url: Url,
    access_token: String,
}

impl fmt::Debug for UploadV2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadV2")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct V2Response {
    #[serde(default)]
    media_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    data: Option<Box<V2Response>>,
}

impl V2Response {
    fn into_id(self) -> Option<String> {
        self.media_id
            .or(self.id)
            .or_else(|| self.data.and_then(|d| d.into_id()))
    }
}

impl UploadV2 {
    pub fn new(http: Client, access_token: String) -> Self {
        Self::with_base_url(http, default_base(), access_token)
    }

    pub fn with_base_url(http: Client, base_url: Url, access_token: String) -> Self {
        Self {
            http,
            base_url,
            access_token,
        }
    }

    pub fn build_request(&self, bytes: &[u8], alt_text: &str) -> Result<reqwest::Request> {
        let mut body = json!({
            "media": STANDARD.encode(bytes),
            "media_category": "tweet_image",
        });
        if !alt_text.is_empty() {
            body["alt_text"] = json!({ "text": clip_alt(alt_text) });
        }
        self.http
            .post(self.base_url.join("2/media").context("invalid upload base URL")?)
            .bearer_auth(&self.access_token)
            .json(&body)
            .build()
            .context("failed to build v2 upload request")
    }
}

#[async_trait]
impl MediaUploader for UploadV2 {
    fn strategy(&self) -> MediaStrategy {
        MediaStrategy::V2
    }

    async fn upload(&self, bytes: &[u8], alt_text: &str) -> Result<String> {
        let request = self.build_request(bytes, alt_text)?;
        let parsed: V2Response = execute(&self.http, request, "v2 media upload")
            .await?
            .json()
            .await
            .context("invalid v2 upload response")?;
        let id = parsed
            .into_id()
            .ok_or_else(|| anyhow!("v2 upload response carries no media id"))?;
        debug!(media_id = %id, "uploaded media (v2)");
        Ok(id)
    }
}

/// OAuth 1.0a signed upload against the v1.1 endpoint.
#[derive(Clone)]
pub struct UploadV11 {
    http: Client,
    base_url: Url,
    keys: Option<OAuth1Keys>,
}

impl fmt::Debug for UploadV11 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadV11")
            .field("base_url", &self.base_url)
            .field("has_keys", &self.keys.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct V11Response {
    media_id_string: String,
}

impl UploadV11 {
    /// Without keys every upload fails, which lets the uploader stay in the
    /// fallback chain when only OAuth2 credentials are configured.
    pub fn new(http: Client, keys: Option<OAuth1Keys>) -> Self {
        Self::with_base_url(http, default_base(), keys)
    }

    pub fn with_base_url(http: Client, base_url: Url, keys: Option<OAuth1Keys>) -> Self {
        Self {
            http,
            base_url,
            keys,
        }
    }

    fn keys(&self) -> Result<&OAuth1Keys> {
        self.keys
            .as_ref()
            .ok_or_else(|| anyhow!("v1.1 upload needs X_API_KEY, X_API_SECRET, X_ACCESS_TOKEN and X_ACCESS_TOKEN_SECRET"))
    }

    fn signed_header(&self, url: &Url, form: &[(String, String)]) -> Result<String> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = chrono::Utc::now().timestamp();
        authorization_header(self.keys()?, "POST", url.as_str(), form, &nonce, timestamp)
    }

    pub fn build_upload_request(&self, bytes: &[u8]) -> Result<reqwest::Request> {
        let url = self
            .base_url
            .join("1.1/media/upload.json")
            .context("invalid upload base URL")?;
        let form = vec![
            ("media_category".to_string(), "tweet_image".to_string()),
            ("media_data".to_string(), STANDARD.encode(bytes)),
        ];
        let auth = self.signed_header(&url, &form)?;
        self.http
            .post(url)
            .header("Authorization", auth)
            .form(&form)
            .build()
            .context("failed to build v1.1 upload request")
    }

    pub fn build_metadata_request(&self, media_id: &str, alt_text: &str) -> Result<reqwest::Request> {
        let url = self
            .base_url
            .join("1.1/media/metadata/create.json")
            .context("invalid upload base URL")?;
        let auth = self.signed_header(&url, &[])?;
        self.http
            .post(url)
            .header("Authorization", auth)
            .json(&json!({
                "media_id": media_id,
                "alt_text": { "text": clip_alt(alt_text) },
            }))
            .build()
            .context("failed to build v1.1 metadata request")
    }
}

#[async_trait]
impl MediaUploader for UploadV11 {
    fn strategy(&self) -> MediaStrategy {
        MediaStrategy::V1_1
    }

    async fn upload(&self, bytes: &[u8], alt_text: &str) -> Result<String> {
        let request = self.build_upload_request(bytes)?;
        let parsed: V11Response = execute(&self.http, request, "v1.1 media upload")
            .await?
            .json()
            .await
            .context("invalid v1.1 upload response")?;
        let id = parsed.media_id_string;
        debug!(media_id = %id, "uploaded media (v1.1)");

        if !alt_text.is_empty() {
            let attached = match self.build_metadata_request(&id, alt_text) {
                Ok(request) => execute(&self.http, request, "v1.1 media metadata")
                    .await
                    .map(|_| ()),
                Err(err) => Err(err),
            };
            if let Err(err) = attached {
                warn!(media_id = %id, "alt text not attached: {:#}", err);
            }
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn keys() -> OAuth1Keys {
        OAuth1Keys {
            consumer_key: "ck".into(),
            consumer_secret: "cs".into(),
            token: "tk".into(),
            token_secret: "ts".into(),
        }
    }

    #[test]
    fn v2_request_is_bearer_json() {
        let uploader = UploadV2::new(Client::new(), "tok".into());
        let request = uploader.build_request(&[1, 2, 3], "caption").unwrap();
        assert_eq!(request.url().path(), "/2/media");
        assert_eq!(
            request.headers().get("Authorization").and_then(|h| h.to_str().ok()),
            Some("Bearer tok")
        );
        let body: Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(body["media"], "AQID");
        assert_eq!(body["alt_text"]["text"], "caption");
    }

    #[test]
    fn v2_alt_text_is_clipped() {
        let uploader = UploadV2::new(Client::new(), "tok".into());
        let long = "あ".repeat(1500);
        let request = uploader.build_request(&[0], &long).unwrap();
        let body: Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(
            body["alt_text"]["text"].as_str().unwrap().chars().count(),
            crate::social::ALT_TEXT_MAX_CHARS
        );
    }

    #[test]
    fn v2_response_id_shapes() {
        let flat: V2Response = serde_json::from_str(r#"{"media_id":"1"}"#).unwrap();
        assert_eq!(flat.into_id().as_deref(), Some("1"));
        let nested: V2Response = serde_json::from_str(r#"{"data":{"id":"2"}}"#).unwrap();
        assert_eq!(nested.into_id().as_deref(), Some("2"));
    }

    #[test]
    fn v11_request_is_signed_form() {
        let uploader = UploadV11::new(Client::new(), Some(keys()));
        let request = uploader.build_upload_request(&[1, 2, 3]).unwrap();
        assert_eq!(request.url().path(), "/1.1/media/upload.json");
        let auth = request
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .unwrap();
        assert!(auth.starts_with("OAuth "));
        assert!(auth.contains("oauth_signature_method=\"HMAC-SHA1\""));
        let body = std::str::from_utf8(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert!(body.contains("media_category=tweet_image"));
        assert!(body.contains("media_data=AQID"));
    }

    #[tokio::test]
    async fn v11_without_keys_fails() {
        let uploader = UploadV11::new(Client::new(), None);
        let err = uploader.upload(&[1], "").await.unwrap_err();
        assert!(err.to_string().contains("X_API_KEY"));
    }
}
