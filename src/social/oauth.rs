//! OAuth helpers: OAuth 2.0 refresh for the bearer-token endpoints and
//! OAuth 1.0a HMAC-SHA1 request signing for the v1.1 upload endpoint.
use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha1::Sha1;
use tracing::warn;

use crate::config::OAuth1Keys;

const TOKEN_URL: &str = "https://api.x.com/2/oauth2/token";

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
}

/// Exchange a refresh token for an access token.
pub async fn refresh_access_token(
    http: &Client,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<AccessToken> {
    let res = http
        .post(TOKEN_URL)
        .basic_auth(client_id, Some(client_secret))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ])
        .send()
        .await
        .context("failed to reach token endpoint")?;
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(anyhow!("token refresh failed {}: {}", status, body));
    }
    let token: TokenResponse = res.json().await.context("invalid token response")?;
    if token
        .refresh_token
        .as_deref()
        .is_some_and(|rotated| rotated != refresh_token)
    {
        warn!("refresh token was rotated; update the stored X_REFRESH_TOKEN secret");
    }
    Ok(AccessToken {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_in: token.expires_in,
    })
}

/// RFC 3986 percent-encoding as OAuth 1.0a requires.
fn enc(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Signature base string over the OAuth and request parameters.
pub fn signature_base(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> =
        params.iter().map(|(k, v)| (enc(k), enc(v))).collect();
    encoded.sort();
    let joined = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}&{}&{}", method.to_ascii_uppercase(), enc(url), enc(&joined))
}

pub fn sign(base: &str, consumer_secret: &str, token_secret: &str) -> Result<String> {
    let key = format!("{}&{}", enc(consumer_secret), enc(token_secret));
    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
        .map_err(|err| anyhow!("invalid HMAC key: {err}"))?;
    mac.update(base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// `Authorization` header for a request whose form body is `body_params`
/// (empty for JSON bodies).
pub fn authorization_header(
    keys: &OAuth1Keys,
    method: &str,
    url: &str,
    body_params: &[(String, String)],
    nonce: &str,
    timestamp: i64,
) -> Result<String> {
    let mut oauth: Vec<(String, String)> = vec![
        ("oauth_consumer_key".into(), keys.consumer_key.clone()),
        ("oauth_nonce".into(), nonce.to_string()),
        ("oauth_signature_method".into(), "HMAC-SHA1".into()),
        ("oauth_timestamp".into(), timestamp.to_string()),
        ("oauth_token".into(), keys.token.clone()),
        ("oauth_version".into(), "1.0".into()),
    ];
    let mut all = oauth.clone();
    all.extend(body_params.iter().cloned());
    let signature = sign(
        &signature_base(method, url, &all),
        &keys.consumer_secret,
        &keys.token_secret,
    )?;
    oauth.push(("oauth_signature".into(), signature));
    let header = oauth
        .iter()
        .map(|(k, v)| format!(r#"{}="{}""#, enc(k), enc(v)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("OAuth {header}"))
}
