use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use image::ImageReader;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use tracing::{debug, warn};

use super::feeds::matches_domain;
use crate::config::{License, MinSize};

/// Smallest body accepted as a usable background photo.
const MIN_IMAGE_BYTES: usize = 1024;

static META: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("valid meta regex"));
static ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z:_-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid attr regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OgMetadata {
    pub title: Option<String>,
    pub image: Option<String>,
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Extract `og:title` and `og:image` (or `twitter:image`) from a page,
/// resolving a relative image against `page_url`.
pub fn parse_og(html: &str, page_url: &Url) -> OgMetadata {
    let mut props: HashMap<String, String> = HashMap::new();
    for tag in META.find_iter(html) {
        let mut key = None;
        let mut content = None;
        for cap in ATTR.captures_iter(tag.as_str()) {
            let name = cap[1].to_ascii_lowercase();
            let value = cap.get(2).or_else(|| cap.get(3)).map(|m| m.as_str());
            match name.as_str() {
                "property" | "name" => key = value.map(str::to_ascii_lowercase),
                "content" => content = value.map(decode_entities),
                _ => {}
            }
        }
        if let (Some(key), Some(content)) = (key, content) {
            let content = content.trim().to_string();
            if !content.is_empty() {
                props.entry(key).or_insert(content);
            }
        }
    }
    let image = props
        .get("og:image")
        .or_else(|| props.get("twitter:image"))
        .and_then(|raw| page_url.join(raw).ok())
        .map(|u| u.to_string());
    OgMetadata {
        title: props.get("og:title").cloned(),
        image,
    }
}

/// Best effort: any failure yields `None`.
pub async fn scrape(http: &Client, url: &str, timeout: Duration) -> Option<OgMetadata> {
    let page_url = Url::parse(url).ok()?;
    let res = match http
        .get(page_url.clone())
        .timeout(timeout)
        .header("Accept", "text/html,application/xhtml+xml")
        .send()
        .await
    {
        Ok(res) => res,
        Err(err) => {
            warn!(%url, %err, "og fetch failed");
            return None;
        }
    };
    if !res.status().is_success() {
        warn!(%url, status = %res.status(), "og fetch failed");
        return None;
    }
    let html = res.text().await.ok()?;
    let og = parse_og(&html, &page_url);
    debug!(%url, ?og, "og parsed");
    Some(og)
}

/// Download a candidate background. Non-image responses and tiny bodies
/// are rejected; decoding happens later, at render time.
pub async fn fetch_image(http: &Client, url: &str, referer: &str, timeout: Duration) -> Result<Vec<u8>> {
    let res = http
        .get(url)
        .timeout(timeout)
        .header("Referer", referer)
        .send()
        .await
        .with_context(|| format!("failed to fetch image {url}"))?;
    if !res.status().is_success() {
        return Err(anyhow!("image {} returned {}", url, res.status()));
    }
    let content_type = res
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.is_empty() && !content_type.starts_with("image/") {
        return Err(anyhow!("{url} is {content_type}, not an image"));
    }
    let bytes = res.bytes().await.context("failed to read image body")?;
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(anyhow!("image {} is too small ({} bytes)", url, bytes.len()));
    }
    Ok(bytes.to_vec())
}

/// Host rules of `image.license`: the image host must match an allowed
/// domain when any are listed, and no blocked one.
pub fn license_allows_host(image_url: &str, license: &License) -> bool {
    let allowed =
        license.allow_domains.is_empty() || matches_domain(image_url, &license.allow_domains);
    allowed && !matches_domain(image_url, &license.block_domains)
}

/// Pixel size read from the image header; smaller than `min` is an error.
pub fn check_dimensions(bytes: &[u8], min: MinSize) -> Result<(u32, u32)> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("failed to sniff image format")?
        .into_dimensions()
        .context("failed to read image dimensions")?;
    if width < min.width || height < min.height {
        bail!(
            "image is {}x{}, below the {}x{} minimum",
            width,
            height,
            min.width,
            min.height
        );
    }
    Ok((width, height))
}

/// Fetch the publisher photo for a card background if the licence policy
/// permits its host and its size. Any error means the card is drawn
/// without a photo.
pub async fn resolve_publisher_image(
    http: &Client,
    image_url: &str,
    referer: &str,
    license: &License,
    timeout: Duration,
) -> Result<Vec<u8>> {
    if !license_allows_host(image_url, license) {
        bail!("{image_url} is not an allowed image host");
    }
    let bytes = fetch_image(http, image_url, referer, timeout).await?;
    let (width, height) = check_dimensions(&bytes, license.min_size)?;
    debug!(%image_url, width, height, "publisher image accepted");
    Ok(bytes)
}
