use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use tracing::{debug, info, warn};

use crate::config::Filters;
use crate::ledger::url_hash;
use crate::model::{Article, FeedSource};
use crate::text::{clip_by_length, contains_blocked_word, normalize_whitespace};

pub const TITLE_MAX_CHARS: usize = 160;
const SNIPPET_MAX_CHARS: usize = 400;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));

/// Read the feed list. A missing file is an error: there is nothing to
/// collect without it.
pub async fn load_sources(path: &Path) -> Result<Vec<FeedSource>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read feed list {}", path.display()))?;
    let sources: Vec<FeedSource> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid feed list {}", path.display()))?;
    for source in &sources {
        Url::parse(&source.url)
            .map_err(|err| anyhow!("feed {:?} has an invalid url: {}", source.title, err))?;
    }
    Ok(sources)
}

/// Parse an RSS/Atom/JSON feed document into articles.
pub fn parse_feed(bytes: &[u8], source: &FeedSource) -> Result<Vec<Article>> {
    let feed = feed_rs::parser::parse(bytes).context("failed to parse feed")?;
    let articles = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))
                .filter(|l| !l.is_empty())?;
            let title = normalize_whitespace(&entry.title.map(|t| t.content).unwrap_or_default());
            if title.is_empty() {
                return None;
            }
            let snippet = entry
                .summary
                .map(|t| t.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .map(|html| normalize_whitespace(&TAG.replace_all(&html, " ")))
                .unwrap_or_default();
            Some(Article {
                url_hash: url_hash(&link),
                title: clip_by_length(&title, TITLE_MAX_CHARS),
                link,
                published: entry.published.or(entry.updated),
                snippet: snippet.chars().take(SNIPPET_MAX_CHARS).collect(),
                feed_title: source.title.clone(),
                category: source.category.clone(),
            })
        })
        .collect();
    Ok(articles)
}

pub async fn fetch_feed(http: &Client, source: &FeedSource, timeout: Duration) -> Result<Vec<Article>> {
    let res = http
        .get(&source.url)
        .timeout(timeout)
        .header("Accept", "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8")
        .send()
        .await
        .with_context(|| format!("failed to fetch feed {}", source.url))?;
    if !res.status().is_success() {
        return Err(anyhow!("feed {} returned {}", source.url, res.status()));
    }
    let bytes = res.bytes().await.context("failed to read feed body")?;
    parse_feed(&bytes, source)
}

/// Fetch every source concurrently. A failing source is logged and
/// contributes nothing.
pub async fn fetch_all(http: &Client, sources: &[FeedSource], timeout: Duration) -> Vec<Article> {
    let results = join_all(sources.iter().map(|source| async move {
        (source, fetch_feed(http, source, timeout).await)
    }))
    .await;
    let mut articles = Vec::new();
    for (source, result) in results {
        match result {
            Ok(items) => {
                debug!(feed = %source.title, items = items.len(), "feed fetched");
                articles.extend(items);
            }
            Err(err) => warn!(feed = %source.title, "feed skipped: {:#}", err),
        }
    }
    info!(sources = sources.len(), articles = articles.len(), "feeds fetched");
    articles
}

/// Host (without a leading `www.`) equals one of `domains` or is a
/// subdomain of one.
pub fn matches_domain(link: &str, domains: &[String]) -> bool {
    let Some(host) = Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    else {
        return false;
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);
    domains.iter().any(|domain| {
        let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
        !domain.is_empty() && (host == domain || host.ends_with(&format!(".{domain}")))
    })
}

/// Newest first, undated last, ties broken by link.
fn by_recency(a: &Article, b: &Article) -> Ordering {
    match (a.published, b.published) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.link.cmp(&b.link))
}

/// Filter, order and cap the collected articles. The result depends only
/// on the input set, not on the order feeds completed in.
pub fn select(
    mut articles: Vec<Article>,
    filters: &Filters,
    published: &HashSet<String>,
    max_candidates: usize,
    max_per_category: usize,
) -> Vec<Article> {
    articles.sort_by(by_recency);
    let mut seen = HashSet::new();
    let mut per_category: HashMap<String, usize> = HashMap::new();
    let mut selected = Vec::new();
    for article in articles {
        if selected.len() >= max_candidates {
            break;
        }
        if !seen.insert(article.url_hash.clone()) {
            continue;
        }
        if published.contains(&article.url_hash) {
            debug!(link = %article.link, "already published");
            continue;
        }
        if matches_domain(&article.link, &filters.block_domains) {
            debug!(link = %article.link, "blocked domain");
            continue;
        }
        let haystack = format!("{} {}", article.title, article.snippet);
        if let Some(word) = contains_blocked_word(&haystack, &filters.block_words) {
            info!(word, title = %article.title, "blocked word; dropped");
            continue;
        }
        let count = per_category.entry(article.category.clone()).or_default();
        if *count >= max_per_category {
            continue;
        }
        *count += 1;
        selected.push(article);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn source() -> FeedSource {
        FeedSource {
            title: "Example Wire".into(),
            url: "https://feeds.example/rss".into(),
            category: "economy".into(),
            language: None,
        }
    }

    fn article(link: &str, category: &str, hour: Option<u32>) -> Article {
        Article {
            url_hash: url_hash(link),
            title: format!("title {link}"),
            link: link.into(),
            published: hour.map(|h| Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap()),
            snippet: String::new(),
            feed_title: "Feed".into(),
            category: category.into(),
        }
    }

    #[test]
    fn parses_rss_items() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Wire</title>
<item><title>  Rates   rise </title><link>https://news.example/a</link>
<description>&lt;p&gt;Central bank &lt;b&gt;moves&lt;/b&gt;&lt;/p&gt;</description>
<pubDate>Wed, 01 May 2024 09:00:00 GMT</pubDate></item>
<item><title></title><link>https://news.example/empty</link></item>
</channel></rss>"#;
        let articles = parse_feed(rss.as_bytes(), &source()).unwrap();
        assert_eq!(articles.len(), 1);
        let a = &articles[0];
        assert_eq!(a.title, "Rates rise");
        assert_eq!(a.link, "https://news.example/a");
        assert_eq!(a.snippet, "Central bank moves");
        assert_eq!(a.category, "economy");
        assert_eq!(a.feed_title, "Example Wire");
        assert!(a.published.is_some());
    }

    #[test]
    fn garbage_feed_is_an_error() {
        assert!(parse_feed(b"not a feed", &source()).is_err());
    }

    #[test]
    fn domain_blocking_covers_subdomains() {
        let blocked = vec!["tabloid.example".to_string()];
        assert!(matches_domain("https://www.tabloid.example/x", &blocked));
        assert!(matches_domain("https://m.tabloid.example/x", &blocked));
        assert!(!matches_domain("https://nottabloid.example/x", &blocked));
        assert!(!matches_domain("not a url", &blocked));
    }

    #[test]
    fn selection_is_independent_of_input_order() {
        let items = vec![
            article("https://a.example/1", "economy", Some(1)),
            article("https://a.example/2", "economy", Some(5)),
            article("https://a.example/3", "economy", Some(3)),
            article("https://a.example/4", "sports", None),
            article("https://a.example/5", "sports", Some(2)),
        ];
        let mut reversed = items.clone();
        reversed.reverse();
        let filters = Filters::default();
        let none = HashSet::new();
        let a = select(items, &filters, &none, 3, 2);
        let b = select(reversed, &filters, &none, 3, 2);
        assert_eq!(a, b);
        let links: Vec<_> = a.iter().map(|x| x.link.as_str()).collect();
        assert_eq!(
            links,
            vec!["https://a.example/2", "https://a.example/3", "https://a.example/5"]
        );
    }

    #[test]
    fn selection_drops_published_duplicates_and_blocked() {
        let items = vec![
            article("https://a.example/1", "x", Some(1)),
            article("https://a.example/1", "x", Some(1)),
            article("https://bad.example/2", "x", Some(2)),
            article("https://a.example/3", "x", Some(3)),
        ];
        let filters = Filters {
            block_domains: vec!["bad.example".into()],
            block_words: Vec::new(),
        };
        let published = HashSet::from([url_hash("https://a.example/3")]);
        let selected = select(items, &filters, &published, 10, 10);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].link, "https://a.example/1");
    }
}
