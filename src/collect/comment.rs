use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::model::Article;
use crate::text::{clip_by_length, normalize_whitespace};

/// Produces the short headline drawn on a card.
#[async_trait]
pub trait CommentWriter: Send + Sync {
    async fn write(&self, article: &Article, og_title: Option<&str>) -> Result<String>;
}

/// Derives the comment from the article headline: the publisher suffix
/// (` - Publisher`, ` | Publisher`) is removed and the rest clipped.
#[derive(Debug, Clone)]
pub struct HeadlineWriter {
    max_chars: usize,
}

impl HeadlineWriter {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

fn strip_publisher_suffix<'a>(title: &'a str, publisher: &str) -> &'a str {
    for sep in [" - ", " | ", " – ", " — ", "｜"] {
        if let Some((head, tail)) = title.rsplit_once(sep) {
            let tail = tail.trim();
            if !head.trim().is_empty() && (tail == publisher.trim() || tail.chars().count() <= 20) {
                return head.trim();
            }
        }
    }
    title
}

#[async_trait]
impl CommentWriter for HeadlineWriter {
    async fn write(&self, article: &Article, og_title: Option<&str>) -> Result<String> {
        let source = og_title
            .map(normalize_whitespace)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| normalize_whitespace(&article.title));
        let headline = strip_publisher_suffix(&source, &article.feed_title);
        let comment = clip_by_length(headline, self.max_chars);
        if comment.is_empty() {
            return Err(anyhow!("empty comment for {}", article.link));
        }
        Ok(comment)
    }
}
