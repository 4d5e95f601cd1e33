//! Small string helpers shared by ingestion, the card renderer and the codec.
use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Collapse whitespace runs into a single space and trim.
pub fn normalize_whitespace(input: &str) -> String {
    WHITESPACE.replace_all(input, " ").trim().to_string()
}

/// Clip to `max_chars` characters, ending with `…` when anything was cut.
pub fn clip_by_length(input: &str, max_chars: usize) -> String {
    let count = input.chars().count();
    if count <= max_chars {
        return input.to_string();
    }
    if max_chars <= 1 {
        return input.chars().take(max_chars).collect();
    }
    let mut clipped: String = input.chars().take(max_chars - 1).collect();
    clipped.push('…');
    clipped
}

/// First configured word contained in `input`, if any.
pub fn contains_blocked_word<'a>(input: &str, blocked: &'a [String]) -> Option<&'a str> {
    let normalized = normalize_whitespace(input);
    blocked
        .iter()
        .map(|w| w.trim())
        .find(|w| !w.is_empty() && normalized.contains(w))
}

/// Escape text for inclusion in XML/SVG character data and attributes.
pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
