//! Configuration loader and validator for the news → post pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub app: App,
    pub comment: Comment,
    pub image: Image,
    pub filters: Filters,
    pub publish: Publish,
    pub github: GitHub,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct App {
    pub data_dir: String,
    pub out_dir: String,
    pub timezone: String,
    pub utc_offset_minutes: i32,
    pub request_timeout_secs: u64,
    pub max_candidates: usize,
    pub max_per_category: usize,
}

impl Default for App {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            out_dir: "./out".into(),
            timezone: "Asia/Tokyo".into(),
            utc_offset_minutes: 540,
            request_timeout_secs: 20,
            max_candidates: 5,
            max_per_category: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Comment {
    pub max_chars: usize,
}

impl Default for Comment {
    fn default() -> Self {
        Self { max_chars: 38 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageMode {
    /// Composite onto the publisher's photo when one is usable.
    PublisherOverlay,
    /// Always draw the synthetic gradient card.
    Safe,
}

/// Card canvas settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Image {
    pub mode: ImageMode,
    pub width: u32,
    pub height: u32,
    pub footer: String,
    pub overlay: Overlay,
    pub license: License,
}

impl Default for Image {
    fn default() -> Self {
        Self {
            mode: ImageMode::PublisherOverlay,
            width: 1200,
            height: 675,
            footer: "@news-to-x".into(),
            overlay: Overlay::default(),
            license: License::default(),
        }
    }
}

/// Which publisher photos may be used as a card background. An empty
/// `allow_domains` allows every host not in `block_domains`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct License {
    pub allow_domains: Vec<String>,
    pub block_domains: Vec<String>,
    pub min_size: MinSize,
}

impl Default for License {
    fn default() -> Self {
        Self {
            allow_domains: Vec::new(),
            block_domains: Vec::new(),
            min_size: MinSize {
                width: 600,
                height: 315,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MinSize {
    pub width: u32,
    pub height: u32,
}

/// Text overlay tuning. `glyph_width_ratio` is the average advance of a
/// full-width glyph relative to the font size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Overlay {
    pub darken: f32,
    pub padding: u32,
    pub max_lines: usize,
    pub font_family: String,
    pub font_weight: u16,
    pub stroke: bool,
    pub drop_shadow: bool,
    pub max_font_size: u32,
    pub min_font_size: u32,
    pub font_step: u32,
    pub glyph_width_ratio: f32,
}

impl Default for Overlay {
    fn default() -> Self {
        Self {
            darken: 0.45,
            padding: 64,
            max_lines: 3,
            font_family: "Noto Sans CJK JP".into(),
            font_weight: 800,
            stroke: true,
            drop_shadow: true,
            max_font_size: 120,
            min_font_size: 40,
            font_step: 4,
            glyph_width_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Filters {
    pub block_domains: Vec<String>,
    pub block_words: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaStrategy {
    #[serde(rename = "v2")]
    V2,
    #[serde(rename = "v1_1")]
    V1_1,
}

impl MediaStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "v2" => Some(MediaStrategy::V2),
            "v1_1" | "v1.1" => Some(MediaStrategy::V1_1),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStrategy::V2 => "v2",
            MediaStrategy::V1_1 => "v1_1",
        }
    }

    pub fn fallback(&self) -> Self {
        match self {
            MediaStrategy::V2 => MediaStrategy::V1_1,
            MediaStrategy::V1_1 => MediaStrategy::V2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Publish {
    pub media_strategy: MediaStrategy,
}

impl Default for Publish {
    fn default() -> Self {
        Self {
            media_strategy: MediaStrategy::V2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitHub {
    pub label: String,
}

impl Default for GitHub {
    fn default() -> Self {
        Self {
            label: "news-proposal".into(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates data and out dirs if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.data_dir)?;
        fs::create_dir_all(self.cards_dir())
    }

    pub fn ledger_path(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("posted.json")
    }

    pub fn cache_path(&self) -> PathBuf {
        Path::new(&self.app.out_dir).join("latest-metadata.json")
    }

    pub fn cards_dir(&self) -> PathBuf {
        Path::new(&self.app.out_dir).join("cards")
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
/// - A missing file yields the defaults.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let cfg = match fs::read_to_string(path) {
        Ok(content) => serde_yaml::from_str(&content)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "config file not found; using defaults");
            Config::default()
        }
        Err(err) => return Err(err.into()),
    };
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.out_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.out_dir must be non-empty"));
    }
    if cfg.app.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.request_timeout_secs must be > 0"));
    }
    if cfg.app.max_candidates == 0 {
        return Err(ConfigError::Invalid("app.max_candidates must be >= 1"));
    }
    if cfg.app.max_per_category == 0 {
        return Err(ConfigError::Invalid("app.max_per_category must be >= 1"));
    }
    if !(10..=120).contains(&cfg.comment.max_chars) {
        return Err(ConfigError::Invalid("comment.max_chars must be within 10..=120"));
    }

    if !(640..=2400).contains(&cfg.image.width) {
        return Err(ConfigError::Invalid("image.width must be within 640..=2400"));
    }
    if !(360..=1350).contains(&cfg.image.height) {
        return Err(ConfigError::Invalid("image.height must be within 360..=1350"));
    }

    let license = &cfg.image.license;
    if license.min_size.width == 0 || license.min_size.height == 0 {
        return Err(ConfigError::Invalid("image.license.min_size must be at least 1x1"));
    }
    if license
        .allow_domains
        .iter()
        .chain(&license.block_domains)
        .any(|d| d.trim().is_empty())
    {
        return Err(ConfigError::Invalid("image.license domains must be non-empty"));
    }

    let ov = &cfg.image.overlay;
    if !(0.0..=1.0).contains(&ov.darken) {
        return Err(ConfigError::Invalid("image.overlay.darken must be within 0..=1"));
    }
    if ov.padding.saturating_mul(2) >= cfg.image.width {
        return Err(ConfigError::Invalid("image.overlay.padding leaves no room for text"));
    }
    if ov.max_lines == 0 {
        return Err(ConfigError::Invalid("image.overlay.max_lines must be >= 1"));
    }
    if ov.min_font_size == 0 || ov.min_font_size > ov.max_font_size {
        return Err(ConfigError::Invalid(
            "image.overlay.min_font_size must be within 1..=max_font_size",
        ));
    }
    if ov.font_step == 0 {
        return Err(ConfigError::Invalid("image.overlay.font_step must be > 0"));
    }
    if ov.glyph_width_ratio <= 0.0 {
        return Err(ConfigError::Invalid("image.overlay.glyph_width_ratio must be > 0"));
    }
    if ov.font_family.trim().is_empty() {
        return Err(ConfigError::Invalid("image.overlay.font_family must be non-empty"));
    }

    if cfg.github.label.trim().is_empty() {
        return Err(ConfigError::Invalid("github.label must be non-empty"));
    }

    Ok(())
}

/// Credentials taken from the process environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub github_token: Option<String>,
    pub github_repository: Option<String>,
    pub x_client_id: Option<String>,
    pub x_client_secret: Option<String>,
    pub x_refresh_token: Option<String>,
    pub x_api_key: Option<String>,
    pub x_api_secret: Option<String>,
    pub x_access_token: Option<String>,
    pub x_access_token_secret: Option<String>,
    pub x_media_strategy: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("github_repository", &self.github_repository)
            .field("github_token", &self.github_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// OAuth 1.0a key material for the v1.1 upload endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuth1Keys {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: String,
    pub token_secret: String,
}

impl std::fmt::Debug for OAuth1Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth1Keys").finish_non_exhaustive()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));
        Self {
            github_token: get("GITHUB_TOKEN"),
            github_repository: get("GITHUB_REPOSITORY"),
            x_client_id: get("X_CLIENT_ID"),
            x_client_secret: get("X_CLIENT_SECRET"),
            x_refresh_token: get("X_REFRESH_TOKEN"),
            x_api_key: get("X_API_KEY"),
            x_api_secret: get("X_API_SECRET"),
            x_access_token: get("X_ACCESS_TOKEN"),
            x_access_token_secret: get("X_ACCESS_TOKEN_SECRET"),
            x_media_strategy: get("X_MEDIA_STRATEGY"),
        }
    }

    /// `(owner, repo, token)` when the issue tracker is usable.
    pub fn github(&self) -> Option<(String, String, String)> {
        let token = self.github_token.clone()?;
        let repository = self.github_repository.as_deref()?;
        let (owner, repo) = repository.split_once('/')?;
        if owner.is_empty() || repo.is_empty() {
            return None;
        }
        Some((owner.to_string(), repo.to_string(), token))
    }

    /// Settings the publish run cannot start without.
    pub fn require_oauth2(&self) -> Result<(String, String, String), ConfigError> {
        let client_id = self.x_client_id.clone().ok_or(ConfigError::Missing("X_CLIENT_ID"))?;
        let client_secret = self
            .x_client_secret
            .clone()
            .ok_or(ConfigError::Missing("X_CLIENT_SECRET"))?;
        let refresh = self
            .x_refresh_token
            .clone()
            .ok_or(ConfigError::Missing("X_REFRESH_TOKEN"))?;
        Ok((client_id, client_secret, refresh))
    }

    pub fn oauth1(&self) -> Option<OAuth1Keys> {
        Some(OAuth1Keys {
            consumer_key: self.x_api_key.clone()?,
            consumer_secret: self.x_api_secret.clone()?,
            token: self.x_access_token.clone()?,
            token_secret: self.x_access_token_secret.clone()?,
        })
    }

    /// Environment override wins over the YAML setting.
    pub fn media_strategy(&self, cfg: &Config) -> Result<MediaStrategy, ConfigError> {
        match self.x_media_strategy.as_deref() {
            Some(raw) => MediaStrategy::parse(raw)
                .ok_or(ConfigError::Invalid("X_MEDIA_STRATEGY must be v2 or v1_1")),
            None => Ok(cfg.publish.media_strategy),
        }
    }
}

/// Returns an example YAML document with every setting spelled out.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  out_dir: "./out"
  timezone: "Asia/Tokyo"
  utc_offset_minutes: 540
  request_timeout_secs: 20
  max_candidates: 5
  max_per_category: 2

comment:
  max_chars: 38

image:
  mode: publisher_overlay
  width: 1200
  height: 675
  footer: "@news-to-x"
  overlay:
    darken: 0.45
    padding: 64
    max_lines: 3
    font_family: "Noto Sans CJK JP"
    font_weight: 800
    stroke: true
    drop_shadow: true
    max_font_size: 120
    min_font_size: 40
    font_step: 4
    glyph_width_ratio: 1.0
  license:
    allow_domains: []
    block_domains:
      - "stock-photos.example"
    min_size:
      width: 600
      height: 315

filters:
  block_domains:
    - "example-tabloid.com"
  block_words:
    - "PR"

publish:
  media_strategy: v2

github:
  label: "news-proposal"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.publish.media_strategy, MediaStrategy::V2);
        assert_eq!(cfg.filters.block_domains, vec!["example-tabloid.com"]);
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let cfg: Config = serde_yaml::from_str("comment:\n  max_chars: 50\n").unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.comment.max_chars, 50);
        assert_eq!(cfg.image.width, 1200);
        assert_eq!(cfg.image.overlay.max_lines, 3);
    }

    #[test]
    fn invalid_font_range() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.image.overlay.min_font_size = 200;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("min_font_size")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.image.overlay.font_step = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_canvas_and_limits() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.image.width = 100;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.image.overlay.padding = 700;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.comment.max_chars = 5;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.max_candidates = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn image_license_settings() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        assert!(cfg.image.license.allow_domains.is_empty());
        assert_eq!(cfg.image.license.block_domains, vec!["stock-photos.example"]);
        assert_eq!(cfg.image.license.min_size, MinSize { width: 600, height: 315 });

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.image.license.min_size.height = 0;
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("min_size")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.image.license.allow_domains.push("  ".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let td = tempdir().unwrap();
        let cfg = load(Some(&td.path().join("absent.yaml"))).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.ledger_path(), Path::new("./data").join("posted.json"));
        assert_eq!(cfg.cache_path(), Path::new("./out").join("latest-metadata.json"));
    }

    #[test]
    fn ensure_dirs_creates_data_and_cards_dirs() {
        let td = tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.app.data_dir = td.path().join("data").to_string_lossy().to_string();
        cfg.app.out_dir = td.path().join("out").to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(td.path().join("data").exists());
        assert!(td.path().join("out").join("cards").exists());
    }

    #[test]
    fn credentials_require_oauth2_settings() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("X_CLIENT_ID", "id"),
            ("X_CLIENT_SECRET", "  "),
            ("GITHUB_TOKEN", "t"),
            ("GITHUB_REPOSITORY", "owner/repo"),
        ]);
        let creds = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        let err = creds.require_oauth2().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("X_CLIENT_SECRET")));
        assert_eq!(
            creds.github(),
            Some(("owner".into(), "repo".into(), "t".into()))
        );
        assert!(creds.oauth1().is_none());
    }

    #[test]
    fn media_strategy_env_override() {
        let cfg = Config::default();
        let creds = Credentials::from_lookup(|k| (k == "X_MEDIA_STRATEGY").then(|| "V1_1".into()));
        assert_eq!(creds.media_strategy(&cfg).unwrap(), MediaStrategy::V1_1);
        assert_eq!(MediaStrategy::V1_1.fallback(), MediaStrategy::V2);

        let creds = Credentials::from_lookup(|k| (k == "X_MEDIA_STRATEGY").then(|| "v3".into()));
        assert!(creds.media_strategy(&cfg).is_err());
    }
}
