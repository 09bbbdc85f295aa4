//! Configuration loader and validator for the scrape → post pipeline.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable consulted when `post.bot_token` is left empty.
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub paths: Paths,
    pub scraper: Scraper,
    pub post: Post,
}

/// Where batch artifacts and the publish state live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Paths {
    #[serde(default = "default_sync_dir")]
    pub sync_dir: String,
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: String,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            sync_dir: default_sync_dir(),
            outbox_dir: default_outbox_dir(),
        }
    }
}

/// Catalog scraping settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scraper {
    /// 0 means unbounded.
    #[serde(default)]
    pub max_products_per_category: usize,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_name_selector")]
    pub name_selector: String,
    #[serde(default = "default_container_tag")]
    pub container_tag: String,
    #[serde(default = "default_currency_marker")]
    pub currency_marker: String,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
}

/// Telegram publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    #[serde(default)]
    pub bot_token: String,
    pub post_chat: String,
    #[serde(default = "default_posts_per_run")]
    pub posts_per_run: usize,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_publish_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_promo_line")]
    pub promo_line: String,
    #[serde(default)]
    pub batch_policy: BatchPolicy,
}

/// What the publisher does when a newer post batch appears before the one in
/// the checkpoint is used up.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Keep publishing the checkpointed batch until it is exhausted, then
    /// start the newest batch from its first post.
    #[default]
    FinishCurrent,
    /// Always publish the newest batch, keeping the positional index.
    FollowLatest,
}

fn default_sync_dir() -> String {
    "./SYNC".into()
}
fn default_outbox_dir() -> String {
    "./SYNC/outbox".into()
}
fn default_fetch_timeout() -> u64 {
    20
}
fn default_publish_timeout() -> u64 {
    30
}
fn default_concurrency() -> usize {
    1
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".into()
}
fn default_name_selector() -> String {
    "h2.name".into()
}
fn default_container_tag() -> String {
    "li".into()
}
fn default_currency_marker() -> String {
    "TL".into()
}
fn default_posts_per_run() -> usize {
    5
}
fn default_state_file() -> String {
    "post_state.json".into()
}
fn default_promo_line() -> String {
    "Trend Ürünler Market avantajlı ürünler!".into()
}

impl Config {
    /// Ensure the product and post batch directories exist.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.paths.sync_dir)?;
        fs::create_dir_all(&self.paths.outbox_dir)
    }

    /// Publish state lives next to the post batches.
    pub fn state_path(&self) -> PathBuf {
        Path::new(&self.paths.outbox_dir).join(&self.post.state_file)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
/// - An empty `post.bot_token` is filled from `TELEGRAM_BOT_TOKEN`.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    apply_token_override(&mut cfg, std::env::var(BOT_TOKEN_ENV).ok());
    validate(&cfg)?;
    Ok(cfg)
}

fn apply_token_override(cfg: &mut Config, env_token: Option<String>) {
    if !cfg.post.bot_token.trim().is_empty() {
        return;
    }
    if let Some(token) = env_token.filter(|t| !t.trim().is_empty()) {
        cfg.post.bot_token = token;
    }
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.paths.sync_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("paths.sync_dir must be non-empty"));
    }
    if cfg.paths.outbox_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("paths.outbox_dir must be non-empty"));
    }

    let sc = &cfg.scraper;
    if sc.timeout_secs == 0 {
        return Err(ConfigError::Invalid("scraper.timeout_secs must be > 0"));
    }
    if sc.concurrency == 0 {
        return Err(ConfigError::Invalid("scraper.concurrency must be > 0"));
    }
    if sc.name_selector.trim().is_empty() {
        return Err(ConfigError::Invalid("scraper.name_selector must be non-empty"));
    }
    if scraper::Selector::parse(&sc.name_selector).is_err() {
        return Err(ConfigError::Invalid("scraper.name_selector is not a valid CSS selector"));
    }
    if sc.container_tag.trim().is_empty() {
        return Err(ConfigError::Invalid("scraper.container_tag must be non-empty"));
    }
    if sc.categories.values().any(|url| url.trim().is_empty()) {
        return Err(ConfigError::Invalid("scraper.categories urls must be non-empty"));
    }

    let p = &cfg.post;
    if p.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("post.bot_token must be non-empty"));
    }
    if p.post_chat.trim().is_empty() {
        return Err(ConfigError::Invalid("post.post_chat must be non-empty"));
    }
    if p.posts_per_run == 0 {
        return Err(ConfigError::Invalid("post.posts_per_run must be > 0"));
    }
    if p.state_file.trim().is_empty() {
        return Err(ConfigError::Invalid("post.state_file must be non-empty"));
    }
    if p.timeout_secs == 0 {
        return Err(ConfigError::Invalid("post.timeout_secs must be > 0"));
    }

    Ok(())
}

/// Returns a complete sample configuration.
pub fn example() -> &'static str {
    r#"paths:
  sync_dir: "./SYNC"
  outbox_dir: "./SYNC/outbox"

scraper:
  max_products_per_category: 30
  timeout_secs: 20
  concurrency: 2
  categories:
    elektronik: "https://www.trendurunlermarket.com/elektronik"
    ev-yasam: "https://www.trendurunlermarket.com/ev-yasam"

post:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  post_chat: "@trend_urunler"
  posts_per_run: 5
  state_file: "post_state.json"
"#
}
