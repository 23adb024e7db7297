// src/config.rs
//! Aggregator configuration: one explicit object handed to every component at
//! construction time.
//!
//! Lookup order:
//! 1) $AGGREGATOR_CONFIG_PATH (must exist if set)
//! 2) config/aggregator.toml
//! 3) built-in defaults
//!
//! After loading, `GITHUB_TOKEN`, `AGGREGATOR_DATA_DIR` and `BIND_ADDR`
//! override the corresponding fields.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::classify::ClassifierConfig;

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_DATA_DIR: &str = "AGGREGATOR_DATA_DIR";
pub const ENV_BIND_ADDR: &str = "BIND_ADDR";
pub const DEFAULT_CONFIG_PATH: &str = "config/aggregator.toml";

const DEFAULT_RETENTION_DAYS: i64 = 60;
/// About a century; anything longer is a typo.
const MAX_RETENTION_DAYS: i64 = 36_500;
const DEFAULT_USER_AGENT: &str = concat!("devrel-aggregator/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub data_dir: PathBuf,
    pub bind_addr: String,
    /// API response cache lifetime.
    pub cache_ttl_secs: u64,
    /// 0 disables the background scheduler.
    pub update_interval_secs: u64,
    pub retention_days: i64,
    pub timeout_per_source_secs: u64,
    pub group_ceiling_secs: u64,
    pub http: HttpConfig,
    pub github: GithubConfig,
    pub feeds: FeedsConfig,
    pub boards: BoardsConfig,
    pub classifier: ClassifierConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            bind_addr: "0.0.0.0:8000".to_string(),
            cache_ttl_secs: 3600,
            update_interval_secs: 0,
            retention_days: DEFAULT_RETENTION_DAYS,
            timeout_per_source_secs: 30,
            group_ceiling_secs: 120,
            http: HttpConfig::default(),
            github: GithubConfig::default(),
            feeds: FeedsConfig::default(),
            boards: BoardsConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl AggregatorConfig {
    pub fn timeout_per_source(&self) -> Duration {
        Duration::from_secs(self.timeout_per_source_secs)
    }

    pub fn group_ceiling(&self) -> Duration {
        Duration::from_secs(self.group_ceiling_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Job retention window. Out-of-range values are clamped; `parse`
    /// already rejects them for file-based configs.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days.clamp(1, MAX_RETENTION_DAYS))
    }

    /// Load from an explicit TOML file, then apply env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading aggregator config from {}", path.display()))?;
        let mut cfg = Self::parse(&content)
            .with_context(|| format!("parsing aggregator config {}", path.display()))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Env path, then `config/aggregator.toml`, then defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make the pipeline misbehave silently.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(anyhow!(
                "retention_days must be between 1 and {MAX_RETENTION_DAYS}, got {}",
                self.retention_days
            ));
        }
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(ENV_GITHUB_TOKEN) {
            let token = token.trim();
            if !token.is_empty() {
                self.github.token = Some(token.to_string());
            }
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir.trim());
            }
        }
        if let Ok(addr) = std::env::var(ENV_BIND_ADDR) {
            if !addr.trim().is_empty() {
                self.bind_addr = addr.trim().to_string();
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchTerm {
    pub query: String,
    #[serde(default = "default_min_stars")]
    pub min_stars: u64,
}

fn default_min_stars() -> u64 {
    10
}

impl SearchTerm {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            min_stars: default_min_stars(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub api_base: String,
    pub token: Option<String>,
    pub terms: Vec<SearchTerm>,
    pub per_term_limit: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Sleep until reset once `x-ratelimit-remaining` drops below this.
    pub min_remaining: u64,
    pub max_rate_limit_wait_secs: u64,
    pub term_delay_ms: u64,
}

// Hand-written so the bearer credential never reaches a log line.
impl std::fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubConfig")
            .field("api_base", &self.api_base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("terms", &self.terms)
            .field("per_term_limit", &self.per_term_limit)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token: None,
            terms: vec![
                SearchTerm::new("awesome devrel"),
                SearchTerm::new("devrel resources"),
                SearchTerm::new("\"developer relations\" handbook"),
                SearchTerm::new("developer experience resources"),
            ],
            per_term_limit: 5,
            max_attempts: 3,
            base_delay_ms: 2_000,
            min_remaining: 3,
            max_rate_limit_wait_secs: 120,
            term_delay_ms: 2_000,
        }
    }
}

/// One logical feed source with mirror URLs tried in order.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSource {
    pub name: String,
    pub candidates: Vec<String>,
    #[serde(default = "default_true")]
    pub devrel_specific: bool,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_items() -> usize {
    20
}

impl FeedSource {
    pub fn new(name: &str, candidates: &[&str], devrel_specific: bool) -> Self {
        Self {
            name: name.to_string(),
            candidates: candidates.iter().map(|s| s.to_string()).collect(),
            devrel_specific,
            max_items: default_max_items(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    pub sources: Vec<FeedSource>,
    /// Terms counted by the relevance score.
    pub relevance_terms: Vec<String>,
    pub excerpt_max_chars: usize,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                FeedSource::new("dev.to", &["https://dev.to/feed/tag/devrel"], true),
                FeedSource::new(
                    "medium",
                    &["https://medium.com/feed/tag/developer-relations"],
                    true,
                ),
                FeedSource::new(
                    "developerrelations.com",
                    &[
                        "https://developerrelations.com/feed",
                        "https://developerrelations.com/rss",
                        "https://developerrelations.com/atom",
                        "https://developerrelations.com/rss.xml",
                    ],
                    true,
                ),
                FeedSource::new("devrel.net", &["https://devrel.net/feed"], true),
                FeedSource::new(
                    "hackernoon",
                    &["https://hackernoon.com/tagged/developer-relations/feed"],
                    true,
                ),
                FeedSource::new("techcrunch", &["https://techcrunch.com/feed/"], false),
                FeedSource::new(
                    "thenextweb",
                    &["https://feeds.feedburner.com/thenextweb"],
                    false,
                ),
            ],
            relevance_terms: [
                "devrel",
                "developer relations",
                "developer advocacy",
                "developer experience",
                "community",
                "developer marketing",
                "developer advocate",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            excerpt_max_chars: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoardsConfig {
    pub linkedin: Vec<String>,
    pub lever: Vec<String>,
    pub greenhouse: Vec<String>,
    pub max_postings_per_board: usize,
}

impl Default for BoardsConfig {
    fn default() -> Self {
        Self {
            linkedin: vec![
                "https://www.linkedin.com/jobs/developer-relations-jobs".to_string(),
                "https://www.linkedin.com/jobs/developer-advocate-jobs".to_string(),
                "https://www.linkedin.com/jobs/technical-evangelist-jobs".to_string(),
            ],
            lever: vec!["https://jobs.lever.co/search?team=Developer%20Relations".to_string()],
            greenhouse: vec![
                "https://boards-api.greenhouse.io/v1/boards/stripe/jobs?content=true".to_string(),
                "https://boards-api.greenhouse.io/v1/boards/twilio/jobs?content=true".to_string(),
            ],
            max_postings_per_board: 25,
        }
    }
}
