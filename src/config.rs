/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: animatch.toml (in working directory)
/// 3. Environment variables: prefixed ANIMATCH_, nested sections split on `__`
///    (e.g., ANIMATCH_LOG_LEVEL=debug, ANIMATCH_SOURCE__MAX_PAGES=3)

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};
use crate::errors::AnimatchError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    /// SQLite database holding published generations. Supports sqlite:// URI scheme.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub recommend: RecommendConfig,
}

/// External catalog source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the Jikan-compatible catalog API
    #[serde(default = "default_source_base_url")]
    pub base_url: String,

    /// Items requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Upper bound on pages followed per run
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Rebuild and publish settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Neighbors stored per catalog row
    #[serde(default = "default_neighbors_k")]
    pub neighbors_k: usize,

    /// Size of the trending snapshot taken from each ingested batch
    #[serde(default = "default_trending_n")]
    pub trending_n: usize,

    /// Published generations retained in the store (the current one included)
    #[serde(default = "default_keep_generations")]
    pub keep_generations: u32,
}

/// Query-path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendConfig {
    /// Recommendations returned when the caller does not pass k
    #[serde(default = "default_recommend_k")]
    pub default_k: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_path() -> String {
    match dirs::data_dir() {
        Some(dir) => format!("sqlite://{}", dir.join("animatch").join("animatch.db").display()),
        None => "sqlite://animatch.db".to_string(),
    }
}

fn default_source_base_url() -> String {
    "https://api.jikan.moe/v4".to_string()
}

fn default_page_size() -> u32 {
    25
}

fn default_max_pages() -> u32 {
    1
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_neighbors_k() -> usize {
    crate::similarity::MAX_NEIGHBORS
}

fn default_trending_n() -> usize {
    5
}

fn default_keep_generations() -> u32 {
    3
}

fn default_recommend_k() -> usize {
    8
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            base_url: default_source_base_url(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            neighbors_k: default_neighbors_k(),
            trending_n: default_trending_n(),
            keep_generations: default_keep_generations(),
        }
    }
}

impl Default for RecommendConfig {
    fn default() -> Self {
        RecommendConfig {
            default_k: default_recommend_k(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            db_path: default_db_path(),
            source: SourceConfig::default(),
            index: IndexConfig::default(),
            recommend: RecommendConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: ANIMATCH_INDEX__TRENDING_N=10 overrides index.trending_n in animatch.toml
    pub fn load() -> Result<Config, AnimatchError> {
        Self::figment()
            .extract()
            .map_err(|e| AnimatchError::Config(format!("Failed to load config: {}", e)))
            .and_then(Config::validated)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("animatch.toml"))
            .merge(Env::prefixed("ANIMATCH_").split("__"))
    }

    fn validated(self) -> Result<Config, AnimatchError> {
        if self.index.neighbors_k == 0 || self.index.neighbors_k > crate::similarity::MAX_NEIGHBORS {
            return Err(AnimatchError::Config(format!(
                "index.neighbors_k must be between 1 and {}",
                crate::similarity::MAX_NEIGHBORS
            )));
        }
        if self.recommend.default_k == 0 || self.recommend.default_k > self.index.neighbors_k {
            return Err(AnimatchError::Config(
                "recommend.default_k must be between 1 and index.neighbors_k".to_string(),
            ));
        }
        if self.index.keep_generations == 0 {
            return Err(AnimatchError::Config(
                "index.keep_generations must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}
