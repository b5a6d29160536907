//! Configuration loading.
//!
//! Every section is optional and every field has a default, so an empty
//! file is a valid (if inert) configuration. Secrets are read from the
//! environment and override whatever the file says.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sampler::SamplingStrategy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub curation: CurationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub personalization: PersonalizationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default = "default_official_sources")]
    pub official: Vec<OfficialSourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            server: ServerConfig::default(),
            fetch: FetchConfig::default(),
            sampling: SamplingConfig::default(),
            curation: CurationConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            personalization: PersonalizationConfig::default(),
            ingest: IngestConfig::default(),
            official: default_official_sources(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/digest.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer secret for the scheduled trigger. Overridden by `CRON_SECRET`.
    #[serde(default)]
    pub cron_secret: Option<String>,
    /// HMAC key for user session tokens. Overridden by `SESSION_SECRET`.
    #[serde(default)]
    pub session_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cron_secret: None,
            session_secret: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub social_enabled: bool,
    #[serde(default = "default_social_limit")]
    pub social_limit: usize,
    #[serde(default = "default_social_base_url")]
    pub social_base_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
            social_enabled: false,
            social_limit: default_social_limit(),
            social_base_url: default_social_base_url(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_fetch_timeout() -> u64 {
    20
}
fn default_user_agent() -> String {
    "DailyDigest/1.0".to_string()
}
fn default_social_limit() -> usize {
    25
}
fn default_social_base_url() -> String {
    "https://www.reddit.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplingConfig {
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default)]
    pub strategy: SamplingStrategy,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            strategy: SamplingStrategy::default(),
        }
    }
}

fn default_sample_size() -> usize {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct CurationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_curation_model")]
    pub model: String,
    #[serde(default = "default_openrouter_url")]
    pub base_url: String,
    #[serde(default = "default_curation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_interests")]
    pub interests: Vec<String>,
    #[serde(default = "default_target_min")]
    pub target_min: usize,
    #[serde(default = "default_target_max")]
    pub target_max: usize,
    #[serde(default = "default_min_per_category")]
    pub min_per_category: usize,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_curation_model(),
            base_url: default_openrouter_url(),
            timeout_secs: default_curation_timeout(),
            temperature: default_temperature(),
            audience: default_audience(),
            interests: default_interests(),
            target_min: default_target_min(),
            target_max: default_target_max(),
            min_per_category: default_min_per_category(),
        }
    }
}

impl CurationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_curation_model() -> String {
    "openai/gpt-3.5-turbo".to_string()
}
fn default_openrouter_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_curation_timeout() -> u64 {
    90
}
fn default_temperature() -> f32 {
    0.3
}
fn default_audience() -> String {
    "a software developer who follows engineering, machine learning and motorsport news".to_string()
}
fn default_interests() -> Vec<String> {
    vec![
        "developer tools and frameworks".to_string(),
        "machine learning research and local models".to_string(),
        "Formula 1".to_string(),
        "productivity".to_string(),
    ]
}
fn default_target_min() -> usize {
    8
}
fn default_target_max() -> usize {
    12
}
fn default_min_per_category() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_openrouter_url")]
    pub base_url: String,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    /// Extra attempts after a 429, 5xx or transport error. Queries embed on
    /// the request path, so the default is to fail over to keyword search
    /// at once.
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_embedding_model(),
            dims: default_dims(),
            base_url: default_openrouter_url(),
            max_chars: default_max_chars(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
            max_retries: 0,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_model() -> String {
    "openai/text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_max_chars() -> usize {
    8000
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_feed_limit")]
    pub feed_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            search_limit: default_search_limit(),
            feed_limit: default_feed_limit(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.3
}
fn default_search_limit() -> usize {
    50
}
fn default_feed_limit() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersonalizationConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_preference_weight")]
    pub preference_weight: f64,
}

impl Default for PersonalizationConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            preference_weight: default_preference_weight(),
        }
    }
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_preference_weight() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ceiling_secs")]
    pub ceiling_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ceiling_secs: default_ceiling_secs(),
        }
    }
}

impl IngestConfig {
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }
}

fn default_ceiling_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OfficialKind {
    /// RSS/Atom feed.
    Feed,
    /// HTML index page scraped for article links.
    Listing,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OfficialSourceConfig {
    pub name: String,
    pub url: String,
    pub kind: OfficialKind,
    /// Href prefix identifying article links on a listing page.
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// Feed tried when the primary `url` fails.
    #[serde(default)]
    pub fallback_url: Option<String>,
    #[serde(default = "default_official_limit")]
    pub limit: usize,
}

fn default_official_limit() -> usize {
    5
}

fn default_official_sources() -> Vec<OfficialSourceConfig> {
    vec![
        OfficialSourceConfig {
            name: "Anthropic News".to_string(),
            url: "https://www.anthropic.com/news".to_string(),
            kind: OfficialKind::Listing,
            path_prefix: Some("/news/".to_string()),
            fallback_url: None,
            limit: 5,
        },
        OfficialSourceConfig {
            name: "Anthropic Engineering".to_string(),
            url: "https://www.anthropic.com/engineering".to_string(),
            kind: OfficialKind::Listing,
            path_prefix: Some("/engineering/".to_string()),
            fallback_url: None,
            limit: 5,
        },
        OfficialSourceConfig {
            name: "OpenAI News".to_string(),
            url: "https://openai.com/news/rss.xml".to_string(),
            kind: OfficialKind::Feed,
            path_prefix: None,
            fallback_url: Some("https://openai.com/blog/rss.xml".to_string()),
            limit: 5,
        },
        OfficialSourceConfig {
            name: "Google AI Blog".to_string(),
            url: "https://blog.google/technology/ai/rss/".to_string(),
            kind: OfficialKind::Feed,
            path_prefix: None,
            fallback_url: None,
            limit: 5,
        },
    ]
}

impl Config {
    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        validate(&config)?;
        Ok(config)
    }

    /// Cron secret, if configured and non-empty.
    pub fn cron_secret(&self) -> Option<&str> {
        self.server.cron_secret.as_deref().filter(|s| !s.is_empty())
    }

    pub fn session_secret(&self) -> Option<&str> {
        self.server
            .session_secret
            .as_deref()
            .filter(|s| !s.is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = Config::from_toml_str(&content)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(secret) = std::env::var("CRON_SECRET") {
        config.server.cron_secret = Some(secret);
    }
    if let Ok(secret) = std::env::var("SESSION_SECRET") {
        config.server.session_secret = Some(secret);
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.sampling.sample_size == 0 {
        anyhow::bail!("sampling.sample_size must be > 0");
    }

    if !(-1.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [-1.0, 1.0]");
    }
    if config.retrieval.search_limit == 0 || config.retrieval.feed_limit == 0 {
        anyhow::bail!("retrieval limits must be >= 1");
    }

    let p = &config.personalization;
    if !(0.0..=1.0).contains(&p.semantic_weight) || !(0.0..=1.0).contains(&p.preference_weight) {
        anyhow::bail!("personalization weights must be in [0.0, 1.0]");
    }

    if config.curation.target_min > config.curation.target_max {
        anyhow::bail!("curation.target_min must be <= curation.target_max");
    }

    match config.curation.provider.as_str() {
        "disabled" | "openrouter" => {}
        other => anyhow::bail!(
            "Unknown curation provider: '{}'. Must be disabled or openrouter.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openrouter" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openrouter.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims == 0 {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    for official in &config.official {
        if official.kind == OfficialKind::Listing && official.path_prefix.is_none() {
            anyhow::bail!(
                "official source '{}' is a listing and needs a path_prefix",
                official.name
            );
        }
    }

    if config.ingest.ceiling_secs == 0 || config.fetch.timeout_secs == 0 {
        anyhow::bail!("ingest.ceiling_secs and fetch.timeout_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.sampling.sample_size, 15);
        assert_eq!(config.sampling.strategy, SamplingStrategy::First);
        assert!((config.retrieval.similarity_threshold - 0.3).abs() < 1e-9);
        assert_eq!(config.retrieval.search_limit, 50);
        assert!((config.personalization.semantic_weight - 0.7).abs() < 1e-9);
        assert_eq!(config.embedding.max_chars, 8000);
        assert_eq!(config.embedding.max_retries, 0);
        assert_eq!(config.official.len(), 4);
        assert!(!config.embedding.is_enabled());
        assert!(config.cron_secret().is_none());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = Config::from_toml_str(
            r#"
official = []

[sampling]
sample_size = 5
strategy = "random"

[server]
cron_secret = "s3cret"

[embedding]
provider = "openrouter"
dims = 8
max_retries = 3
"#,
        )
        .unwrap();
        assert_eq!(config.sampling.sample_size, 5);
        assert_eq!(config.sampling.strategy, SamplingStrategy::Random);
        assert_eq!(config.cron_secret(), Some("s3cret"));
        assert_eq!(config.embedding.dims, 8);
        assert_eq!(config.embedding.max_retries, 3);
        assert!(config.official.is_empty());
    }

    #[test]
    fn test_rejects_zero_sample_size() {
        let err = Config::from_toml_str("[sampling]\nsample_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("sample_size"));
    }

    #[test]
    fn test_rejects_unknown_embedding_provider() {
        let err = Config::from_toml_str("[embedding]\nprovider = \"local\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_rejects_listing_without_prefix() {
        let err = Config::from_toml_str(
            r#"
[[official]]
name = "Blog"
url = "https://example.com/blog"
kind = "listing"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("path_prefix"));
    }

    #[test]
    fn test_empty_cron_secret_counts_as_unset() {
        let config = Config::from_toml_str("[server]\ncron_secret = \"\"\n").unwrap();
        assert!(config.cron_secret().is_none());
    }
}
