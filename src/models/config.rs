//! Application configuration structures.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Worker loop behavior
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Hybrid queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Fetch dispatch and HTTP settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Store fan-out destinations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Generic JSON-over-HTTP fetchers, one per request type
    #[serde(default)]
    pub fetchers: Vec<FetcherConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.name.trim().is_empty() {
            return Err(AppError::validation("crawler.name is empty"));
        }
        if self.crawler.workers == 0 {
            return Err(AppError::validation("crawler.workers must be > 0"));
        }
        if self.queue.name.trim().is_empty() {
            return Err(AppError::validation("queue.name is empty"));
        }
        if self.queue.processing_visibility_secs == 0 {
            return Err(AppError::validation(
                "queue.processing_visibility_secs must be > 0",
            ));
        }
        if self.queue.remain_local_visibility_secs < self.queue.processing_visibility_secs {
            return Err(AppError::validation(
                "queue.remain_local_visibility_secs must be >= queue.processing_visibility_secs",
            ));
        }
        let mut seen = BTreeSet::new();
        for tier in self.queue.tier_names() {
            if tier.trim().is_empty() {
                return Err(AppError::validation("queue.tiers contains an empty name"));
            }
            if !seen.insert(tier.clone()) {
                return Err(AppError::validation(format!("queue.tiers repeats {tier}")));
            }
        }
        if let Some(unknown) = self.queue.weights.keys().find(|name| !seen.contains(*name)) {
            return Err(AppError::validation(format!(
                "queue.weights names unknown tier {unknown}"
            )));
        }
        if self.fetch.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetch.user_agent is empty"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        if let Some(webhook) = &self.storage.webhook_url {
            url::Url::parse(webhook)?;
        }
        for fetcher in &self.fetchers {
            if fetcher.kind.trim().is_empty() {
                return Err(AppError::validation("fetchers[].type is empty"));
            }
            if !fetcher.url_template.contains("{name}") {
                return Err(AppError::validation(format!(
                    "fetcher for '{}' has no {{name}} placeholder",
                    fetcher.kind
                )));
            }
        }
        Ok(())
    }
}

/// Worker loop behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Name used in log lines
    #[serde(default = "defaults::name")]
    pub name: String,

    /// Number of concurrent worker loops
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// Delay before polling again once the queue is drained
    #[serde(default = "defaults::polling_delay")]
    pub polling_delay_ms: u64,

    /// Base backoff applied per previous attempt of a redelivered request
    #[serde(default = "defaults::requeue_delay")]
    pub requeue_delay_ms: u64,

    /// Requeues allowed before a request is deadlettered
    #[serde(default = "defaults::max_requeue_attempts")]
    pub max_requeue_attempts: u32,

    /// How long a worker may hold the lock on a URL
    #[serde(default = "defaults::lock_ttl")]
    pub lock_ttl_ms: u64,

    /// Redelivered durable messages pulled back per recovery pass
    #[serde(default = "defaults::recover_batch")]
    pub recover_batch: usize,

    /// Which dead requests are written to the deadletter store
    #[serde(default)]
    pub deadletter_policy: DeadletterPolicy,
}

impl CrawlerConfig {
    pub fn polling_delay(&self) -> Duration {
        Duration::from_millis(self.polling_delay_ms)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            name: defaults::name(),
            workers: defaults::workers(),
            polling_delay_ms: defaults::polling_delay(),
            requeue_delay_ms: defaults::requeue_delay(),
            max_requeue_attempts: defaults::max_requeue_attempts(),
            lock_ttl_ms: defaults::lock_ttl(),
            recover_batch: defaults::recover_batch(),
            deadletter_policy: DeadletterPolicy::default(),
        }
    }
}

/// Deadletter write policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeadletterPolicy {
    /// Every dead request is stored
    #[default]
    Always,
    /// Requests that died on an origin 404 are not stored
    ExcludeNotFound,
}

/// Hybrid queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name reported by `info`
    #[serde(default = "defaults::queue_name")]
    pub name: String,

    /// Remote visibility while the entry still sits in the local buffer
    #[serde(default = "defaults::remain_local_visibility")]
    pub remain_local_visibility_secs: u64,

    /// Remote visibility once the entry has been popped for processing
    #[serde(default = "defaults::processing_visibility")]
    pub processing_visibility_secs: u64,

    /// Priority tiers, highest first. Empty means one tier called `name`.
    #[serde(default)]
    pub tiers: Vec<String>,

    /// Relative pop weight per tier; unlisted tiers weigh 1
    #[serde(default)]
    pub weights: BTreeMap<String, u32>,

    /// Window in which a repeated push of the same request is dropped. 0 disables it.
    #[serde(default = "defaults::attenuation_ttl")]
    pub attenuation_ttl_ms: u64,
}

impl QueueConfig {
    /// Tier names in priority order.
    pub fn tier_names(&self) -> Vec<String> {
        if self.tiers.is_empty() {
            vec![self.name.clone()]
        } else {
            self.tiers.clone()
        }
    }

    pub fn attenuation_ttl(&self) -> Duration {
        Duration::from_millis(self.attenuation_ttl_ms)
    }

    pub fn remain_local_visibility(&self) -> Duration {
        Duration::from_secs(self.remain_local_visibility_secs)
    }

    pub fn processing_visibility(&self) -> Duration {
        Duration::from_secs(self.processing_visibility_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: defaults::queue_name(),
            remain_local_visibility_secs: defaults::remain_local_visibility(),
            processing_visibility_secs: defaults::processing_visibility(),
            tiers: Vec::new(),
            weights: BTreeMap::new(),
            attenuation_ttl_ms: defaults::attenuation_ttl(),
        }
    }
}

/// Fetch dispatch and HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Lifetime of a cached fetch result
    #[serde(default = "defaults::cache_ttl")]
    pub cache_ttl_secs: u64,

    /// User-Agent header for origin requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl FetchConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: defaults::cache_ttl(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Store fan-out destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the primary document store
    #[serde(default = "defaults::root_dir")]
    pub root_dir: PathBuf,

    /// Deadletter directory, relative to `root_dir`
    #[serde(default = "defaults::deadletter_dir")]
    pub deadletter_dir: String,

    /// Extract `_attachments` into their own documents
    #[serde(default = "defaults::enabled")]
    pub attachments: bool,

    /// Extract `_fileContent` into content-addressed documents
    #[serde(default)]
    pub hashed_content: bool,

    /// Webhook notified of every upsert
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Token sent in the `x-crawler` header
    #[serde(default)]
    pub webhook_token: Option<String>,

    /// Push `{type, url}` of every write onto a notification queue
    #[serde(default)]
    pub notify_queue: bool,
}

impl StorageConfig {
    pub fn deadletter_path(&self) -> PathBuf {
        self.root_dir.join(&self.deadletter_dir)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: defaults::root_dir(),
            deadletter_dir: defaults::deadletter_dir(),
            attachments: defaults::enabled(),
            hashed_content: false,
            webhook_url: None,
            webhook_token: None,
            notify_queue: false,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::level(),
        }
    }
}

/// A generic JSON-over-HTTP fetcher for one request type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Request type handled (e.g. "npm")
    #[serde(rename = "type")]
    pub kind: String,

    /// Origin URL with `{type}`, `{provider}`, `{namespace/}`, `{name}`, `{revision}` placeholders
    pub url_template: String,
}

mod defaults {
    use std::path::PathBuf;

    // Crawler defaults
    pub fn name() -> String {
        "crawler".into()
    }
    pub fn workers() -> usize {
        1
    }
    pub fn polling_delay() -> u64 {
        5000
    }
    pub fn requeue_delay() -> u64 {
        5000
    }
    pub fn max_requeue_attempts() -> u32 {
        5
    }
    pub fn lock_ttl() -> u64 {
        60 * 1000
    }
    pub fn recover_batch() -> usize {
        32
    }

    // Queue defaults
    pub fn queue_name() -> String {
        "normal".into()
    }
    pub fn remain_local_visibility() -> u64 {
        8 * 60 * 60
    }
    pub fn processing_visibility() -> u64 {
        60 * 60
    }
    pub fn attenuation_ttl() -> u64 {
        1000
    }

    // Fetch defaults
    pub fn cache_ttl() -> u64 {
        60 * 60
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; cd-crawler/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }

    // Storage defaults
    pub fn root_dir() -> PathBuf {
        PathBuf::from("storage")
    }
    pub fn deadletter_dir() -> String {
        "deadletter".into()
    }
    pub fn enabled() -> bool {
        true
    }

    pub fn level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn default_visibility_windows() {
        let queue = QueueConfig::default();
        assert_eq!(queue.remain_local_visibility(), Duration::from_secs(8 * 3600));
        assert_eq!(queue.processing_visibility(), Duration::from_secs(3600));
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.crawler.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_visibility() {
        let mut config = Config::default();
        config.queue.remain_local_visibility_secs = 10;
        config.queue.processing_visibility_secs = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_repeated_or_unknown_tiers() {
        let mut config = Config::default();
        config.queue.tiers = vec!["immediate".into(), "normal".into(), "immediate".into()];
        assert!(config.validate().is_err());

        config.queue.tiers = vec!["immediate".into(), "normal".into()];
        config.queue.weights.insert("immediate".into(), 3);
        assert!(config.validate().is_ok());

        config.queue.weights.insert("later".into(), 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_queue_has_one_tier() {
        assert_eq!(QueueConfig::default().tier_names(), vec!["normal".to_string()]);
    }

    #[test]
    fn validate_rejects_template_without_name() {
        let mut config = Config::default();
        config.fetchers.push(FetcherConfig {
            kind: "npm".into(),
            url_template: "https://registry.npmjs.org/".into(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [crawler]
            workers = 4
            deadletter_policy = "exclude_not_found"

            [[fetchers]]
            type = "npm"
            url_template = "https://registry.npmjs.org/{namespace/}{name}"
            "#,
        )
        .unwrap();
        assert_eq!(config.crawler.workers, 4);
        assert_eq!(config.crawler.polling_delay_ms, 5000);
        assert_eq!(
            config.crawler.deadletter_policy,
            DeadletterPolicy::ExcludeNotFound
        );
        assert_eq!(config.fetchers[0].kind, "npm");
        assert_eq!(config.queue.name, "normal");
    }
}
