//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "switchboard.toml",
    "./config/config.toml",
    "./config/switchboard.toml",
    "/etc/switchboard/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("SWITCHBOARD_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // Redis
        if let Ok(val) = env::var("SWITCHBOARD_REDIS_URL") {
            config.redis.url = val;
        }
        if let Ok(val) = env::var("SWITCHBOARD_REDIS_ENABLED") {
            config.redis.enabled = val.parse().unwrap_or(true);
        }

        // Chat platform
        if let Ok(val) = env::var("SWITCHBOARD_CHAT_BASE_URL") {
            config.chat.base_url = val;
        }
        if let Ok(val) = env::var("SWITCHBOARD_CHAT_API_TOKEN") {
            config.chat.api_token = val;
        }
        if let Ok(val) = env::var("SWITCHBOARD_CHAT_ACCOUNT_ID") {
            config.chat.account_id = val;
        }

        // Worker pool
        if let Ok(val) = env::var("SWITCHBOARD_MAX_CONCURRENT") {
            if let Ok(n) = val.parse() {
                config.worker.max_concurrent = n;
            }
        }
        if let Ok(val) = env::var("SWITCHBOARD_MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                config.worker.max_retries = n;
            }
        }
        if let Ok(val) = env::var("SWITCHBOARD_RETRY_DELAY_MS") {
            if let Ok(n) = val.parse() {
                config.worker.retry_delay_ms = n;
            }
        }
        if let Ok(val) = env::var("SWITCHBOARD_PROCESSING_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.worker.processing_timeout_ms = n;
            }
        }
        if let Ok(val) = env::var("SWITCHBOARD_TYPING_ENABLED") {
            config.worker.typing_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("SWITCHBOARD_TYPING_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.worker.typing_interval_ms = n;
            }
        }

        // Rate limit / dedupe
        if let Ok(val) = env::var("SWITCHBOARD_RATE_WINDOW_MS") {
            if let Ok(n) = val.parse() {
                config.rate_limit.window_ms = n;
            }
        }
        if let Ok(val) = env::var("SWITCHBOARD_RATE_MAX_REQUESTS") {
            if let Ok(n) = val.parse() {
                config.rate_limit.max_requests = n;
            }
        }
        if let Ok(val) = env::var("SWITCHBOARD_DEDUPE_WINDOW_MS") {
            if let Ok(n) = val.parse() {
                config.dedupe.window_ms = n;
            }
        }

        // Service hours
        if let Ok(val) = env::var("SWITCHBOARD_SERVICE_HOURS_ENABLED") {
            config.service_hours.enabled = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var("SWITCHBOARD_SERVICE_HOURS_START") {
            if let Ok(n) = val.parse() {
                config.service_hours.start = n;
            }
        }
        if let Ok(val) = env::var("SWITCHBOARD_SERVICE_HOURS_END") {
            if let Ok(n) = val.parse() {
                config.service_hours.end = n;
            }
        }

        // Cache
        if let Ok(val) = env::var("SWITCHBOARD_CACHE_MAX_ENTRIES") {
            if let Ok(n) = val.parse() {
                config.cache.max_entries = n;
            }
        }

        // DLQ
        if let Ok(val) = env::var("SWITCHBOARD_DLQ_ALERT_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.dlq.alert_threshold = n;
            }
        }
        if let Ok(val) = env::var("SWITCHBOARD_DLQ_CHECK_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.dlq.check_interval_ms = n;
            }
        }

        // Config hub
        if let Ok(val) = env::var("SWITCHBOARD_CONFIG_HUB_ENABLED") {
            config.config_hub.enabled = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var("SWITCHBOARD_CONFIG_HUB_URL") {
            config.config_hub.url = val;
        }
        if let Ok(val) = env::var("SWITCHBOARD_CONFIG_HUB_INTERVAL") {
            if let Ok(n) = val.parse() {
                config.config_hub.poll_interval_secs = n;
            }
        }

        // General
        if let Ok(val) = env::var("SWITCHBOARD_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
