//! Switchboard Configuration System
//!
//! This crate provides TOML-based configuration with environment variable
//! override support. Every option carries a documented default so the
//! processor boots with no config file at all.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub chat: ChatConfig,
    pub worker: WorkerConfig,
    pub rate_limit: RateLimitConfig,
    pub dedupe: DedupeConfig,
    pub service_hours: ServiceHoursConfig,
    pub cache: CacheConfig,
    pub dlq: DlqConfig,
    pub ai: AiConfig,
    pub rules: RulesConfig,
    pub tuner: TunerConfig,
    pub config_hub: ConfigHubConfig,

    /// Enable development mode
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            chat: ChatConfig::default(),
            worker: WorkerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            dedupe: DedupeConfig::default(),
            service_hours: ServiceHoursConfig::default(),
            cache: CacheConfig::default(),
            dlq: DlqConfig::default(),
            ai: AiConfig::default(),
            rules: RulesConfig::default(),
            tuner: TunerConfig::default(),
            config_hub: ConfigHubConfig::default(),
            dev_mode: false,
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// When false, every Redis-backed component runs on its in-process fallback.
    pub enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            enabled: true,
        }
    }
}

/// Chat platform client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_token: String,
    pub account_id: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_token: String::new(),
            account_id: String::new(),
            timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker pool size
    pub max_concurrent: usize,
    /// Retry attempts per job
    pub max_retries: u32,
    /// Base linear backoff in milliseconds
    pub retry_delay_ms: u64,
    /// Per-job wall-clock timeout in milliseconds
    pub processing_timeout_ms: u64,
    /// Typing heartbeat on/off
    pub typing_enabled: bool,
    /// Typing heartbeat cadence in milliseconds
    pub typing_interval_ms: u64,
    /// How long completed-job records are retained for status queries (ms)
    pub completed_retention_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_retries: 2,
            retry_delay_ms: 1000,
            processing_timeout_ms: 30_000,
            typing_enabled: true,
            typing_interval_ms: 3000,
            completed_retention_ms: 300_000, // 5 minutes
        }
    }
}

/// Sliding-window rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 10,
        }
    }
}

/// Repeat-message detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    pub window_ms: u64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self { window_ms: 5000 }
    }
}

/// Admission gate by hour of day, `[start, end)`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceHoursConfig {
    pub enabled: bool,
    pub start: u32,
    pub end: u32,
    /// Offset applied to UTC when reading the current hour
    pub utc_offset_hours: i32,
}

impl Default for ServiceHoursConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: 9,
            end: 21,
            utc_offset_hours: 0,
        }
    }
}

/// Semantic cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Eviction trigger
    pub max_entries: usize,
    /// TTL for FAQ-category entries in seconds
    pub ttl_faq_secs: u64,
    /// TTL for general entries in seconds
    pub ttl_general_secs: u64,
    /// TTL for transient entries in seconds
    pub ttl_transient_secs: u64,
    /// Expired-entry sweep cadence in milliseconds
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 5000,
            ttl_faq_secs: 86_400,      // 24 hours
            ttl_general_secs: 14_400,  // 4 hours
            ttl_transient_secs: 1800,  // 30 minutes
            sweep_interval_ms: 300_000, // 5 minutes
        }
    }
}

/// Dead-letter queue alert policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    pub alert_threshold: usize,
    pub check_interval_ms: u64,
    /// Anti-flap suppression window in minutes
    pub alert_suppression_minutes: i64,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 10,
            check_interval_ms: 300_000, // 5 minutes
            alert_suppression_minutes: 30,
        }
    }
}

/// Self-healing AI runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Total attempts per call (first try + retries)
    pub max_attempts: u32,
    /// Base backoff between attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_delay_ms: 500,
        }
    }
}

/// A month-day range, inclusive on both ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthDayRange {
    /// "MM-DD"
    pub start: String,
    /// "MM-DD"
    pub end: String,
}

/// Hard-rule temporal configuration for the beacon rule engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Ranges where 1-day shelf-life SKUs cannot be shadow-reserved
    pub peak_shaving: Vec<MonthDayRange>,
    /// Ranges where reservation and web-sale pauses are blocked outright
    pub pull_only: Vec<MonthDayRange>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            peak_shaving: vec![MonthDayRange {
                start: "01-02".to_string(),
                end: "01-05".to_string(),
            }],
            pull_only: vec![MonthDayRange {
                start: "01-12".to_string(),
                end: "01-18".to_string(),
            }],
        }
    }
}

/// Threshold auto-tuning policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Minimum labelled samples before a detector is considered
    pub min_samples: usize,
    /// Trailing window in days
    pub window_days: i64,
    /// False-positive-rate trigger for raising a threshold
    pub fpr_trigger: f64,
    /// Recall-miss trigger for lowering a threshold
    pub recall_miss_trigger: f64,
    /// Proposals below this percentage are discarded
    pub min_adjustment_percent: f64,
    /// Adjustments above this percentage require explicit approval
    pub approval_required_above_percent: f64,
    /// Per-detector cooldown in hours
    pub cooldown_hours: i64,
    /// Auto-applied adjustments per calendar week
    pub max_auto_per_week: u32,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            window_days: 7,
            fpr_trigger: 0.30,
            recall_miss_trigger: 0.20,
            min_adjustment_percent: 5.0,
            approval_required_above_percent: 15.0,
            cooldown_hours: 24,
            max_auto_per_week: 3,
        }
    }
}

/// External key-value/tabular config source polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigHubConfig {
    pub enabled: bool,
    pub url: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for ConfigHubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            poll_interval_secs: 300, // 5 minutes
            request_timeout_secs: 30,
            max_retry_attempts: 3,
            retry_delay_secs: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        let loader = ConfigLoader::new();
        loader.load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(
                "worker.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.max_requests must be at least 1".to_string(),
            ));
        }
        if self.service_hours.enabled && self.service_hours.start >= self.service_hours.end {
            return Err(ConfigError::ValidationError(
                "service_hours.start must be before service_hours.end".to_string(),
            ));
        }
        for range in self
            .rules
            .peak_shaving
            .iter()
            .chain(self.rules.pull_only.iter())
        {
            for md in [&range.start, &range.end] {
                let ok = md.len() == 5
                    && md.as_bytes()[2] == b'-'
                    && md[..2].parse::<u32>().map(|m| (1..=12).contains(&m)).unwrap_or(false)
                    && md[3..].parse::<u32>().map(|d| (1..=31).contains(&d)).unwrap_or(false);
                if !ok {
                    return Err(ConfigError::ValidationError(format!(
                        "invalid month-day range bound: {}",
                        md
                    )));
                }
            }
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Switchboard Configuration
# Environment variables override these settings

[redis]
url = "redis://localhost:6379"
enabled = true

[chat]
base_url = "http://localhost:3000"
api_token = ""
account_id = ""
timeout_ms = 10000
connect_timeout_ms = 5000

[worker]
max_concurrent = 5
max_retries = 2
retry_delay_ms = 1000
processing_timeout_ms = 30000
typing_enabled = true
typing_interval_ms = 3000
completed_retention_ms = 300000

[rate_limit]
window_ms = 60000
max_requests = 10

[dedupe]
window_ms = 5000

[service_hours]
enabled = false
start = 9
end = 21
utc_offset_hours = 0

[cache]
max_entries = 5000
ttl_faq_secs = 86400
ttl_general_secs = 14400
ttl_transient_secs = 1800
sweep_interval_ms = 300000

[dlq]
alert_threshold = 10
check_interval_ms = 300000
alert_suppression_minutes = 30

[ai]
max_attempts = 2
retry_delay_ms = 500

[rules]
peak_shaving = [{ start = "01-02", end = "01-05" }]
pull_only = [{ start = "01-12", end = "01-18" }]

[tuner]
min_samples = 10
window_days = 7
fpr_trigger = 0.30
recall_miss_trigger = 0.20
min_adjustment_percent = 5.0
approval_required_above_percent = 15.0
cooldown_hours = 24
max_auto_per_week = 3

[config_hub]
enabled = false
url = ""
poll_interval_secs = 300
request_timeout_secs = 30
max_retry_attempts = 3
retry_delay_secs = 5

dev_mode = false
"#
        .to_string()
    }
}
