//! Config Hub client
//!
//! Typed getters over a snapshot of an external key-value/tabular source.
//! A background poll refreshes the snapshot on an interval with retry and
//! change-hash detection; on poll failure the stale snapshot keeps
//! serving and a warning is logged. Consumers only ever see the local
//! snapshot, so reads never block on the network.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConfigHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid response body: {0}")]
    InvalidBody(String),
}

/// Config Hub client configuration.
#[derive(Debug, Clone)]
pub struct ConfigHubClientConfig {
    pub url: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ConfigHubClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            poll_interval: Duration::from_secs(300), // 5 minutes
            request_timeout: Duration::from_secs(30),
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Client over the polled external source.
pub struct ConfigHub {
    config: ConfigHubClientConfig,
    http_client: reqwest::Client,
    snapshot: RwLock<HashMap<String, Value>>,
    last_hash: Mutex<Option<u64>>,
}

impl ConfigHub {
    pub fn new(config: ConfigHubClientConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            config,
            http_client,
            snapshot: RwLock::new(HashMap::new()),
            last_hash: Mutex::new(None),
        }
    }

    /// Fetch one snapshot from the source with retry.
    pub async fn fetch_once(&self) -> Result<bool, ConfigHubError> {
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_retry_attempts {
            debug!(
                attempt = attempt,
                max_attempts = self.config.max_retry_attempts,
                url = %self.config.url,
                "Fetching config hub snapshot"
            );

            match self.try_fetch().await {
                Ok(changed) => return Ok(changed),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(attempt = attempt, error = %last_error, "Config hub fetch failed");
                    if attempt < self.config.max_retry_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        Err(ConfigHubError::Request(last_error))
    }

    async fn try_fetch(&self) -> Result<bool, ConfigHubError> {
        let response = self
            .http_client
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| ConfigHubError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConfigHubError::Request(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ConfigHubError::Request(e.to_string()))?;

        // Skip the snapshot swap when nothing changed.
        let mut hasher = DefaultHasher::new();
        body.hash(&mut hasher);
        let hash = hasher.finish();
        {
            let mut last = self.last_hash.lock();
            if *last == Some(hash) {
                debug!("Config hub snapshot unchanged");
                return Ok(false);
            }
            *last = Some(hash);
        }

        let parsed: HashMap<String, Value> = serde_json::from_str(&body)
            .map_err(|e| ConfigHubError::InvalidBody(e.to_string()))?;

        let keys = parsed.len();
        *self.snapshot.write() = parsed;
        info!(keys = keys, "Config hub snapshot refreshed");
        Ok(true)
    }

    /// Start the background poll loop.
    pub fn start_polling(self: &Arc<Self>) {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(hub.config.poll_interval);
            loop {
                interval.tick().await;
                if let Err(e) = hub.fetch_once().await {
                    warn!(error = %e, "Config hub poll failed, serving stale snapshot");
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Typed getters over the snapshot
    // ------------------------------------------------------------------

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.snapshot
            .read()
            .get(key)
            .and_then(|v| v.as_str().map(String::from))
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        let snapshot = self.snapshot.read();
        let value = snapshot.get(key)?;
        match value {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "si" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        let snapshot = self.snapshot.read();
        let value = snapshot.get(key)?;
        match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        let snapshot = self.snapshot.read();
        let value = snapshot.get(key)?;
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_json(&self, key: &str) -> Option<Value> {
        self.snapshot.read().get(key).cloned()
    }

    /// Rows of a tabular key (an array of objects).
    pub fn get_rows(&self, key: &str) -> Vec<HashMap<String, Value>> {
        self.snapshot
            .read()
            .get(key)
            .and_then(|v| v.as_array())
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        row.as_object().map(|obj| {
                            obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.snapshot.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hub_for(server: &MockServer) -> ConfigHub {
        ConfigHub::new(ConfigHubClientConfig {
            url: server.uri(),
            poll_interval: Duration::from_secs(300),
            request_timeout: Duration::from_secs(2),
            max_retry_attempts: 2,
            retry_delay: Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn typed_getters_read_the_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "service_enabled": true,
                "greeting": "hola",
                "max_daily_orders": 120,
                "discount_rate": "0.15",
                "skus": [
                    {"name": "rosca", "life_days": 1},
                    {"name": "galleta", "life_days": 30}
                ]
            })))
            .mount(&server)
            .await;

        let hub = hub_for(&server);
        assert!(hub.fetch_once().await.unwrap());

        assert_eq!(hub.get_bool("service_enabled"), Some(true));
        assert_eq!(hub.get_str("greeting").as_deref(), Some("hola"));
        assert_eq!(hub.get_i64("max_daily_orders"), Some(120));
        assert_eq!(hub.get_f64("discount_rate"), Some(0.15));

        let rows = hub.get_rows("skus");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "rosca");
        assert_eq!(rows[1]["life_days"], 30);
    }

    #[tokio::test]
    async fn unchanged_body_is_a_no_op() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"k": 1})),
            )
            .mount(&server)
            .await;

        let hub = hub_for(&server);
        assert!(hub.fetch_once().await.unwrap());
        assert!(!hub.fetch_once().await.unwrap());
    }

    #[tokio::test]
    async fn failure_after_retries_keeps_stale_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"k": "v"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let hub = hub_for(&server);
        hub.fetch_once().await.unwrap();

        let result = hub.fetch_once().await;
        assert!(result.is_err());
        // Stale snapshot still serves.
        assert_eq!(hub.get_str("k").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn missing_keys_return_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let hub = hub_for(&server);
        hub.fetch_once().await.unwrap();

        assert!(hub.get_str("nope").is_none());
        assert!(hub.get_i64("nope").is_none());
        assert!(hub.get_rows("nope").is_empty());
    }
}
