//! HTTP chat platform client
//!
//! Posts replies and typing toggles to the platform's conversation API
//! with:
//! - Bearer auth token handling
//! - Response code classification
//! - Retry with a configurable delay table
//! - A delivery gate that pauses outbound calls after consecutive hard
//!   failures
//!
//! The gate exists because the worker pool fires typing pulses every few
//! seconds per in-flight conversation: when the platform is down, those
//! pulses plus reply retries would hammer it continuously. After
//! `gate_trip_after` consecutive transport/5xx failures delivery pauses
//! for `gate_cool_off`; one probe call is let through per cool-off
//! window, and a successful probe reopens delivery.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{ChatClient, ChatError, Result};

/// Configuration for the HTTP chat client
#[derive(Debug, Clone)]
pub struct HttpChatClientConfig {
    pub base_url: String,
    pub account_id: String,
    pub api_token: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_delays: Vec<Duration>,
    /// Consecutive hard failures before delivery pauses
    pub gate_trip_after: u32,
    /// Pause length; sized to outlast a few typing intervals
    pub gate_cool_off: Duration,
}

impl Default for HttpChatClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            account_id: String::new(),
            api_token: String::new(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delays: vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
            ],
            gate_trip_after: 5,
            gate_cool_off: Duration::from_secs(10),
        }
    }
}

/// Pauses outbound delivery after consecutive hard failures.
///
/// Only transport errors and 5xx responses count: a 4xx proves the
/// platform is up and answering, so it clears the streak.
struct DeliveryGate {
    consecutive_failures: AtomicU32,
    paused_until: Mutex<Option<Instant>>,
    trip_after: u32,
    cool_off: Duration,
}

impl DeliveryGate {
    fn new(trip_after: u32, cool_off: Duration) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            paused_until: Mutex::new(None),
            trip_after,
            cool_off,
        }
    }

    /// Whether a call may go out right now. While paused, exactly one
    /// probe per cool-off window is admitted; admitting it pushes the
    /// window out so concurrent callers stay paused until the probe
    /// resolves.
    fn admit(&self) -> bool {
        let mut paused = self.paused_until.lock();
        match *paused {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                *paused = Some(Instant::now() + self.cool_off);
                debug!("Delivery gate admitting probe call");
                true
            }
            None => true,
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let mut paused = self.paused_until.lock();
        if paused.take().is_some() {
            debug!("Delivery gate reopened after successful probe");
        }
    }

    fn record_hard_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.trip_after {
            let mut paused = self.paused_until.lock();
            if paused.is_none() {
                warn!(
                    failures = failures,
                    cool_off_ms = self.cool_off.as_millis() as u64,
                    "Pausing chat delivery after consecutive failures"
                );
            }
            *paused = Some(Instant::now() + self.cool_off);
        }
    }

    fn is_paused(&self) -> bool {
        match *self.paused_until.lock() {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct OutgoingMessage<'a> {
    content: &'a str,
    message_type: &'a str,
}

/// HTTP-based chat client with a delivery gate.
pub struct HttpChatClient {
    client: Client,
    config: HttpChatClientConfig,
    gate: DeliveryGate,
}

impl HttpChatClient {
    pub fn new(config: HttpChatClientConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(10)
            .build()
            .expect("Failed to build HTTP client");

        let gate = DeliveryGate::new(config.gate_trip_after, config.gate_cool_off);

        Self {
            client,
            config,
            gate,
        }
    }

    /// Whether the delivery gate is currently pausing outbound calls.
    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    fn messages_url(&self, conversation_id: &str) -> String {
        format!(
            "{}/api/v1/accounts/{}/conversations/{}/messages",
            self.config.base_url, self.config.account_id, conversation_id
        )
    }

    fn typing_url(&self, conversation_id: &str, on: bool) -> String {
        let status = if on { "on" } else { "off" };
        format!(
            "{}/api/v1/accounts/{}/conversations/{}/toggle_typing_status?typing_status={}",
            self.config.base_url, self.config.account_id, conversation_id, status
        )
    }

    async fn post_once(&self, url: &str, body: Option<String>) -> Result<()> {
        if !self.gate.admit() {
            debug!(url = %url, "Delivery paused, rejecting request");
            return Err(ChatError::DeliveryPaused);
        }

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("api_access_token", &self.config.api_token);

        if let Some(body) = body {
            request = request.body(body);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let status_code = status.as_u16();

                if status.is_success() {
                    self.gate.record_success();
                    Ok(())
                } else if status_code == 429 {
                    // The platform is alive, just shedding load.
                    self.gate.record_success();
                    let retry_after = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(5);
                    warn!(url = %url, retry_after = retry_after, "Chat platform rate limited (429)");
                    Err(ChatError::Transient(format!(
                        "HTTP 429, retry after {}s",
                        retry_after
                    )))
                } else if status.is_client_error() {
                    self.gate.record_success();
                    warn!(url = %url, status_code = status_code, "Chat platform client error");
                    Err(ChatError::Config {
                        status: status_code,
                        message: format!("HTTP {}", status_code),
                    })
                } else {
                    // 5xx and anything else: hard failure, feeds the gate.
                    self.gate.record_hard_failure();
                    warn!(url = %url, status_code = status_code, "Chat platform server error - will retry");
                    Err(ChatError::Transient(format!("HTTP {}", status_code)))
                }
            }
            Err(e) => {
                self.gate.record_hard_failure();
                if e.is_timeout() {
                    warn!(url = %url, error = %e, "Chat platform request timeout");
                    Err(ChatError::Connection("Request timeout".to_string()))
                } else {
                    warn!(url = %url, error = %e, "Chat platform request failed");
                    Err(ChatError::Connection(e.to_string()))
                }
            }
        }
    }

    async fn post_with_retry(&self, url: &str, body: Option<String>) -> Result<()> {
        let mut attempts = 0;

        loop {
            let outcome = self.post_once(url, body.clone()).await;

            match outcome {
                Ok(()) => return Ok(()),
                Err(ref e) if !e.is_retryable() => return outcome,
                Err(_) => {}
            }

            attempts += 1;
            if attempts >= self.config.max_retries {
                return outcome;
            }

            let delay = self
                .config
                .retry_delays
                .get(attempts as usize - 1)
                .copied()
                .unwrap_or(Duration::from_secs(2));

            debug!(url = %url, attempt = attempts, delay_ms = delay.as_millis(), "Retrying chat request");
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn send_reply(&self, conversation_id: &str, text: &str) -> Result<()> {
        let payload = OutgoingMessage {
            content: text,
            message_type: "outgoing",
        };
        let body = serde_json::to_string(&payload)
            .map_err(|e| ChatError::Config {
                status: 0,
                message: e.to_string(),
            })?;

        debug!(conversation_id = %conversation_id, "Sending reply");
        self.post_with_retry(&self.messages_url(conversation_id), Some(body))
            .await
    }

    async fn set_typing(&self, conversation_id: &str, on: bool) -> Result<()> {
        // Typing is best-effort: a single attempt, no retries.
        self.post_once(&self.typing_url(conversation_id, on), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_pauses_after_consecutive_hard_failures() {
        let gate = DeliveryGate::new(3, Duration::from_secs(60));

        assert!(gate.admit());
        gate.record_hard_failure();
        gate.record_hard_failure();
        assert!(!gate.is_paused());

        gate.record_hard_failure();
        assert!(gate.is_paused());
        assert!(!gate.admit());
    }

    #[test]
    fn client_error_clears_the_streak() {
        let gate = DeliveryGate::new(3, Duration::from_secs(60));

        gate.record_hard_failure();
        gate.record_hard_failure();
        // A 4xx answer proves the platform is up.
        gate.record_success();
        gate.record_hard_failure();
        gate.record_hard_failure();
        assert!(!gate.is_paused());
    }

    #[test]
    fn one_probe_per_cool_off_window() {
        let gate = DeliveryGate::new(1, Duration::from_millis(0));

        gate.record_hard_failure();
        // Zero cool-off: the window has always elapsed, so the next admit
        // is the probe and it re-arms the window.
        assert!(gate.admit());

        gate.record_success();
        assert!(!gate.is_paused());
        assert!(gate.admit());
    }

    #[test]
    fn failed_probe_keeps_delivery_paused() {
        let gate = DeliveryGate::new(1, Duration::from_secs(60));

        gate.record_hard_failure();
        assert!(gate.is_paused());

        // Simulate the cool-off elapsing by replacing the window.
        *gate.paused_until.lock() = Some(Instant::now() - Duration::from_millis(1));
        assert!(gate.admit());
        gate.record_hard_failure();
        assert!(gate.is_paused());
        assert!(!gate.admit());
    }
}
