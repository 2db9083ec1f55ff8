//! Self-healing structured-output runner
//!
//! Runs a model call, validates the raw output against a compiled JSON
//! Schema, and on a recoverable validation failure feeds the broken output
//! plus a correction prompt back to the model. Transient infrastructure
//! failures do not enter the self-healing loop. The runner returns a result
//! object, never an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Error surface of a model client.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model transport error: {0}")]
    Transport(String),

    #[error("Model returned empty output")]
    Empty,
}

/// Role of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One turn of the model conversation.
#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Provider seam: returns the raw model output for a conversation.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, ModelError>;
}

/// A schema violation found while validating model output.
#[derive(Debug, Clone)]
struct SchemaViolation {
    message: String,
    /// Field or path the violation points at, when parseable.
    field: Option<String>,
    /// The raw output that failed, for the correction turn.
    raw_output: String,
}

/// Compiled JSON Schema validator for structured output.
pub struct SchemaValidator {
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn new(schema: &serde_json::Value) -> Result<Self, String> {
        let validator = jsonschema::validator_for(schema).map_err(|e| e.to_string())?;
        Ok(Self { validator })
    }

    /// Parse and validate raw model output.
    fn check(&self, raw: &str) -> Result<serde_json::Value, SchemaViolation> {
        let candidate = extract_json_block(raw).unwrap_or(raw);

        let value: serde_json::Value = serde_json::from_str(candidate).map_err(|e| {
            SchemaViolation {
                message: format!("json parse error: {}", e),
                field: None,
                raw_output: raw.to_string(),
            }
        })?;

        if let Some(error) = self.validator.iter_errors(&value).next() {
            let path = error.instance_path.to_string();
            return Err(SchemaViolation {
                message: format!("schema validation failed: {}", error),
                field: if path.is_empty() {
                    extract_quoted_token(&error.to_string())
                } else {
                    Some(path)
                },
                raw_output: raw.to_string(),
            });
        }

        Ok(value)
    }
}

/// First balanced-looking JSON object inside free text.
fn extract_json_block(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end > start {
        Some(&raw[start..=end])
    } else {
        None
    }
}

fn quoted_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([A-Za-z_][A-Za-z0-9_]*)""#).expect("valid regex"))
}

fn extract_quoted_token(message: &str) -> Option<String> {
    quoted_token_re()
        .captures(message)
        .map(|c| c[1].to_string())
}

/// Error substrings that mark a failure as recoverable by self-healing.
const RECOVERABLE_MARKERS: &[&str] = &[
    "zod",
    "json",
    "parse",
    "validation",
    "invalid",
    "expected",
    "required",
    "undefined",
    "null",
    "type",
    "schema",
];

fn is_recoverable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RECOVERABLE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Total attempts per call (first try + self-healing retries)
    pub max_attempts: u32,
    /// Base backoff between attempts
    pub retry_delay_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_delay_ms: 500,
        }
    }
}

/// Result object of one runner call.
#[derive(Debug, Clone)]
pub struct RunnerOutcome {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub self_healed: bool,
}

/// Point-in-time runner metrics with derived rates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerMetricsSnapshot {
    pub total_calls: u64,
    pub first_try_success: u64,
    pub retry_success: u64,
    pub failures: u64,
    pub self_healing_invocations: u64,
    pub success_rate: f64,
    pub first_try_rate: f64,
    pub self_healing_rate: f64,
}

#[derive(Default)]
struct RunnerMetrics {
    total_calls: AtomicU64,
    first_try_success: AtomicU64,
    retry_success: AtomicU64,
    failures: AtomicU64,
    self_healing_invocations: AtomicU64,
}

/// Self-healing runner over a model client.
pub struct SelfHealingRunner {
    config: RunnerConfig,
    metrics: RunnerMetrics,
}

impl SelfHealingRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            metrics: RunnerMetrics::default(),
        }
    }

    /// Run with the configured attempt cap.
    pub async fn run(
        &self,
        client: &dyn ModelClient,
        messages: &[PromptMessage],
        schema: &SchemaValidator,
    ) -> RunnerOutcome {
        self.run_with_attempts(client, messages, schema, self.config.max_attempts)
            .await
    }

    /// Run with a per-call attempt cap override.
    pub async fn run_with_attempts(
        &self,
        client: &dyn ModelClient,
        messages: &[PromptMessage],
        schema: &SchemaValidator,
        max_attempts: u32,
    ) -> RunnerOutcome {
        self.metrics.total_calls.fetch_add(1, Ordering::SeqCst);

        let mut conversation = messages.to_vec();
        let mut self_healed = false;
        let max_attempts = max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let raw = match client.complete(&conversation).await {
                Ok(raw) => raw,
                Err(e) => {
                    // Transient infrastructure failure: self-healing does
                    // not apply, the caller's retry policy owns this.
                    warn!(attempt = attempt, error = %e, "Model call failed");
                    self.metrics.failures.fetch_add(1, Ordering::SeqCst);
                    return RunnerOutcome {
                        success: false,
                        data: None,
                        error: Some(e.to_string()),
                        attempts: attempt,
                        self_healed,
                    };
                }
            };

            match schema.check(&raw) {
                Ok(data) => {
                    if attempt == 1 {
                        self.metrics.first_try_success.fetch_add(1, Ordering::SeqCst);
                    } else {
                        self.metrics.retry_success.fetch_add(1, Ordering::SeqCst);
                    }
                    return RunnerOutcome {
                        success: true,
                        data: Some(data),
                        error: None,
                        attempts: attempt,
                        self_healed,
                    };
                }
                Err(violation) => {
                    if attempt >= max_attempts || !is_recoverable(&violation.message) {
                        self.metrics.failures.fetch_add(1, Ordering::SeqCst);
                        return RunnerOutcome {
                            success: false,
                            data: None,
                            error: Some(violation.message),
                            attempts: attempt,
                            self_healed,
                        };
                    }

                    debug!(
                        attempt = attempt,
                        field = ?violation.field,
                        "Recoverable validation failure, feeding error back to the model"
                    );
                    self_healed = true;
                    self.metrics
                        .self_healing_invocations
                        .fetch_add(1, Ordering::SeqCst);

                    conversation.push(PromptMessage::assistant(broken_output(&violation)));
                    conversation.push(PromptMessage::user(correction_prompt(&violation)));

                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_delay_ms * attempt as u64,
                    ))
                    .await;
                }
            }
        }

        // Unreachable: the loop always returns on its last attempt.
        self.metrics.failures.fetch_add(1, Ordering::SeqCst);
        RunnerOutcome {
            success: false,
            data: None,
            error: Some("attempts exhausted".to_string()),
            attempts: max_attempts,
            self_healed,
        }
    }

    pub fn metrics(&self) -> RunnerMetricsSnapshot {
        let total = self.metrics.total_calls.load(Ordering::SeqCst);
        let first = self.metrics.first_try_success.load(Ordering::SeqCst);
        let retry = self.metrics.retry_success.load(Ordering::SeqCst);
        let failures = self.metrics.failures.load(Ordering::SeqCst);
        let healing = self.metrics.self_healing_invocations.load(Ordering::SeqCst);

        let rate = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };

        RunnerMetricsSnapshot {
            total_calls: total,
            first_try_success: first,
            retry_success: retry,
            failures,
            self_healing_invocations: healing,
            success_rate: rate(first + retry),
            first_try_rate: rate(first),
            self_healing_rate: rate(healing),
        }
    }
}

impl Default for SelfHealingRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

/// The broken output replayed as an assistant turn. Falls back to whatever
/// JSON-looking block the error message carries, then a placeholder.
fn broken_output(violation: &SchemaViolation) -> String {
    if !violation.raw_output.is_empty() {
        return violation.raw_output.clone();
    }
    extract_json_block(&violation.message)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "(previous output unavailable)".to_string())
}

fn correction_prompt(violation: &SchemaViolation) -> String {
    let field_hint = match &violation.field {
        Some(field) => format!(" Pay attention to the field `{}`.", field),
        None => String::new(),
    };
    format!(
        "Your previous response failed validation: {}.{} \
         Respond again with ONLY a JSON object that satisfies the schema. \
         No prose, no code fences.",
        violation.message, field_hint
    )
}
