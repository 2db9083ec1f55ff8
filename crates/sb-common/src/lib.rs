use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod alerts;
pub mod logging;

pub use alerts::{Alert, AlertCategory, AlertNotifier, AlertService, AlertServiceConfig, AlertSeverity};

// ============================================================================
// Chat Envelope Types
// ============================================================================

/// Kind of chat message as normalised from the platform payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMessageKind {
    Incoming,
    Outgoing,
    Activity,
}

/// Contact details attached to a conversation. All fields optional on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.email.is_none()
    }
}

/// The normalised webhook envelope produced by the platform adapter.
///
/// A missing `conversation_id` makes the envelope terminally invalid: no
/// downstream component accepts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEnvelope {
    #[serde(default)]
    pub event: Option<String>,
    pub message_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub inbox_id: Option<String>,
    #[serde(default)]
    pub inbox_name: Option<String>,
    pub message_kind: ChatMessageKind,
    #[serde(default)]
    pub is_private: bool,
    /// HTML-stripped, trimmed message text.
    pub text: String,
    #[serde(default)]
    pub contact: ContactInfo,
}

// ============================================================================
// Admission Types
// ============================================================================

/// Outcome of the admission pipeline. Exactly one variant admits work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionDecision {
    Proceed,
    SkipOutgoing,
    SkipPrivate,
    SkipAgentActive,
    SkipOutsideHours,
    SkipSpam,
    SkipDuplicate,
    SkipRateLimited,
    SkipInvalid,
    SkipEmpty,
    SkipBlacklisted,
}

impl AdmissionDecision {
    pub fn should_process(&self) -> bool {
        matches!(self, AdmissionDecision::Proceed)
    }
}

impl std::fmt::Display for AdmissionDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AdmissionDecision::Proceed => "PROCEED",
            AdmissionDecision::SkipOutgoing => "SKIP_OUTGOING",
            AdmissionDecision::SkipPrivate => "SKIP_PRIVATE",
            AdmissionDecision::SkipAgentActive => "SKIP_AGENT_ACTIVE",
            AdmissionDecision::SkipOutsideHours => "SKIP_OUTSIDE_HOURS",
            AdmissionDecision::SkipSpam => "SKIP_SPAM",
            AdmissionDecision::SkipDuplicate => "SKIP_DUPLICATE",
            AdmissionDecision::SkipRateLimited => "SKIP_RATE_LIMITED",
            AdmissionDecision::SkipInvalid => "SKIP_INVALID",
            AdmissionDecision::SkipEmpty => "SKIP_EMPTY",
            AdmissionDecision::SkipBlacklisted => "SKIP_BLACKLISTED",
        };
        write!(f, "{}", s)
    }
}

/// Context enriched onto a PROCEED verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorContext {
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Current flow state for the conversation, if any.
    #[serde(default)]
    pub flow_state: Option<serde_json::Value>,
    #[serde(default)]
    pub has_active_flow: bool,
    /// Remaining rate-limit budget observed during admission.
    #[serde(default)]
    pub rate_remaining: Option<u32>,
}

/// The Governor's answer. Invariant: `should_process == (decision == Proceed)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorVerdict {
    pub should_process: bool,
    pub decision: AdmissionDecision,
    pub reason: String,
    pub context: GovernorContext,
}

impl GovernorVerdict {
    pub fn proceed(reason: impl Into<String>, context: GovernorContext) -> Self {
        Self {
            should_process: true,
            decision: AdmissionDecision::Proceed,
            reason: reason.into(),
            context,
        }
    }

    pub fn skip(decision: AdmissionDecision, reason: impl Into<String>) -> Self {
        debug_assert!(!decision.should_process());
        Self {
            should_process: false,
            decision,
            reason: reason.into(),
            context: GovernorContext::default(),
        }
    }
}

// ============================================================================
// Job Types
// ============================================================================

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A unit of background work owned by the queue.
///
/// Jobs carry a handler identifier resolved against a static registry, never
/// a closure, so they survive serialisation into the Redis-backed queue and
/// the DLQ requeue path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub conversation_id: String,
    /// Handler identifier resolved by the worker's registry.
    pub handler: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub attempts: u32,
    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(
        conversation_id: impl Into<String>,
        handler: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            handler: handler.into(),
            payload,
            attempts: 0,
            state: JobState::Pending,
            enqueued_at: Utc::now(),
            last_attempt_at: None,
            last_error: None,
        }
    }
}

/// A job that exhausted its retry budget, with failure forensics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqRecord {
    pub job_id: String,
    pub handler: String,
    pub conversation_id: String,
    pub payload: serde_json::Value,
    pub queue: String,
    pub failure_reason: String,
    #[serde(default)]
    pub failure_stack: Option<String>,
    pub attempts_made: u32,
    pub failed_at: DateTime<Utc>,
}

// ============================================================================
// Beacon Types
// ============================================================================

/// Actor that produced a beacon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub id: String,
}

/// An internal operational event, distinct from a customer message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beacon {
    pub beacon_id: String,
    pub timestamp_iso: DateTime<Utc>,
    pub signal_source: String,
    #[serde(default)]
    pub actor: Actor,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub machine_payload: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Severity of a normalised signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// Detector output normalised ahead of the rule engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedSignal {
    pub signal_type: String,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub entities: serde_json::Value,
    #[serde(default)]
    pub confidence: f64,
}

// ============================================================================
// Instruction Types
// ============================================================================

/// Downstream application an instruction is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetApp {
    ControlTower,
    AppQa,
    AppOps,
    AppShift,
    System,
}

impl std::fmt::Display for TargetApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetApp::ControlTower => "CONTROL_TOWER",
            TargetApp::AppQa => "APP_QA",
            TargetApp::AppOps => "APP_OPS",
            TargetApp::AppShift => "APP_SHIFT",
            TargetApp::System => "SYSTEM",
        };
        write!(f, "{}", s)
    }
}

/// Instruction priority, derived from severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

/// A single routable action inside an instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Action {
    pub fn new(action_type: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            action_type: action_type.into(),
            params,
        }
    }

    pub fn bare(action_type: impl Into<String>) -> Self {
        Self::new(action_type, serde_json::json!({}))
    }
}

/// Routing target of an instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionTarget {
    pub app: TargetApp,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A hard business rule that blocked a proposed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardRuleViolation {
    pub rule: String,
    pub blocked_action: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub life_days: Option<u32>,
}

/// The deterministic, self-describing output for a beacon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub instruction_id: String,
    pub beacon_id: String,
    pub created_at_iso: DateTime<Utc>,
    pub target: InstructionTarget,
    pub priority: Priority,
    pub message: String,
    pub actions: Vec<Action>,
    pub confidence: f64,
    pub needs_human_clarification: bool,
    #[serde(default)]
    pub clarification_question: Option<String>,
    /// At most three bullets after enforcement.
    pub rationale_bullets: Vec<String>,
    #[serde(default)]
    pub model_trace: serde_json::Value,
}

// ============================================================================
// Feedback Types
// ============================================================================

/// Labelled outcome attached to a detector finding or case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedbackLabel {
    /// True positive
    TP,
    /// False positive
    FP,
    /// True negative
    TN,
    /// False negative
    FN,
    /// Acknowledged by an operator
    ACK,
    /// Ignored by an operator
    IGN,
    /// Acted upon
    ACT,
    /// Escalated
    ESC,
    /// Resolved
    RES,
    /// Recurred after resolution
    REC,
    /// Prevented
    PRV,
}

/// Append-only feedback record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub id: String,
    pub finding_id: String,
    pub detector: String,
    pub label: FeedbackLabel,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl FeedbackRecord {
    pub fn new(
        finding_id: impl Into<String>,
        detector: impl Into<String>,
        label: FeedbackLabel,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            finding_id: finding_id.into(),
            detector: detector.into(),
            label,
            source: source.into(),
            timestamp: Utc::now(),
            processed: false,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Mutable detector configuration, adjusted only through the tuner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    pub name: String,
    pub threshold: f64,
    #[serde(default)]
    pub last_adjusted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_adjusted_by: Option<String>,
}

impl DetectorConfig {
    pub fn new(name: impl Into<String>, threshold: f64) -> Self {
        Self {
            name: name.into(),
            threshold,
            last_adjusted_at: None,
            last_adjusted_by: None,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Chat platform error: {0}")]
    Chat(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Processing timeout after {0} ms")]
    Timeout(u64),

    #[error("Shutdown in progress")]
    ShutdownInProgress,
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_invariant_holds() {
        let proceed = GovernorVerdict::proceed("ok", GovernorContext::default());
        assert!(proceed.should_process);
        assert_eq!(proceed.decision, AdmissionDecision::Proceed);

        let skip = GovernorVerdict::skip(AdmissionDecision::SkipDuplicate, "repeat");
        assert!(!skip.should_process);
        assert_eq!(skip.decision.should_process(), skip.should_process);
    }

    #[test]
    fn job_roundtrips_through_json() {
        let job = Job::new("C1", "faq_flow", serde_json::json!({"text": "hola"}));
        let raw = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.handler, "faq_flow");
        assert_eq!(back.state, JobState::Pending);
    }

    #[test]
    fn severity_parses_case_insensitive() {
        assert_eq!(Severity::parse("high"), Some(Severity::High));
        assert_eq!(Severity::parse("CRITICAL"), Some(Severity::Critical));
        assert_eq!(Severity::parse("whatever"), None);
    }

    #[test]
    fn action_serialises_type_field() {
        let action = Action::bare("LOG_ONLY");
        let raw = serde_json::to_value(&action).unwrap();
        assert_eq!(raw["type"], "LOG_ONLY");
    }
}
