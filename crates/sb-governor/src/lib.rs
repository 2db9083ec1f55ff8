//! Governor - admission pipeline for inbound chat messages
//!
//! Decides in a few tens of milliseconds whether a webhook deserves work.
//! Checks run in a fixed order and the first failing check wins; every
//! skip carries a typed reason. External capabilities (agent presence,
//! blacklist, flow state) and the limiter stores fail open: on error the
//! check passes and a warning is logged. Deterministic in-process checks
//! fail closed. The Governor never returns an error to its caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use sb_common::{
    AdmissionDecision, ChatEnvelope, ChatMessageKind, ContactInfo, GovernorContext,
    GovernorVerdict,
};
use sb_limiter::DistributedLimiter;

pub mod adapter;

pub use adapter::{normalize_webhook, strip_html};

/// Failure of an external capability. Always handled fail-open.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("capability timed out")]
    Timeout,
}

/// Reports whether a human agent currently handles a conversation.
#[async_trait]
pub trait AgentPresence: Send + Sync {
    async fn is_agent_active(&self, conversation_id: &str) -> Result<bool, CapabilityError>;
}

/// Answer from the blacklist capability.
#[derive(Debug, Clone, Default)]
pub struct BlacklistVerdict {
    pub blocked: bool,
    pub reason: Option<String>,
    pub source: Option<String>,
}

/// Checks a contact against the blacklist, keyed on phone/email/contact id.
#[async_trait]
pub trait BlacklistSource: Send + Sync {
    async fn check(&self, contact: &ContactInfo) -> Result<BlacklistVerdict, CapabilityError>;
}

/// Loads the current flow state for a conversation, if any.
#[async_trait]
pub trait FlowStateStore: Send + Sync {
    async fn load(
        &self,
        conversation_id: &str,
    ) -> Result<Option<serde_json::Value>, CapabilityError>;
}

/// Service-hours admission gate, `[start, end)` on the configured offset.
#[derive(Debug, Clone)]
pub struct ServiceHours {
    pub enabled: bool,
    pub start: u32,
    pub end: u32,
    pub utc_offset_hours: i32,
}

impl Default for ServiceHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: 9,
            end: 21,
            utc_offset_hours: 0,
        }
    }
}

/// Governor configuration.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Inclusive lower bound on trimmed message length
    pub min_length: usize,
    /// Inclusive upper bound on trimmed message length
    pub max_length: usize,
    pub service_hours: ServiceHours,
    /// Per-capability call budget; keeps the pipeline inside its 50 ms target
    pub capability_timeout: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            min_length: 1,
            max_length: 4000,
            service_hours: ServiceHours::default(),
            capability_timeout: Duration::from_millis(30),
        }
    }
}

/// The admission pipeline.
pub struct Governor {
    limiter: Arc<DistributedLimiter>,
    agent_presence: Option<Arc<dyn AgentPresence>>,
    blacklist: Option<Arc<dyn BlacklistSource>>,
    flow_state: Option<Arc<dyn FlowStateStore>>,
    config: GovernorConfig,
}

impl Governor {
    pub fn new(limiter: Arc<DistributedLimiter>, config: GovernorConfig) -> Self {
        Self {
            limiter,
            agent_presence: None,
            blacklist: None,
            flow_state: None,
            config,
        }
    }

    pub fn with_agent_presence(mut self, capability: Arc<dyn AgentPresence>) -> Self {
        self.agent_presence = Some(capability);
        self
    }

    pub fn with_blacklist(mut self, capability: Arc<dyn BlacklistSource>) -> Self {
        self.blacklist = Some(capability);
        self
    }

    pub fn with_flow_state(mut self, capability: Arc<dyn FlowStateStore>) -> Self {
        self.flow_state = Some(capability);
        self
    }

    /// Evaluate an envelope against the full pipeline.
    pub async fn evaluate(&self, envelope: &ChatEnvelope) -> GovernorVerdict {
        self.evaluate_at(envelope, Utc::now()).await
    }

    /// Evaluate with an explicit clock, for the service-hours gate.
    pub async fn evaluate_at(
        &self,
        envelope: &ChatEnvelope,
        now: DateTime<Utc>,
    ) -> GovernorVerdict {
        // 1. Valid payload: a conversation id is required downstream.
        let conversation_id = match envelope.conversation_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => {
                return GovernorVerdict::skip(
                    AdmissionDecision::SkipInvalid,
                    "missing conversation id",
                )
            }
        };

        // 2. Message type: only incoming customer messages get work.
        match envelope.message_kind {
            ChatMessageKind::Outgoing => {
                return GovernorVerdict::skip(AdmissionDecision::SkipOutgoing, "outgoing message")
            }
            ChatMessageKind::Activity => {
                return GovernorVerdict::skip(AdmissionDecision::SkipOutgoing, "activity message")
            }
            ChatMessageKind::Incoming => {}
        }
        if envelope.is_private {
            return GovernorVerdict::skip(AdmissionDecision::SkipPrivate, "private note");
        }

        // 3. Content bounds.
        let text = envelope.text.trim();
        if text.len() < self.config.min_length {
            return GovernorVerdict::skip(AdmissionDecision::SkipEmpty, "empty message");
        }
        if text.len() > self.config.max_length {
            return GovernorVerdict::skip(
                AdmissionDecision::SkipSpam,
                format!("message exceeds {} characters", self.config.max_length),
            );
        }

        // 4. Duplicate: same text on the same conversation inside the window.
        let dedupe = self.limiter.check_duplicate(conversation_id, text).await;
        if dedupe.is_duplicate {
            debug!(
                conversation_id = %conversation_id,
                hash = dedupe.hash,
                source = ?dedupe.source,
                "Duplicate message skipped"
            );
            return GovernorVerdict::skip(
                AdmissionDecision::SkipDuplicate,
                "repeated message inside dedupe window",
            );
        }

        // 5. Rate limit.
        let rate = self.limiter.check_rate_limit(conversation_id).await;
        if !rate.allowed {
            debug!(
                conversation_id = %conversation_id,
                count = rate.count,
                limit = rate.limit,
                source = ?rate.source,
                "Rate limited conversation"
            );
            let mut verdict = GovernorVerdict::skip(
                AdmissionDecision::SkipRateLimited,
                format!("{} messages inside window, limit {}", rate.count, rate.limit),
            );
            verdict.context.rate_remaining = Some(rate.remaining);
            return verdict;
        }

        // 6. Service hours.
        if self.config.service_hours.enabled {
            let local =
                now + ChronoDuration::hours(self.config.service_hours.utc_offset_hours as i64);
            let hour = local.hour();
            if hour < self.config.service_hours.start || hour >= self.config.service_hours.end {
                return GovernorVerdict::skip(
                    AdmissionDecision::SkipOutsideHours,
                    format!(
                        "hour {} outside service window [{}, {})",
                        hour, self.config.service_hours.start, self.config.service_hours.end
                    ),
                );
            }
        }

        // 7. Agent active: fail-open.
        if let Some(capability) = &self.agent_presence {
            match self.call_capability(capability.is_agent_active(conversation_id)).await {
                Ok(true) => {
                    return GovernorVerdict::skip(
                        AdmissionDecision::SkipAgentActive,
                        "human agent handling conversation",
                    )
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Agent presence check failed, passing open"
                    );
                }
            }
        }

        // 8. Blacklist: fail-open.
        if let Some(capability) = &self.blacklist {
            match self.call_capability(capability.check(&envelope.contact)).await {
                Ok(verdict) if verdict.blocked => {
                    return GovernorVerdict::skip(
                        AdmissionDecision::SkipBlacklisted,
                        verdict.reason.unwrap_or_else(|| "contact blacklisted".to_string()),
                    )
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Blacklist check failed, passing open"
                    );
                }
            }
        }

        // Enrichment: flow state for the conversation, fail-open to none.
        let flow_state = match &self.flow_state {
            Some(store) => match self.call_capability(store.load(conversation_id)).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Flow state load failed, continuing without it"
                    );
                    None
                }
            },
            None => None,
        };

        let context = GovernorContext {
            conversation_id: Some(conversation_id.to_string()),
            has_active_flow: flow_state.is_some(),
            flow_state,
            rate_remaining: Some(rate.remaining),
        };

        GovernorVerdict::proceed("all checks passed", context)
    }

    /// Run a capability call under the configured budget.
    async fn call_capability<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, CapabilityError>>,
    ) -> Result<T, CapabilityError> {
        match tokio::time::timeout(self.config.capability_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout),
        }
    }
}
