//! Admission pipeline tests
//!
//! Tests for:
//! - Typed skip reasons in pipeline order
//! - Dedupe and rate-limit end-to-end scenarios
//! - Fail-open behaviour of external capabilities
//! - PROCEED enrichment with flow state

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use sb_common::{AdmissionDecision, ChatEnvelope, ChatMessageKind, ContactInfo};
use sb_governor::{
    AgentPresence, BlacklistSource, BlacklistVerdict, CapabilityError, FlowStateStore, Governor,
    GovernorConfig, ServiceHours,
};
use sb_limiter::{DistributedLimiter, LimiterConfig};

fn envelope(conversation_id: &str, text: &str) -> ChatEnvelope {
    ChatEnvelope {
        event: Some("message_created".to_string()),
        message_id: "m1".to_string(),
        conversation_id: Some(conversation_id.to_string()),
        account_id: None,
        inbox_id: None,
        inbox_name: None,
        message_kind: ChatMessageKind::Incoming,
        is_private: false,
        text: text.to_string(),
        contact: ContactInfo::default(),
    }
}

fn limiter() -> Arc<DistributedLimiter> {
    Arc::new(DistributedLimiter::in_memory(LimiterConfig::default()))
}

fn limiter_with(max_requests: u32, dedupe_window_ms: u64) -> Arc<DistributedLimiter> {
    Arc::new(DistributedLimiter::in_memory(LimiterConfig {
        window_ms: 60_000,
        max_requests,
        dedupe_window_ms,
    }))
}

struct StaticAgentPresence(bool);

#[async_trait]
impl AgentPresence for StaticAgentPresence {
    async fn is_agent_active(&self, _conversation_id: &str) -> Result<bool, CapabilityError> {
        Ok(self.0)
    }
}

struct FailingAgentPresence {
    calls: AtomicU32,
}

#[async_trait]
impl AgentPresence for FailingAgentPresence {
    async fn is_agent_active(&self, _conversation_id: &str) -> Result<bool, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CapabilityError::Unavailable("gating service down".to_string()))
    }
}

struct StaticBlacklist {
    blocked: AtomicBool,
}

#[async_trait]
impl BlacklistSource for StaticBlacklist {
    async fn check(&self, _contact: &ContactInfo) -> Result<BlacklistVerdict, CapabilityError> {
        Ok(BlacklistVerdict {
            blocked: self.blocked.load(Ordering::SeqCst),
            reason: Some("repeat abuser".to_string()),
            source: Some("crm".to_string()),
        })
    }
}

struct StaticFlowState(Option<serde_json::Value>);

#[async_trait]
impl FlowStateStore for StaticFlowState {
    async fn load(
        &self,
        _conversation_id: &str,
    ) -> Result<Option<serde_json::Value>, CapabilityError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn missing_conversation_id_is_invalid() {
    let governor = Governor::new(limiter(), GovernorConfig::default());
    let mut env = envelope("C1", "hola");
    env.conversation_id = None;

    let verdict = governor.evaluate(&env).await;
    assert_eq!(verdict.decision, AdmissionDecision::SkipInvalid);
    assert!(!verdict.should_process);
}

#[tokio::test]
async fn outgoing_private_and_activity_are_skipped() {
    let governor = Governor::new(limiter(), GovernorConfig::default());

    let mut env = envelope("C1", "hola");
    env.message_kind = ChatMessageKind::Outgoing;
    assert_eq!(
        governor.evaluate(&env).await.decision,
        AdmissionDecision::SkipOutgoing
    );

    let mut env = envelope("C1", "hola");
    env.message_kind = ChatMessageKind::Activity;
    assert_eq!(
        governor.evaluate(&env).await.decision,
        AdmissionDecision::SkipOutgoing
    );

    let mut env = envelope("C1", "hola");
    env.is_private = true;
    assert_eq!(
        governor.evaluate(&env).await.decision,
        AdmissionDecision::SkipPrivate
    );
}

#[tokio::test]
async fn content_bounds_are_enforced() {
    let governor = Governor::new(limiter(), GovernorConfig::default());

    let env = envelope("C1", "   ");
    assert_eq!(
        governor.evaluate(&env).await.decision,
        AdmissionDecision::SkipEmpty
    );

    let env = envelope("C1", &"x".repeat(4001));
    assert_eq!(
        governor.evaluate(&env).await.decision,
        AdmissionDecision::SkipSpam
    );
}

#[tokio::test]
async fn duplicate_within_window_then_fresh_after() {
    // Dedupe window of 200 ms keeps the test fast.
    let governor = Governor::new(limiter_with(10, 200), GovernorConfig::default());

    let env = envelope("C1", "hola");
    assert_eq!(
        governor.evaluate(&env).await.decision,
        AdmissionDecision::Proceed
    );
    assert_eq!(
        governor.evaluate(&env).await.decision,
        AdmissionDecision::SkipDuplicate
    );

    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    assert_eq!(
        governor.evaluate(&env).await.decision,
        AdmissionDecision::Proceed
    );
}

#[tokio::test]
async fn rate_limit_admits_up_to_max_requests() {
    let governor = Governor::new(limiter_with(2, 5000), GovernorConfig::default());

    // Three distinct texts so the dedupe check stays out of the way.
    assert!(governor.evaluate(&envelope("C2", "uno")).await.should_process);
    assert!(governor.evaluate(&envelope("C2", "dos")).await.should_process);

    let third = governor.evaluate(&envelope("C2", "tres")).await;
    assert_eq!(third.decision, AdmissionDecision::SkipRateLimited);
    assert_eq!(third.context.rate_remaining, Some(0));
}

#[tokio::test]
async fn service_hours_gate_uses_configured_window() {
    let config = GovernorConfig {
        service_hours: ServiceHours {
            enabled: true,
            start: 9,
            end: 21,
            utc_offset_hours: 0,
        },
        ..GovernorConfig::default()
    };
    let governor = Governor::new(limiter(), config);

    let at_seven = Utc.with_ymd_and_hms(2026, 3, 10, 7, 0, 0).unwrap();
    let verdict = governor.evaluate_at(&envelope("C3", "hola"), at_seven).await;
    assert_eq!(verdict.decision, AdmissionDecision::SkipOutsideHours);

    let at_noon = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
    let verdict = governor.evaluate_at(&envelope("C3", "buenas"), at_noon).await;
    assert!(verdict.should_process);
}

#[tokio::test]
async fn active_agent_skips_conversation() {
    let governor = Governor::new(limiter(), GovernorConfig::default())
        .with_agent_presence(Arc::new(StaticAgentPresence(true)));

    let verdict = governor.evaluate(&envelope("C4", "hola")).await;
    assert_eq!(verdict.decision, AdmissionDecision::SkipAgentActive);
}

#[tokio::test]
async fn failing_capability_passes_open() {
    let presence = Arc::new(FailingAgentPresence {
        calls: AtomicU32::new(0),
    });
    let governor = Governor::new(limiter(), GovernorConfig::default())
        .with_agent_presence(presence.clone());

    let verdict = governor.evaluate(&envelope("C5", "hola")).await;
    assert!(verdict.should_process, "capability failure must not block admission");
    assert_eq!(presence.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn blacklisted_contact_is_skipped() {
    let blacklist = Arc::new(StaticBlacklist {
        blocked: AtomicBool::new(true),
    });
    let governor =
        Governor::new(limiter(), GovernorConfig::default()).with_blacklist(blacklist.clone());

    let verdict = governor.evaluate(&envelope("C6", "hola")).await;
    assert_eq!(verdict.decision, AdmissionDecision::SkipBlacklisted);
    assert_eq!(verdict.reason, "repeat abuser");

    blacklist.blocked.store(false, Ordering::SeqCst);
    let verdict = governor.evaluate(&envelope("C6", "otra cosa")).await;
    assert!(verdict.should_process);
}

#[tokio::test]
async fn proceed_is_enriched_with_flow_state() {
    let governor = Governor::new(limiter(), GovernorConfig::default())
        .with_flow_state(Arc::new(StaticFlowState(Some(
            serde_json::json!({"flow": "order_status", "step": 2}),
        ))));

    let verdict = governor.evaluate(&envelope("C7", "hola")).await;
    assert!(verdict.should_process);
    assert!(verdict.context.has_active_flow);
    assert_eq!(
        verdict.context.flow_state.as_ref().unwrap()["flow"],
        "order_status"
    );
}

#[tokio::test]
async fn verdict_invariant_holds_for_every_path() {
    let governor = Governor::new(limiter_with(1, 5000), GovernorConfig::default());

    for env in [
        envelope("C8", "hola"),
        envelope("C8", "hola"),
        envelope("C8", ""),
    ] {
        let verdict = governor.evaluate(&env).await;
        assert_eq!(
            verdict.should_process,
            verdict.decision == AdmissionDecision::Proceed
        );
    }
}
