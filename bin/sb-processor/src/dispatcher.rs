//! Dispatcher - the seam between admission and background work
//!
//! Runs the raw webhook payload through the adapter and the Governor, and
//! on PROCEED enqueues exactly one job. The handler identifier is chosen
//! from the admission context: conversations with an active flow continue
//! it, everything else goes to intent classification. Enqueue returns
//! immediately, so the platform gets its acknowledgement well under its
//! timeout.

use std::sync::Arc;

use sb_common::{logging, AdmissionDecision, GovernorVerdict, Job};
use sb_governor::{normalize_webhook, Governor};
use sb_queue::WorkerPool;
use tracing::{debug, info, Instrument};

/// Handler id for continuing an active flow.
pub const HANDLER_FLOW_STEP: &str = "flow_step";
/// Handler id for fresh messages entering intent classification.
pub const HANDLER_CLASSIFY_INTENT: &str = "classify_intent";

/// Outcome of one webhook dispatch.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub verdict: GovernorVerdict,
    pub job_id: Option<String>,
}

pub struct Dispatcher {
    governor: Arc<Governor>,
    pool: Arc<WorkerPool>,
}

impl Dispatcher {
    pub fn new(governor: Arc<Governor>, pool: Arc<WorkerPool>) -> Self {
        Self { governor, pool }
    }

    /// Admit and enqueue one raw webhook payload.
    pub async fn dispatch(&self, payload: &serde_json::Value) -> DispatchOutcome {
        let envelope = match normalize_webhook(payload) {
            Some(envelope) => envelope,
            None => {
                debug!("Unrecognisable webhook payload");
                return DispatchOutcome {
                    verdict: GovernorVerdict::skip(
                        AdmissionDecision::SkipInvalid,
                        "unrecognisable payload shape",
                    ),
                    job_id: None,
                };
            }
        };

        let span =
            logging::conversation_span(envelope.conversation_id.as_deref().unwrap_or("unknown"));
        let verdict = self.governor.evaluate(&envelope).instrument(span).await;
        if !verdict.should_process {
            debug!(
                decision = %verdict.decision,
                reason = %verdict.reason,
                "Webhook skipped at admission"
            );
            return DispatchOutcome {
                verdict,
                job_id: None,
            };
        }

        let conversation_id = verdict
            .context
            .conversation_id
            .clone()
            .unwrap_or_default();

        let handler = if verdict.context.has_active_flow {
            HANDLER_FLOW_STEP
        } else {
            HANDLER_CLASSIFY_INTENT
        };

        let job = Job::new(
            conversation_id.clone(),
            handler,
            serde_json::json!({
                "text": envelope.text,
                "messageId": envelope.message_id,
                "contact": envelope.contact,
                "flowState": verdict.context.flow_state,
            }),
        );

        match self.pool.enqueue(job).await {
            Ok(job_id) => {
                info!(
                    conversation_id = %conversation_id,
                    job_id = %job_id,
                    handler = %handler,
                    "Webhook admitted and enqueued"
                );
                DispatchOutcome {
                    verdict,
                    job_id: Some(job_id),
                }
            }
            Err(e) => {
                // Admission said yes but the queue refused; surface it as a
                // skip so the caller still gets a decision, never an error.
                tracing::error!(error = %e, "Enqueue failed after admission");
                DispatchOutcome {
                    verdict: GovernorVerdict::skip(
                        AdmissionDecision::SkipInvalid,
                        format!("enqueue failed: {}", e),
                    ),
                    job_id: None,
                }
            }
        }
    }
}
