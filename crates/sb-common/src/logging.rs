//! Structured logging
//!
//! Tracing setup plus the span vocabulary the processor logs under. Every
//! event that belongs to one unit of work is emitted inside the matching
//! span — `conversation` for admission, `job` for a worker attempt,
//! `beacon` for a trip through the rule engine — so aggregated logs can
//! follow a single message or beacon end to end.
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: "json" for aggregation-friendly output, anything else
//!   for human-readable text (default: text)
//! - `RUST_LOG`: filter directives. When unset, component crates log at
//!   info and the HTTP/Redis transports are quieted to warn.

use tracing::{info_span, Span};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Default directives: the transports underneath the chat client and the
/// limiter are chatty at info and drown out admission decisions.
const DEFAULT_DIRECTIVES: &str = "info,hyper=warn,reqwest=warn,redis=warn";

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }

    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }
}

/// Initialize logging for the given service.
pub fn init_logging(service: &str) {
    let format = LogFormat::from_env();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    match format {
        LogFormat::Json => {
            // Current span only: the span fields below already carry the
            // full correlation keys, a span list would repeat them.
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(false)
                        .flatten_event(true)
                        .with_target(true),
                )
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_target(true).with_ansi(true))
                .init();
        }
    }

    tracing::info!(service = service, format = ?format, "Logging initialised");
}

// ----------------------------------------------------------------------
// Span vocabulary
// ----------------------------------------------------------------------

/// Span for everything that happens to one inbound message during
/// admission and dispatch.
pub fn conversation_span(conversation_id: &str) -> Span {
    info_span!("conversation", conversation_id = %conversation_id)
}

/// Span for one job attempt inside the worker pool.
pub fn job_span(job_id: &str, conversation_id: &str, handler: &str) -> Span {
    info_span!(
        "job",
        job_id = %job_id,
        conversation_id = %conversation_id,
        handler = %handler,
    )
}

/// Span for one beacon travelling the rule engine.
pub fn beacon_span(beacon_id: &str, signal_source: &str) -> Span {
    info_span!(
        "beacon",
        beacon_id = %beacon_id,
        signal_source = %signal_source,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parses_json_case_insensitively() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("text")), LogFormat::Text);
        assert_eq!(LogFormat::parse(Some("")), LogFormat::Text);
        assert_eq!(LogFormat::parse(None), LogFormat::Text);
    }

    #[test]
    fn default_directives_are_a_valid_filter() {
        let filter = EnvFilter::new(DEFAULT_DIRECTIVES);
        drop(filter);
    }

    #[test]
    fn span_constructors_accept_plain_ids() {
        // Without a subscriber the spans are disabled but must still be
        // constructible from plain string fields.
        let _ = conversation_span("C1");
        let _ = job_span("j1", "C1", "classify_intent");
        let _ = beacon_span("b1", "OPS_TRAFFIC_ALERT");
    }
}
