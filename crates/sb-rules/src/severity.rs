//! Severity inference and priority mapping

use sb_common::{Beacon, NormalizedSignal, Priority, Severity};

/// Severity derived from the signal source alone.
fn source_severity(signal_source: &str) -> Option<Severity> {
    match signal_source {
        "OPS_TRAFFIC_ALERT" => Some(Severity::High),
        "ORDER_CANCEL_REQUEST" => Some(Severity::High),
        "INVENTORY_LOW" => Some(Severity::High),
        "QA_BATCH_FINISHED" => Some(Severity::Medium),
        "HUMAN_DECISION_RESPONSE" => Some(Severity::Medium),
        "SHIFT_END_CHECKIN" => Some(Severity::Low),
        _ => None,
    }
}

/// Infer the severity of a beacon.
///
/// Order: the normalised signal's severity when present, the source table,
/// then `machine_payload.severity` as a secondary hint. Unknown material
/// lands on MEDIUM.
pub fn infer_severity(beacon: &Beacon, signal: Option<&NormalizedSignal>) -> Severity {
    if let Some(severity) = signal.and_then(|s| s.severity) {
        return severity;
    }

    if let Some(severity) = source_severity(&beacon.signal_source) {
        return severity;
    }

    beacon
        .machine_payload
        .get("severity")
        .and_then(|v| v.as_str())
        .and_then(Severity::parse)
        .unwrap_or(Severity::Medium)
}

/// Severity → instruction priority.
pub fn priority_for(severity: Severity) -> Priority {
    match severity {
        Severity::Critical => Priority::Critical,
        Severity::High => Priority::High,
        Severity::Medium => Priority::Medium,
        Severity::Low => Priority::Low,
    }
}

/// Parallel task name used in traces and operator views.
pub fn task_name_for(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "atencion_inmediata",
        Severity::High => "revision_urgente",
        Severity::Medium => "seguimiento",
        Severity::Low => "registro",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn beacon(source: &str, payload: serde_json::Value) -> Beacon {
        Beacon {
            beacon_id: "b1".to_string(),
            timestamp_iso: Utc::now(),
            signal_source: source.to_string(),
            actor: Default::default(),
            location_id: None,
            machine_payload: payload,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn normalized_signal_wins() {
        let signal = NormalizedSignal {
            signal_type: "x".to_string(),
            severity: Some(Severity::Critical),
            summary: String::new(),
            entities: serde_json::Value::Null,
            confidence: 1.0,
        };
        let b = beacon("SHIFT_END_CHECKIN", serde_json::Value::Null);
        assert_eq!(infer_severity(&b, Some(&signal)), Severity::Critical);
    }

    #[test]
    fn source_table_applies() {
        let b = beacon("OPS_TRAFFIC_ALERT", serde_json::Value::Null);
        assert_eq!(infer_severity(&b, None), Severity::High);

        let b = beacon("SHIFT_END_CHECKIN", serde_json::Value::Null);
        assert_eq!(infer_severity(&b, None), Severity::Low);
    }

    #[test]
    fn payload_hint_is_secondary() {
        let b = beacon("UNKNOWN_SOURCE", serde_json::json!({"severity": "critical"}));
        assert_eq!(infer_severity(&b, None), Severity::Critical);

        let b = beacon("UNKNOWN_SOURCE", serde_json::json!({}));
        assert_eq!(infer_severity(&b, None), Severity::Medium);
    }

    #[test]
    fn priority_and_task_name_track_severity() {
        assert_eq!(priority_for(Severity::High), Priority::High);
        assert_eq!(task_name_for(Severity::High), "revision_urgente");
        assert_eq!(task_name_for(Severity::Low), "registro");
    }
}
