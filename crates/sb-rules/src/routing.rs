//! Target app selection
//!
//! Decided in order: source map, signal-type map, substring fallback,
//! actor-role map, then SYSTEM.

use sb_common::{Beacon, NormalizedSignal, TargetApp};

fn source_target(signal_source: &str) -> Option<TargetApp> {
    match signal_source {
        "OPS_TRAFFIC_ALERT" | "INVENTORY_LOW" => Some(TargetApp::AppOps),
        "QA_BATCH_FINISHED" => Some(TargetApp::AppQa),
        "SHIFT_END_CHECKIN" => Some(TargetApp::AppShift),
        "HUMAN_DECISION_RESPONSE" => Some(TargetApp::ControlTower),
        _ => None,
    }
}

fn signal_type_target(signal_type: &str) -> Option<TargetApp> {
    match signal_type {
        "TRAFFIC_SURGE" | "STOCK_SHORTAGE" => Some(TargetApp::AppOps),
        "QUALITY_ISSUE" | "BATCH_RESULT" => Some(TargetApp::AppQa),
        "STAFFING" | "SHIFT_REPORT" => Some(TargetApp::AppShift),
        _ => None,
    }
}

fn role_target(role: &str) -> Option<TargetApp> {
    match role.to_ascii_uppercase().as_str() {
        "QA" | "QA_LEAD" => Some(TargetApp::AppQa),
        "OPS" | "OPERATOR" => Some(TargetApp::AppOps),
        "SHIFT_LEAD" => Some(TargetApp::AppShift),
        _ => None,
    }
}

/// Pick the downstream app an instruction is routed to.
pub fn select_target_app(beacon: &Beacon, signal: Option<&NormalizedSignal>) -> TargetApp {
    if let Some(target) = source_target(&beacon.signal_source) {
        return target;
    }

    if let Some(target) = signal.and_then(|s| signal_type_target(&s.signal_type)) {
        return target;
    }

    // Anything smelling of a cancellation goes to the control tower.
    if beacon.signal_source.to_ascii_uppercase().contains("CANCEL") {
        return TargetApp::ControlTower;
    }

    if let Some(target) = role_target(&beacon.actor.role) {
        return target;
    }

    TargetApp::System
}
