//! Per-target action sanitisation
//!
//! Every action type must appear in the allow-list of the instruction's
//! target app. Disallowed actions are dropped; when anything was dropped
//! and the target is not the control tower, a single escalation is
//! appended so the dropped intent is not silently lost.

use sb_common::{Action, TargetApp};
use tracing::debug;

use crate::actions::*;

/// Allow-list of action types per target app.
pub fn allowed_actions(app: TargetApp) -> &'static [&'static str] {
    match app {
        TargetApp::ControlTower => &[
            ESCALATE_TO_CONTROL_TOWER,
            LOG_ONLY,
            REQUEST_APPROVAL,
            RESERVE_SHADOW_INVENTORY,
            PAUSE_FUTURE_WEB_SALES,
            BLOCK_VIRTUAL_STOCK_BATCH,
            SCHEDULE_QA_REVIEW,
            REALLOCATE_STAFF,
            NOTIFY_TEAM,
            CREATE_INCIDENT,
        ],
        TargetApp::AppQa => &[
            BLOCK_VIRTUAL_STOCK_BATCH,
            SCHEDULE_QA_REVIEW,
            LOG_ONLY,
            REQUEST_APPROVAL,
            ESCALATE_TO_CONTROL_TOWER,
        ],
        TargetApp::AppOps => &[
            RESERVE_SHADOW_INVENTORY,
            PAUSE_FUTURE_WEB_SALES,
            NOTIFY_TEAM,
            LOG_ONLY,
            REQUEST_APPROVAL,
            ESCALATE_TO_CONTROL_TOWER,
        ],
        TargetApp::AppShift => &[
            REALLOCATE_STAFF,
            NOTIFY_TEAM,
            LOG_ONLY,
            REQUEST_APPROVAL,
            ESCALATE_TO_CONTROL_TOWER,
        ],
        TargetApp::System => &[LOG_ONLY, ESCALATE_TO_CONTROL_TOWER],
    }
}

/// Drop actions the target app may not receive. Appends one escalation when
/// anything was dropped and the target is not the control tower.
pub fn sanitize_actions(actions: Vec<Action>, app: TargetApp) -> Vec<Action> {
    let allowed = allowed_actions(app);

    let mut dropped: Vec<String> = Vec::new();
    let mut kept: Vec<Action> = Vec::new();

    for action in actions {
        if allowed.contains(&action.action_type.as_str()) {
            kept.push(action);
        } else {
            debug!(
                action_type = %action.action_type,
                target_app = %app,
                "Dropping action not allowed for target app"
            );
            dropped.push(action.action_type);
        }
    }

    if !dropped.is_empty() && app != TargetApp::ControlTower {
        let already_escalated = kept.iter().any(|a| {
            a.action_type == ESCALATE_TO_CONTROL_TOWER
                && a.params.get("reason").and_then(|r| r.as_str()) == Some(REASON_NOT_AUTHORIZED)
        });
        if !already_escalated {
            kept.push(Action::new(
                ESCALATE_TO_CONTROL_TOWER,
                serde_json::json!({
                    "reason": REASON_NOT_AUTHORIZED,
                    "target_app": app.to_string(),
                    "dropped_actions": dropped,
                }),
            ));
        }
    }

    kept
}
