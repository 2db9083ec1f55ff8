//! Action type identifiers shared across the engine

pub const RESERVE_SHADOW_INVENTORY: &str = "RESERVE_SHADOW_INVENTORY";
pub const PAUSE_FUTURE_WEB_SALES: &str = "PAUSE_FUTURE_WEB_SALES";
pub const BLOCK_VIRTUAL_STOCK_BATCH: &str = "BLOCK_VIRTUAL_STOCK_BATCH";
pub const SCHEDULE_QA_REVIEW: &str = "SCHEDULE_QA_REVIEW";
pub const REALLOCATE_STAFF: &str = "REALLOCATE_STAFF";
pub const NOTIFY_TEAM: &str = "NOTIFY_TEAM";
pub const CREATE_INCIDENT: &str = "CREATE_INCIDENT";
pub const REQUEST_APPROVAL: &str = "REQUEST_APPROVAL";
pub const ESCALATE_TO_CONTROL_TOWER: &str = "ESCALATE_TO_CONTROL_TOWER";
pub const LOG_ONLY: &str = "LOG_ONLY";

/// Actions that only advise a human and never mutate state. These are the
/// only ones an unauthorised actor may emit directly.
pub const ADVISORY_ACTIONS: &[&str] = &[LOG_ONLY, REQUEST_APPROVAL, NOTIFY_TEAM];

/// Escalation reason codes.
pub const REASON_HARD_RULE_VIOLATION: &str = "HARD_RULE_VIOLATION";
pub const REASON_NOT_AUTHORIZED: &str = "ACTION_NOT_AUTHORIZED_FOR_TARGET_APP";
