//! Rule engine - deterministic beacon → instruction builder
//!
//! Decisions are LLM-free: severity inference, priority, target-app
//! routing, scripted templates, authority enforcement, hard business
//! rules, and per-target action sanitisation are all tables and plain
//! control flow. The engine never returns an error for a malformed input
//! shape; unknown material degrades to LOG_ONLY or an escalation.

mod actions;
mod engine;
mod hard_rules;
mod routing;
mod sanitize;
mod severity;
mod templates;

pub use actions::*;
pub use engine::RuleEngine;
pub use hard_rules::{HardRuleConfig, MonthDayRange, RuleCheck};
pub use routing::select_target_app;
pub use sanitize::{allowed_actions, sanitize_actions};
pub use severity::{infer_severity, priority_for, task_name_for};
