//! Hard business rules
//!
//! Non-negotiable constraints enforced before an instruction leaves the
//! engine. A rule firing is not an error: it produces a deterministic
//! escalation.
//!
//! - Shelf-life × peak-shaving: SKUs with a 1-day shelf life cannot be
//!   targets of RESERVE_SHADOW_INVENTORY during a peak-shaving range.
//! - Pull-only windows: RESERVE_SHADOW_INVENTORY and
//!   PAUSE_FUTURE_WEB_SALES are blocked outright during a pull-only range.
//!
//! Ranges are month-day pairs, inclusive on both ends. A range whose start
//! is after its end wraps across the year boundary.

use chrono::{DateTime, Datelike, Utc};
use sb_common::{Action, HardRuleViolation};

use crate::actions::{PAUSE_FUTURE_WEB_SALES, RESERVE_SHADOW_INVENTORY};

/// SKU name fragments with a 1-day shelf life, matched by normalised
/// substring.
const ONE_DAY_LIFE_SKUS: &[&str] = &["rosca", "concha", "bolillo", "lotus", "pan dulce"];

/// A month-day range, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthDayRange {
    start: (u32, u32),
    end: (u32, u32),
}

impl MonthDayRange {
    /// Parse from "MM-DD" bounds. Returns `None` on malformed input.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Some(Self {
            start: parse_month_day(start)?,
            end: parse_month_day(end)?,
        })
    }

    /// Whether the month/day of `date` falls inside the range.
    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        let md = (date.month(), date.day());
        if self.start <= self.end {
            self.start <= md && md <= self.end
        } else {
            // Wrapping range, e.g. 12-28 .. 01-04.
            md >= self.start || md <= self.end
        }
    }
}

fn parse_month_day(raw: &str) -> Option<(u32, u32)> {
    let (month, day) = raw.split_once('-')?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    if (1..=12).contains(&month) && (1..=31).contains(&day) {
        Some((month, day))
    } else {
        None
    }
}

/// Temporal configuration for the hard rules.
#[derive(Debug, Clone, Default)]
pub struct HardRuleConfig {
    pub peak_shaving: Vec<MonthDayRange>,
    pub pull_only: Vec<MonthDayRange>,
}

impl HardRuleConfig {
    /// Build from "MM-DD" string pairs, skipping malformed entries.
    pub fn from_pairs(
        peak_shaving: &[(String, String)],
        pull_only: &[(String, String)],
    ) -> Self {
        let parse = |pairs: &[(String, String)]| {
            pairs
                .iter()
                .filter_map(|(s, e)| MonthDayRange::parse(s, e))
                .collect()
        };
        Self {
            peak_shaving: parse(peak_shaving),
            pull_only: parse(pull_only),
        }
    }
}

/// Result of validating an action list against the hard rules.
#[derive(Debug, Clone)]
pub struct RuleCheck {
    pub valid: bool,
    pub violations: Vec<HardRuleViolation>,
}

fn normalize_sku(sku: &str) -> String {
    sku.to_lowercase().replace(['_', '-'], " ")
}

fn one_day_life(sku: &str) -> bool {
    let normalized = normalize_sku(sku);
    ONE_DAY_LIFE_SKUS.iter().any(|s| normalized.contains(s))
}

/// Validate proposed actions against the hard rules at the beacon's
/// timestamp.
pub fn validate_actions(
    actions: &[Action],
    timestamp: DateTime<Utc>,
    config: &HardRuleConfig,
) -> RuleCheck {
    let mut violations = Vec::new();

    let in_peak_shaving = config.peak_shaving.iter().any(|r| r.contains(timestamp));
    let in_pull_only = config.pull_only.iter().any(|r| r.contains(timestamp));

    for action in actions {
        if in_pull_only
            && (action.action_type == RESERVE_SHADOW_INVENTORY
                || action.action_type == PAUSE_FUTURE_WEB_SALES)
        {
            violations.push(HardRuleViolation {
                rule: "PULL_ONLY_WINDOW".to_string(),
                blocked_action: action.action_type.clone(),
                reason: format!(
                    "{} bloqueada durante ventana pull-only",
                    action.action_type
                ),
                sku: action
                    .params
                    .get("sku")
                    .and_then(|s| s.as_str())
                    .map(String::from),
                life_days: None,
            });
            continue;
        }

        if in_peak_shaving && action.action_type == RESERVE_SHADOW_INVENTORY {
            if let Some(sku) = action.params.get("sku").and_then(|s| s.as_str()) {
                if one_day_life(sku) {
                    violations.push(HardRuleViolation {
                        rule: "NO_PEAK_SHAVING_1DAY".to_string(),
                        blocked_action: action.action_type.clone(),
                        reason: format!(
                            "SKU {} con vida de 1 dia no puede reservarse en peak-shaving",
                            sku
                        ),
                        sku: Some(sku.to_string()),
                        life_days: Some(1),
                    });
                }
            }
        }
    }

    RuleCheck {
        valid: violations.is_empty(),
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> HardRuleConfig {
        HardRuleConfig {
            peak_shaving: vec![MonthDayRange::parse("01-02", "01-05").unwrap()],
            pull_only: vec![MonthDayRange::parse("01-12", "01-18").unwrap()],
        }
    }

    fn reserve(sku: &str) -> Action {
        Action::new(
            RESERVE_SHADOW_INVENTORY,
            serde_json::json!({"sku": sku, "qty": 20}),
        )
    }

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, month, day, 10, 0, 0).unwrap()
    }

    #[test]
    fn one_day_sku_blocked_in_peak_shaving() {
        let check = validate_actions(&[reserve("rosca_lotus_500g")], at(1, 3), &config());
        assert!(!check.valid);
        assert_eq!(check.violations.len(), 1);

        let violation = &check.violations[0];
        assert_eq!(violation.rule, "NO_PEAK_SHAVING_1DAY");
        assert_eq!(violation.sku.as_deref(), Some("rosca_lotus_500g"));
        assert_eq!(violation.life_days, Some(1));
    }

    #[test]
    fn long_life_sku_passes_peak_shaving() {
        let check = validate_actions(&[reserve("galleta_avena_300g")], at(1, 3), &config());
        assert!(check.valid);
    }

    #[test]
    fn outside_ranges_everything_passes() {
        let check = validate_actions(&[reserve("rosca_lotus_500g")], at(3, 10), &config());
        assert!(check.valid);
    }

    #[test]
    fn pull_only_blocks_both_action_types() {
        let actions = vec![
            reserve("galleta_avena_300g"),
            Action::bare(PAUSE_FUTURE_WEB_SALES),
        ];
        let check = validate_actions(&actions, at(1, 15), &config());
        assert!(!check.valid);
        assert_eq!(check.violations.len(), 2);
        assert!(check
            .violations
            .iter()
            .all(|v| v.rule == "PULL_ONLY_WINDOW"));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let range = MonthDayRange::parse("01-02", "01-05").unwrap();
        assert!(range.contains(at(1, 2)));
        assert!(range.contains(at(1, 5)));
        assert!(!range.contains(at(1, 6)));
    }

    #[test]
    fn wrapping_range_spans_the_year_boundary() {
        let range = MonthDayRange::parse("12-28", "01-04").unwrap();
        assert!(range.contains(at(12, 30)));
        assert!(range.contains(at(1, 2)));
        assert!(!range.contains(at(6, 15)));
    }

    #[test]
    fn malformed_bounds_are_rejected() {
        assert!(MonthDayRange::parse("13-01", "01-05").is_none());
        assert!(MonthDayRange::parse("0102", "01-05").is_none());
    }
}
