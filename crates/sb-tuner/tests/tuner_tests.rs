//! Threshold tuner tests
//!
//! Tests for:
//! - Proposal math (FPR trigger, recall trigger, caps, minimum)
//! - 24 h per-detector cooldown
//! - Weekly auto-apply cap
//! - Approval gate for large adjustments
//! - Immutable adjustment history

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use sb_common::{DetectorConfig, FeedbackLabel, FeedbackRecord};
use sb_tuner::{FeedbackProcessor, ThresholdTuner, TuneAction, TunerPolicy};

fn feedback_with(detector: &str, tp: u32, fp: u32, tn: u32, fn_: u32) -> FeedbackProcessor {
    let processor = FeedbackProcessor::new();
    let mut push = |label, count| {
        for _ in 0..count {
            processor.record(FeedbackRecord::new("f", detector, label, "test"));
        }
    };
    push(FeedbackLabel::TP, tp);
    push(FeedbackLabel::FP, fp);
    push(FeedbackLabel::TN, tn);
    push(FeedbackLabel::FN, fn_);
    processor
}

fn tuner() -> ThresholdTuner {
    let tuner = ThresholdTuner::new(TunerPolicy::default());
    tuner.register_detector(DetectorConfig::new("det-a", 0.50));
    tuner
}

#[test]
fn high_fpr_proposes_increase_with_cap() {
    let tuner = tuner();
    // FPR = 8 / (8 + 2) = 0.8 -> excess 0.5 -> 25 -> capped at 20.
    let feedback = feedback_with("det-a", 5, 8, 2, 0);
    let stats = feedback.stats_for("det-a", ChronoDuration::days(7));

    let proposal = tuner.propose("det-a", &stats);
    assert_eq!(proposal.action, TuneAction::IncreaseThreshold);
    assert!((proposal.percent_change - 20.0).abs() < 1e-9);
}

#[test]
fn low_recall_proposes_conservative_decrease() {
    let tuner = tuner();
    // recall = 4 / (4 + 8) = 0.333 -> miss 0.467 -> 11.67 -> capped at 10.
    let feedback = feedback_with("det-a", 4, 0, 2, 8);
    let stats = feedback.stats_for("det-a", ChronoDuration::days(7));

    let proposal = tuner.propose("det-a", &stats);
    assert_eq!(proposal.action, TuneAction::DecreaseThreshold);
    assert!((proposal.percent_change - 10.0).abs() < 1e-9);
}

#[test]
fn too_few_samples_means_no_change() {
    let tuner = tuner();
    let feedback = feedback_with("det-a", 1, 1, 1, 1);
    let stats = feedback.stats_for("det-a", ChronoDuration::days(7));

    let proposal = tuner.propose("det-a", &stats);
    assert_eq!(proposal.action, TuneAction::NoChange);
}

#[test]
fn healthy_metrics_mean_no_change() {
    let tuner = tuner();
    let feedback = feedback_with("det-a", 9, 1, 9, 1);
    let stats = feedback.stats_for("det-a", ChronoDuration::days(7));

    assert_eq!(tuner.propose("det-a", &stats).action, TuneAction::NoChange);
}

#[test]
fn moderate_increase_is_applied_and_recorded() {
    let tuner = tuner();
    // FPR = 5 / (5+5) = 0.5 -> excess 0.2 -> 10 percent increase.
    let feedback = feedback_with("det-a", 5, 5, 5, 0);

    let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
    let applied = tuner.run_cycle_at(&feedback, now);
    assert_eq!(applied.len(), 1);

    let threshold = tuner.threshold("det-a").unwrap();
    assert!((threshold - 0.55).abs() < 1e-9);

    let history = tuner.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, "applied");
    assert!((history[0].old_threshold - 0.50).abs() < 1e-9);
    assert!((history[0].new_threshold - 0.55).abs() < 1e-9);
    assert_eq!(history[0].approved_by.as_deref(), Some("auto-tuner"));
}

#[test]
fn cooldown_blocks_back_to_back_adjustments() {
    let tuner = tuner();
    let feedback = feedback_with("det-a", 5, 5, 5, 0);

    let first = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
    assert_eq!(tuner.run_cycle_at(&feedback, first).len(), 1);

    // Six hours later: inside the 24 h cooldown.
    let soon = first + ChronoDuration::hours(6);
    assert_eq!(tuner.run_cycle_at(&feedback, soon).len(), 0);

    // Next day: allowed again.
    let next_day = first + ChronoDuration::hours(25);
    assert_eq!(tuner.run_cycle_at(&feedback, next_day).len(), 1);
}

#[test]
fn weekly_auto_cap_limits_to_three() {
    let tuner = ThresholdTuner::new(TunerPolicy::default());
    for name in ["d1", "d2", "d3", "d4", "d5"] {
        tuner.register_detector(DetectorConfig::new(name, 0.50));
    }

    let processor = FeedbackProcessor::new();
    for name in ["d1", "d2", "d3", "d4", "d5"] {
        for _ in 0..5 {
            processor.record(FeedbackRecord::new("f", name, FeedbackLabel::TP, "t"));
            processor.record(FeedbackRecord::new("f", name, FeedbackLabel::FP, "t"));
        }
        for _ in 0..5 {
            processor.record(FeedbackRecord::new("f", name, FeedbackLabel::TN, "t"));
        }
    }

    // All five detectors have FPR 0.5, but only three auto-apply this week.
    let now = Utc.with_ymd_and_hms(2026, 3, 11, 12, 0, 0).unwrap();
    let applied = tuner.run_cycle_at(&processor, now);
    assert_eq!(applied.len(), 3);
    assert_eq!(tuner.history().len(), 3);

    // The counter resets the following week and the cap applies afresh.
    let next_week = now + ChronoDuration::days(8);
    let applied = tuner.run_cycle_at(&processor, next_week);
    assert_eq!(applied.len(), 3);
    assert_eq!(tuner.history().len(), 6);
}

#[test]
fn large_adjustment_waits_for_approval() {
    let tuner = tuner();
    // FPR = 9 / (9+1) = 0.9 -> excess 0.6 -> capped at 20 percent: above
    // the 15 percent approval bound.
    let feedback = feedback_with("det-a", 5, 9, 1, 0);

    let now = Utc.with_ymd_and_hms(2026, 3, 12, 12, 0, 0).unwrap();
    tuner.run_cycle_at(&feedback, now);

    // Threshold untouched while pending.
    assert!((tuner.threshold("det-a").unwrap() - 0.50).abs() < 1e-9);
    let pending = tuner.pending();
    assert_eq!(pending.len(), 1);
    assert!(tuner.history().is_empty());

    assert!(tuner.approve(&pending[0].id, "ops-lead"));
    assert!((tuner.threshold("det-a").unwrap() - 0.60).abs() < 1e-9);

    let history = tuner.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, "approved");
    assert_eq!(history[0].approved_by.as_deref(), Some("ops-lead"));
    assert!(tuner.pending().is_empty());
}

#[test]
fn rejection_keeps_threshold_and_records_it() {
    let tuner = tuner();
    let feedback = feedback_with("det-a", 5, 9, 1, 0);

    let now = Utc.with_ymd_and_hms(2026, 3, 12, 12, 0, 0).unwrap();
    tuner.run_cycle_at(&feedback, now);
    let pending = tuner.pending();

    assert!(tuner.reject(&pending[0].id, "ops-lead"));
    assert!((tuner.threshold("det-a").unwrap() - 0.50).abs() < 1e-9);

    let history = tuner.history();
    assert_eq!(history[0].action, "rejected");
    assert!((history[0].old_threshold - history[0].new_threshold).abs() < 1e-9);
}

#[test]
fn unknown_pending_id_is_refused() {
    let tuner = tuner();
    assert!(!tuner.approve("missing", "x"));
    assert!(!tuner.reject("missing", "x"));
}
