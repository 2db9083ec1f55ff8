//! Threshold tuner
//!
//! Reads trailing detector aggregates and adjusts thresholds:
//! - FPR above the trigger raises the threshold, capped at 20 %
//! - recall below the trigger lowers it, more conservatively, capped at 10 %
//! - proposals under the minimum are discarded
//! - 24 h cooldown per detector, at most 3 auto-applies per calendar week
//! - adjustments above the approval bound wait in the pending set
//!
//! Every applied, rejected or approved adjustment lands in an immutable
//! history. All mutation happens under one lock so concurrent cycles can
//! never race a detector's threshold.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use sb_common::DetectorConfig;

use crate::feedback::{DetectorStats, FeedbackProcessor};

/// Proposed direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TuneAction {
    IncreaseThreshold,
    DecreaseThreshold,
    NoChange,
}

/// A tuning proposal for one detector.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TuneProposal {
    pub detector: String,
    pub action: TuneAction,
    pub percent_change: f64,
    pub reason: String,
}

/// Immutable history row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentRecord {
    pub id: String,
    pub detector: String,
    pub timestamp: DateTime<Utc>,
    /// applied | approved | rejected
    pub action: String,
    pub direction: TuneAction,
    pub percent_change: f64,
    pub reason: String,
    pub old_threshold: f64,
    pub new_threshold: f64,
    pub approved_by: Option<String>,
}

/// An adjustment waiting for explicit approval.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    pub id: String,
    pub detector: String,
    pub proposal: TuneProposal,
    pub proposed_at: DateTime<Utc>,
}

/// Tuning policy.
#[derive(Debug, Clone)]
pub struct TunerPolicy {
    pub min_samples: u64,
    pub window: ChronoDuration,
    pub fpr_trigger: f64,
    pub recall_miss_trigger: f64,
    pub min_adjustment_percent: f64,
    pub approval_required_above_percent: f64,
    pub cooldown: ChronoDuration,
    pub max_auto_per_week: u32,
}

impl Default for TunerPolicy {
    fn default() -> Self {
        Self {
            min_samples: 10,
            window: ChronoDuration::days(7),
            fpr_trigger: 0.30,
            recall_miss_trigger: 0.20,
            min_adjustment_percent: 5.0,
            approval_required_above_percent: 15.0,
            cooldown: ChronoDuration::hours(24),
            max_auto_per_week: 3,
        }
    }
}

struct TunerState {
    detectors: HashMap<String, DetectorConfig>,
    history: Vec<AdjustmentRecord>,
    pending: HashMap<String, PendingApproval>,
    /// (iso year, iso week) the auto counter belongs to
    week_key: (i32, u32),
    auto_this_week: u32,
}

/// Serialised threshold tuner.
pub struct ThresholdTuner {
    policy: TunerPolicy,
    state: Mutex<TunerState>,
}

impl ThresholdTuner {
    pub fn new(policy: TunerPolicy) -> Self {
        let now = Utc::now();
        Self {
            policy,
            state: Mutex::new(TunerState {
                detectors: HashMap::new(),
                history: Vec::new(),
                pending: HashMap::new(),
                week_key: week_key(now),
                auto_this_week: 0,
            }),
        }
    }

    pub fn register_detector(&self, config: DetectorConfig) {
        self.state
            .lock()
            .detectors
            .insert(config.name.clone(), config);
    }

    pub fn threshold(&self, detector: &str) -> Option<f64> {
        self.state.lock().detectors.get(detector).map(|d| d.threshold)
    }

    pub fn history(&self) -> Vec<AdjustmentRecord> {
        self.state.lock().history.clone()
    }

    pub fn pending(&self) -> Vec<PendingApproval> {
        self.state.lock().pending.values().cloned().collect()
    }

    /// Pure proposal logic over one detector's aggregates.
    pub fn propose(&self, detector: &str, stats: &DetectorStats) -> TuneProposal {
        if stats.labelled() < self.policy.min_samples {
            return TuneProposal {
                detector: detector.to_string(),
                action: TuneAction::NoChange,
                percent_change: 0.0,
                reason: format!(
                    "insufficient samples: {} < {}",
                    stats.labelled(),
                    self.policy.min_samples
                ),
            };
        }

        let fpr = stats.false_positive_rate();
        if fpr > self.policy.fpr_trigger {
            let excess = fpr - self.policy.fpr_trigger;
            let percent = (50.0 * excess).min(20.0);
            return TuneProposal {
                detector: detector.to_string(),
                action: TuneAction::IncreaseThreshold,
                percent_change: percent,
                reason: format!("FPR {:.2} above trigger {:.2}", fpr, self.policy.fpr_trigger),
            };
        }

        let recall = stats.recall();
        let recall_floor = 1.0 - self.policy.recall_miss_trigger;
        if recall < recall_floor {
            let miss = recall_floor - recall;
            let percent = (25.0 * miss).min(10.0);
            return TuneProposal {
                detector: detector.to_string(),
                action: TuneAction::DecreaseThreshold,
                percent_change: percent,
                reason: format!("recall {:.2} below floor {:.2}", recall, recall_floor),
            };
        }

        TuneProposal {
            detector: detector.to_string(),
            action: TuneAction::NoChange,
            percent_change: 0.0,
            reason: "metrics inside triggers".to_string(),
        }
    }

    /// Run one tuning cycle over every known detector.
    pub fn run_cycle(&self, feedback: &FeedbackProcessor) -> Vec<TuneProposal> {
        self.run_cycle_at(feedback, Utc::now())
    }

    /// Run a cycle with an explicit clock.
    pub fn run_cycle_at(
        &self,
        feedback: &FeedbackProcessor,
        now: DateTime<Utc>,
    ) -> Vec<TuneProposal> {
        let detectors: Vec<String> = {
            let state = self.state.lock();
            state.detectors.keys().cloned().collect()
        };

        let mut applied = Vec::new();
        for detector in detectors {
            let stats = feedback.stats_for_at(&detector, self.policy.window, now);
            let proposal = self.propose(&detector, &stats);
            if proposal.action == TuneAction::NoChange {
                continue;
            }
            if self.consider(proposal.clone(), now) {
                applied.push(proposal);
            }
        }
        applied
    }

    /// Gate and possibly apply one proposal. Returns whether it was applied
    /// or queued for approval.
    fn consider(&self, proposal: TuneProposal, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();

        // Discard small adjustments outright.
        if proposal.percent_change < self.policy.min_adjustment_percent {
            debug!(
                detector = %proposal.detector,
                percent = proposal.percent_change,
                "Proposal below minimum adjustment, discarded"
            );
            return false;
        }

        // Per-detector cooldown.
        if let Some(config) = state.detectors.get(&proposal.detector) {
            if let Some(last) = config.last_adjusted_at {
                if now - last < self.policy.cooldown {
                    debug!(detector = %proposal.detector, "Detector inside cooldown, skipped");
                    return false;
                }
            }
        } else {
            return false;
        }

        // One pending approval per detector at a time.
        if state.pending.values().any(|p| p.detector == proposal.detector) {
            return false;
        }

        // Large adjustments wait for a human.
        if proposal.percent_change > self.policy.approval_required_above_percent {
            let pending = PendingApproval {
                id: Uuid::new_v4().to_string(),
                detector: proposal.detector.clone(),
                proposal,
                proposed_at: now,
            };
            info!(
                detector = %pending.detector,
                pending_id = %pending.id,
                "Adjustment above approval bound, queued as pending"
            );
            state.pending.insert(pending.id.clone(), pending);
            return true;
        }

        // Weekly auto-apply cap.
        let key = week_key(now);
        if state.week_key != key {
            state.week_key = key;
            state.auto_this_week = 0;
        }
        if state.auto_this_week >= self.policy.max_auto_per_week {
            debug!(detector = %proposal.detector, "Weekly auto-apply cap reached, skipped");
            return false;
        }

        state.auto_this_week += 1;
        Self::apply_locked(&mut state, proposal, now, "applied", Some("auto-tuner"));
        true
    }

    /// Approve a pending adjustment.
    pub fn approve(&self, pending_id: &str, approver: &str) -> bool {
        let now = Utc::now();
        let mut state = self.state.lock();
        let pending = match state.pending.remove(pending_id) {
            Some(p) => p,
            None => return false,
        };
        Self::apply_locked(&mut state, pending.proposal, now, "approved", Some(approver));
        true
    }

    /// Reject a pending adjustment. The threshold is untouched.
    pub fn reject(&self, pending_id: &str, approver: &str) -> bool {
        let now = Utc::now();
        let mut state = self.state.lock();
        let pending = match state.pending.remove(pending_id) {
            Some(p) => p,
            None => return false,
        };

        let old = state
            .detectors
            .get(&pending.detector)
            .map(|d| d.threshold)
            .unwrap_or(0.0);
        state.history.push(AdjustmentRecord {
            id: Uuid::new_v4().to_string(),
            detector: pending.detector,
            timestamp: now,
            action: "rejected".to_string(),
            direction: pending.proposal.action,
            percent_change: pending.proposal.percent_change,
            reason: pending.proposal.reason,
            old_threshold: old,
            new_threshold: old,
            approved_by: Some(approver.to_string()),
        });
        true
    }

    fn apply_locked(
        state: &mut TunerState,
        proposal: TuneProposal,
        now: DateTime<Utc>,
        action: &str,
        approver: Option<&str>,
    ) {
        let config = match state.detectors.get_mut(&proposal.detector) {
            Some(c) => c,
            None => return,
        };

        let old = config.threshold;
        let factor = match proposal.action {
            TuneAction::IncreaseThreshold => 1.0 + proposal.percent_change / 100.0,
            TuneAction::DecreaseThreshold => 1.0 - proposal.percent_change / 100.0,
            TuneAction::NoChange => 1.0,
        };
        config.threshold = (old * factor).clamp(0.0, 1.0);
        config.last_adjusted_at = Some(now);
        config.last_adjusted_by = approver.map(String::from);

        info!(
            detector = %proposal.detector,
            old_threshold = old,
            new_threshold = config.threshold,
            percent = proposal.percent_change,
            direction = ?proposal.action,
            "Threshold adjusted"
        );

        let new_threshold = config.threshold;
        state.history.push(AdjustmentRecord {
            id: Uuid::new_v4().to_string(),
            detector: proposal.detector,
            timestamp: now,
            action: action.to_string(),
            direction: proposal.action,
            percent_change: proposal.percent_change,
            reason: proposal.reason,
            old_threshold: old,
            new_threshold,
            approved_by: approver.map(String::from),
        });
    }
}

fn week_key(now: DateTime<Utc>) -> (i32, u32) {
    let week = now.iso_week();
    (week.year(), week.week())
}
