//! Feedback processor
//!
//! Append-only store of labelled outcomes: explicit labels (TP/FP/TN/FN),
//! implicit operator signals (ACK/IGN/ACT/ESC) and measured outcomes
//! (RES/REC/PRV). Per-detector aggregates over a trailing window feed the
//! tuner.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use sb_common::{FeedbackLabel, FeedbackRecord};

/// Per-detector aggregate over a window.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorStats {
    pub tp: u64,
    pub fp: u64,
    pub tn: u64,
    pub fn_: u64,
    pub ack: u64,
    pub ign: u64,
    pub act: u64,
    pub esc: u64,
    pub total: u64,
}

impl DetectorStats {
    fn ratio(num: u64, den: u64) -> f64 {
        if den == 0 {
            0.0
        } else {
            num as f64 / den as f64
        }
    }

    /// Labelled samples that count toward the tuner's minimum.
    pub fn labelled(&self) -> u64 {
        self.tp + self.fp + self.tn + self.fn_
    }

    pub fn precision(&self) -> f64 {
        Self::ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        Self::ratio(self.tp, self.tp + self.fn_)
    }

    pub fn accuracy(&self) -> f64 {
        Self::ratio(self.tp + self.tn, self.labelled())
    }

    pub fn false_positive_rate(&self) -> f64 {
        Self::ratio(self.fp, self.fp + self.tn)
    }

    pub fn false_negative_rate(&self) -> f64 {
        Self::ratio(self.fn_, self.fn_ + self.tp)
    }

    pub fn acknowledgement_rate(&self) -> f64 {
        Self::ratio(self.ack, self.ack + self.ign)
    }

    pub fn action_rate(&self) -> f64 {
        Self::ratio(self.act, self.act + self.esc + self.ign)
    }
}

/// Append-only feedback store.
pub struct FeedbackProcessor {
    records: RwLock<Vec<FeedbackRecord>>,
}

impl FeedbackProcessor {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Append a record. Records are never mutated or removed.
    pub fn record(&self, record: FeedbackRecord) {
        self.records.write().push(record);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Detector names seen so far.
    pub fn detectors(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .records
            .read()
            .iter()
            .map(|r| r.detector.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Aggregate one detector over the trailing window ending now.
    pub fn stats_for(&self, detector: &str, window: ChronoDuration) -> DetectorStats {
        self.stats_for_at(detector, window, Utc::now())
    }

    /// Aggregate with an explicit clock.
    pub fn stats_for_at(
        &self,
        detector: &str,
        window: ChronoDuration,
        now: DateTime<Utc>,
    ) -> DetectorStats {
        let cutoff = now - window;
        let mut stats = DetectorStats::default();

        for record in self.records.read().iter() {
            if record.detector != detector || record.timestamp < cutoff {
                continue;
            }
            stats.total += 1;
            match record.label {
                FeedbackLabel::TP => stats.tp += 1,
                FeedbackLabel::FP => stats.fp += 1,
                FeedbackLabel::TN => stats.tn += 1,
                FeedbackLabel::FN => stats.fn_ += 1,
                FeedbackLabel::ACK => stats.ack += 1,
                FeedbackLabel::IGN => stats.ign += 1,
                FeedbackLabel::ACT => stats.act += 1,
                FeedbackLabel::ESC => stats.esc += 1,
                // Measured outcomes are retained but not aggregated here.
                FeedbackLabel::RES | FeedbackLabel::REC | FeedbackLabel::PRV => {}
            }
        }

        stats
    }
}

impl Default for FeedbackProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(detector: &str, label: FeedbackLabel) -> FeedbackRecord {
        FeedbackRecord::new("f1", detector, label, "test")
    }

    #[test]
    fn rates_are_computed_from_counts() {
        let processor = FeedbackProcessor::new();
        for _ in 0..6 {
            processor.record(record("det-a", FeedbackLabel::TP));
        }
        for _ in 0..2 {
            processor.record(record("det-a", FeedbackLabel::FP));
        }
        processor.record(record("det-a", FeedbackLabel::TN));
        processor.record(record("det-a", FeedbackLabel::FN));

        let stats = processor.stats_for("det-a", ChronoDuration::days(7));
        assert_eq!(stats.labelled(), 10);
        assert!((stats.precision() - 0.75).abs() < 1e-9);
        assert!((stats.recall() - 6.0 / 7.0).abs() < 1e-9);
        assert!((stats.false_positive_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.accuracy() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn window_excludes_old_records() {
        let processor = FeedbackProcessor::new();
        let mut old = record("det-a", FeedbackLabel::TP);
        old.timestamp = Utc::now() - ChronoDuration::days(30);
        processor.record(old);
        processor.record(record("det-a", FeedbackLabel::TP));

        let stats = processor.stats_for("det-a", ChronoDuration::days(7));
        assert_eq!(stats.tp, 1);
    }

    #[test]
    fn detectors_are_isolated() {
        let processor = FeedbackProcessor::new();
        processor.record(record("det-a", FeedbackLabel::ACK));
        processor.record(record("det-b", FeedbackLabel::IGN));

        let stats = processor.stats_for("det-a", ChronoDuration::days(7));
        assert_eq!(stats.ack, 1);
        assert_eq!(stats.ign, 0);
        assert_eq!(processor.detectors(), vec!["det-a", "det-b"]);
    }

    #[test]
    fn implicit_signal_rates() {
        let processor = FeedbackProcessor::new();
        for _ in 0..3 {
            processor.record(record("det-a", FeedbackLabel::ACK));
        }
        processor.record(record("det-a", FeedbackLabel::IGN));
        processor.record(record("det-a", FeedbackLabel::ACT));

        let stats = processor.stats_for("det-a", ChronoDuration::days(7));
        assert!((stats.acknowledgement_rate() - 0.75).abs() < 1e-9);
        assert!((stats.action_rate() - 0.5).abs() < 1e-9);
    }
}
