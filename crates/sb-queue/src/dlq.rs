//! Dead-Letter Queue manager
//!
//! Terminal storage for jobs that exhausted their retry budget. Keeps rich
//! failure records, per-reason aggregates, and operator tooling: paginated
//! listing, retry-one with a fresh attempt budget, discard, retry-all,
//! obliterate. A background check raises an alert when the waiting count
//! crosses the threshold; the alert service's suppression window provides
//! the anti-flap behaviour.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use sb_common::{AlertCategory, AlertService, AlertSeverity, DlqRecord, Job, JobState};
use tracing::{info, warn};

use crate::{JobQueue, QueueError, Result};

/// DLQ manager configuration.
#[derive(Debug, Clone)]
pub struct DlqManagerConfig {
    /// Waiting count that triggers an alert
    pub alert_threshold: usize,
    /// Background check cadence
    pub check_interval: Duration,
}

impl Default for DlqManagerConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 10,
            check_interval: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// In-memory dead-letter store with alerting.
pub struct DlqManager {
    records: RwLock<Vec<DlqRecord>>,
    by_reason: DashMap<String, u64>,
    alerts: Arc<AlertService>,
    config: DlqManagerConfig,
}

impl DlqManager {
    pub fn new(config: DlqManagerConfig, alerts: Arc<AlertService>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            by_reason: DashMap::new(),
            alerts,
            config,
        }
    }

    /// Accept a failed job record. Best-effort by contract: this never
    /// fails, so a DLQ problem cannot cascade into the worker.
    pub fn push(&self, record: DlqRecord) {
        *self
            .by_reason
            .entry(record.failure_reason.clone())
            .or_insert(0) += 1;
        self.records.write().push(record);
    }

    /// Number of records waiting.
    pub fn waiting_count(&self) -> usize {
        self.records.read().len()
    }

    /// Paginated listing, newest first. Returns the page and the total count.
    pub fn list(&self, page: usize, page_size: usize) -> (Vec<DlqRecord>, usize) {
        let records = self.records.read();
        let total = records.len();
        let page_items = records
            .iter()
            .rev()
            .skip(page * page_size)
            .take(page_size)
            .cloned()
            .collect();
        (page_items, total)
    }

    /// Per-reason aggregate counts, including already-resolved records.
    pub fn reason_counts(&self) -> HashMap<String, u64> {
        self.by_reason
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Requeue one record onto the main queue with a fresh attempt budget.
    /// The delay grows exponentially with the attempts the job already made.
    pub async fn retry_one(&self, job_id: &str, queue: &Arc<dyn JobQueue>) -> Result<()> {
        let record = {
            let mut records = self.records.write();
            let idx = records
                .iter()
                .position(|r| r.job_id == job_id)
                .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
            records.remove(idx)
        };

        let delay = Duration::from_secs(2u64.pow(record.attempts_made.min(6)));
        let job = Job {
            id: record.job_id.clone(),
            conversation_id: record.conversation_id.clone(),
            handler: record.handler.clone(),
            payload: record.payload.clone(),
            attempts: 0,
            state: JobState::Pending,
            enqueued_at: chrono::Utc::now(),
            last_attempt_at: None,
            last_error: Some(record.failure_reason.clone()),
        };

        info!(
            job_id = %job.id,
            delay_secs = delay.as_secs(),
            "Requeueing dead-lettered job"
        );
        queue.enqueue_delayed(job, delay).await?;
        Ok(())
    }

    /// Drop one record.
    pub fn discard_one(&self, job_id: &str) -> bool {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.job_id != job_id);
        records.len() != before
    }

    /// Requeue every waiting record. Returns how many were requeued.
    pub async fn retry_all(&self, queue: &Arc<dyn JobQueue>) -> usize {
        let ids: Vec<String> = self
            .records
            .read()
            .iter()
            .map(|r| r.job_id.clone())
            .collect();

        let mut requeued = 0;
        for id in ids {
            match self.retry_one(&id, queue).await {
                Ok(()) => requeued += 1,
                Err(e) => warn!(job_id = %id, error = %e, "Retry-all requeue failed"),
            }
        }
        requeued
    }

    /// Drop everything, aggregates included.
    pub fn obliterate(&self) -> usize {
        let mut records = self.records.write();
        let removed = records.len();
        records.clear();
        self.by_reason.clear();
        removed
    }

    /// Check the waiting count against the alert threshold once.
    pub fn check_threshold(&self) {
        let waiting = self.waiting_count();
        if waiting >= self.config.alert_threshold {
            self.alerts.raise(
                "dlq-threshold",
                AlertCategory::DeadLetter,
                AlertSeverity::Error,
                format!(
                    "DLQ waiting count {} at or above threshold {}",
                    waiting, self.config.alert_threshold
                ),
                "dlq-manager",
            );
        }
    }

    /// Start the periodic threshold check.
    pub fn start_alert_loop(self: &Arc<Self>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.check_interval);
            loop {
                interval.tick().await;
                manager.check_threshold();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryJobQueue;
    use chrono::Utc;

    fn record(job_id: &str, reason: &str) -> DlqRecord {
        DlqRecord {
            job_id: job_id.to_string(),
            handler: "faq_flow".to_string(),
            conversation_id: "C1".to_string(),
            payload: serde_json::json!({"text": "hola"}),
            queue: "main".to_string(),
            failure_reason: reason.to_string(),
            failure_stack: None,
            attempts_made: 3,
            failed_at: Utc::now(),
        }
    }

    fn manager() -> DlqManager {
        DlqManager::new(DlqManagerConfig::default(), Arc::new(AlertService::default()))
    }

    #[tokio::test]
    async fn listing_is_paginated_newest_first() {
        let dlq = manager();
        for i in 0..5 {
            dlq.push(record(&format!("j{}", i), "boom"));
        }

        let (page, total) = dlq.list(0, 2);
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].job_id, "j4");

        let (page, _) = dlq.list(2, 2);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].job_id, "j0");
    }

    #[tokio::test]
    async fn retry_one_requeues_with_fresh_budget() {
        let dlq = manager();
        dlq.push(record("j1", "boom"));

        let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new("main"));
        dlq.retry_one("j1", &queue).await.unwrap();

        assert_eq!(dlq.waiting_count(), 0);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retry_unknown_job_is_not_found() {
        let dlq = manager();
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new("main"));
        assert!(matches!(
            dlq.retry_one("missing", &queue).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn discard_and_obliterate() {
        let dlq = manager();
        dlq.push(record("j1", "boom"));
        dlq.push(record("j2", "bust"));

        assert!(dlq.discard_one("j1"));
        assert!(!dlq.discard_one("j1"));
        assert_eq!(dlq.waiting_count(), 1);

        assert_eq!(dlq.obliterate(), 1);
        assert_eq!(dlq.waiting_count(), 0);
    }

    #[tokio::test]
    async fn reason_aggregates_accumulate() {
        let dlq = manager();
        dlq.push(record("j1", "timeout"));
        dlq.push(record("j2", "timeout"));
        dlq.push(record("j3", "boom"));

        let counts = dlq.reason_counts();
        assert_eq!(counts["timeout"], 2);
        assert_eq!(counts["boom"], 1);
    }

    #[tokio::test]
    async fn threshold_alert_fires_once_inside_suppression_window() {
        let alerts = Arc::new(AlertService::default());
        let dlq = DlqManager::new(
            DlqManagerConfig {
                alert_threshold: 2,
                check_interval: Duration::from_secs(300),
            },
            alerts.clone(),
        );

        dlq.push(record("j1", "boom"));
        dlq.check_threshold();
        assert_eq!(alerts.count(), 0, "below threshold, no alert");

        dlq.push(record("j2", "boom"));
        dlq.check_threshold();
        dlq.check_threshold();
        assert_eq!(alerts.count(), 1, "anti-flap keeps it to one alert");
    }
}
