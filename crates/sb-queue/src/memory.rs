//! In-process job queue for development and tests

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use sb_common::Job;

use crate::{JobQueue, Result};

/// FIFO queue held in process memory. Delayed jobs sit in a scheduled list
/// and are promoted on dequeue once their ready time passes.
pub struct MemoryJobQueue {
    identifier: String,
    ready: Mutex<VecDeque<Job>>,
    scheduled: Mutex<Vec<(i64, Job)>>,
}

impl MemoryJobQueue {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ready: Mutex::new(VecDeque::new()),
            scheduled: Mutex::new(Vec::new()),
        }
    }

    fn promote_due(&self) {
        let now = Utc::now().timestamp_millis();
        let mut scheduled = self.scheduled.lock();
        if scheduled.is_empty() {
            return;
        }

        let mut due: Vec<(i64, Job)> = Vec::new();
        scheduled.retain_mut(|entry| {
            if entry.0 <= now {
                due.push((entry.0, entry.1.clone()));
                false
            } else {
                true
            }
        });
        drop(scheduled);

        if !due.is_empty() {
            due.sort_by_key(|(ready_at, _)| *ready_at);
            let mut ready = self.ready.lock();
            for (_, job) in due {
                ready.push_back(job);
            }
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn enqueue(&self, job: Job) -> Result<String> {
        let id = job.id.clone();
        self.ready.lock().push_back(job);
        Ok(id)
    }

    async fn enqueue_delayed(&self, job: Job, delay: Duration) -> Result<String> {
        let id = job.id.clone();
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        self.scheduled.lock().push((ready_at, job));
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<Job>> {
        self.promote_due();
        Ok(self.ready.lock().pop_front())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.ready.lock().len() + self.scheduled.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = MemoryJobQueue::new("test");
        for i in 0..3 {
            queue
                .enqueue(Job::new("C1", "noop", serde_json::json!({ "n": i })))
                .await
                .unwrap();
        }

        for i in 0..3 {
            let job = queue.dequeue().await.unwrap().unwrap();
            assert_eq!(job.payload["n"], i);
        }
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delayed_job_is_invisible_until_ready() {
        let queue = MemoryJobQueue::new("test");
        queue
            .enqueue_delayed(
                Job::new("C1", "noop", serde_json::json!({})),
                Duration::from_millis(60),
            )
            .await
            .unwrap();

        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.len().await.unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(queue.dequeue().await.unwrap().is_some());
    }
}
