//! Worker pool - bounded concurrency, retries, typing keep-alive
//!
//! Dequeues jobs under a semaphore cap. Each job gets a typing heartbeat
//! for its conversation, a wall-clock timeout raced against the handler,
//! and a linear retry budget. Exhausted jobs move to the DLQ and the user
//! receives the apology message.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Instrument};

use sb_chat::{ChatClient, TypingDriver};
use sb_common::{logging, DlqRecord, Job, JobState};

use crate::{DlqManager, HandlerRegistry, JobError, JobQueue};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Jobs in flight at once
    pub max_concurrent: usize,
    /// Retry attempts after the first failure
    pub max_retries: u32,
    /// Base linear backoff between attempts
    pub retry_delay_ms: u64,
    /// Per-job wall-clock budget
    pub processing_timeout_ms: u64,
    /// Queue poll cadence when idle
    pub poll_interval_ms: u64,
    /// How long completed records stay queryable
    pub completed_retention_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_retries: 2,
            retry_delay_ms: 1000,
            processing_timeout_ms: 30_000,
            poll_interval_ms: 100,
            completed_retention_ms: 300_000, // 5 minutes
        }
    }
}

/// Retained record of a completed job, for status queries.
#[derive(Debug, Clone)]
pub struct CompletedRecord {
    pub job_id: String,
    pub conversation_id: String,
    pub handler: String,
    pub result: serde_json::Value,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub in_flight: u32,
    pub completed_retained: usize,
    pub total_success: u64,
    pub total_retries: u64,
    pub total_dead_lettered: u64,
}

/// Bounded worker pool over a job queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn JobQueue>,
    registry: Arc<HandlerRegistry>,
    chat: Arc<dyn ChatClient>,
    typing: TypingDriver,
    dlq: Arc<DlqManager>,

    semaphore: Arc<tokio::sync::Semaphore>,
    in_flight: Arc<AtomicU32>,
    total_success: Arc<AtomicU64>,
    total_retries: Arc<AtomicU64>,
    total_dead_lettered: Arc<AtomicU64>,
    completed: Arc<DashMap<String, CompletedRecord>>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<dyn JobQueue>,
        registry: Arc<HandlerRegistry>,
        chat: Arc<dyn ChatClient>,
        typing: TypingDriver,
        dlq: Arc<DlqManager>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            semaphore: Arc::new(tokio::sync::Semaphore::new(config.max_concurrent)),
            config,
            queue,
            registry,
            chat,
            typing,
            dlq,
            in_flight: Arc::new(AtomicU32::new(0)),
            total_success: Arc::new(AtomicU64::new(0)),
            total_retries: Arc::new(AtomicU64::new(0)),
            total_dead_lettered: Arc::new(AtomicU64::new(0)),
            completed: Arc::new(DashMap::new()),
            running: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Enqueue a job. Returns immediately with the job id so the webhook
    /// handler can acknowledge the platform well under its timeout.
    pub async fn enqueue(&self, job: Job) -> crate::Result<String> {
        debug!(
            job_id = %job.id,
            conversation_id = %job.conversation_id,
            handler = %job.handler,
            "Enqueuing job"
        );
        self.queue.enqueue(job).await
    }

    /// Start the dispatch loop and the completed-record sweeper.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return; // Already running
        }

        info!(
            max_concurrent = self.config.max_concurrent,
            max_retries = self.config.max_retries,
            processing_timeout_ms = self.config.processing_timeout_ms,
            "Starting worker pool"
        );

        let pool = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Worker pool dispatch loop shutting down");
                        break;
                    }
                    _ = pool.dispatch_once() => {}
                }
            }
        });

        let pool = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => pool.sweep_completed(),
                }
            }
        });
    }

    /// Stop accepting work; in-flight handlers terminate by returning.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            completed_retained: self.completed.len(),
            total_success: self.total_success.load(Ordering::SeqCst),
            total_retries: self.total_retries.load(Ordering::SeqCst),
            total_dead_lettered: self.total_dead_lettered.load(Ordering::SeqCst),
        }
    }

    /// Completed-job record for status queries, while retained.
    pub fn completed_record(&self, job_id: &str) -> Option<CompletedRecord> {
        self.completed.get(job_id).map(|r| r.clone())
    }

    async fn dispatch_once(self: &Arc<Self>) {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };

        let job = match self.queue.dequeue().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                drop(permit);
                tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                return;
            }
            Err(e) => {
                drop(permit);
                warn!(error = %e, "Dequeue failed, backing off");
                tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms * 5)).await;
                return;
            }
        };

        let pool = self.clone();
        tokio::spawn(async move {
            pool.in_flight.fetch_add(1, Ordering::SeqCst);
            pool.process_job(job).await;
            pool.in_flight.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
    }

    async fn process_job(&self, mut job: Job) {
        job.attempts += 1;
        job.state = JobState::Processing;
        job.last_attempt_at = Some(Utc::now());

        debug!(
            job_id = %job.id,
            handler = %job.handler,
            attempt = job.attempts,
            "Processing job"
        );

        // Typing surfaces activity immediately; the guard stops the
        // heartbeat as soon as this scope ends, success or not.
        let _typing = self.typing.start(&job.conversation_id);

        let handler = match self.registry.resolve(&job.handler) {
            Some(handler) => handler,
            None => {
                error!(job_id = %job.id, handler = %job.handler, "Unknown handler, dead-lettering");
                let reason = format!("unknown handler: {}", job.handler);
                self.dead_letter(&mut job, reason, None).await;
                return;
            }
        };

        let started = std::time::Instant::now();
        let timeout = Duration::from_millis(self.config.processing_timeout_ms);
        let span = logging::job_span(&job.id, &job.conversation_id, &job.handler);
        let outcome = match tokio::time::timeout(timeout, handler.handle(&job).instrument(span)).await
        {
            Ok(result) => result,
            Err(_) => Err(JobError::Timeout(self.config.processing_timeout_ms)),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                job.state = JobState::Completed;
                self.total_success.fetch_add(1, Ordering::SeqCst);
                self.completed.insert(
                    job.id.clone(),
                    CompletedRecord {
                        job_id: job.id.clone(),
                        conversation_id: job.conversation_id.clone(),
                        handler: job.handler.clone(),
                        result,
                        duration_ms,
                        completed_at: Utc::now(),
                    },
                );
                info!(
                    job_id = %job.id,
                    handler = %job.handler,
                    duration_ms = duration_ms,
                    attempts = job.attempts,
                    "Job completed"
                );
            }
            Err(e) => {
                let reason = e.to_string();
                job.last_error = Some(reason.clone());

                if job.attempts <= self.config.max_retries {
                    // Linear backoff grows with the attempt count.
                    let delay =
                        Duration::from_millis(self.config.retry_delay_ms * job.attempts as u64);
                    warn!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        delay_ms = delay.as_millis(),
                        error = %reason,
                        "Job failed, re-enqueueing for retry"
                    );
                    self.total_retries.fetch_add(1, Ordering::SeqCst);
                    job.state = JobState::Pending;
                    if let Err(e) = self.queue.enqueue_delayed(job.clone(), delay).await {
                        error!(job_id = %job.id, error = %e, "Retry enqueue failed, dead-lettering");
                        self.dead_letter(&mut job, reason, None).await;
                    }
                } else {
                    self.dead_letter(&mut job, reason, Some(format!("{:?}", e))).await;
                }
            }
        }
    }

    async fn dead_letter(&self, job: &mut Job, reason: String, stack: Option<String>) {
        job.state = JobState::Failed;
        self.total_dead_lettered.fetch_add(1, Ordering::SeqCst);

        error!(
            job_id = %job.id,
            handler = %job.handler,
            attempts = job.attempts,
            reason = %reason,
            "Job exhausted retries, moving to DLQ"
        );

        self.dlq.push(DlqRecord {
            job_id: job.id.clone(),
            handler: job.handler.clone(),
            conversation_id: job.conversation_id.clone(),
            payload: job.payload.clone(),
            queue: self.queue.identifier().to_string(),
            failure_reason: reason,
            failure_stack: stack,
            attempts_made: job.attempts,
            failed_at: Utc::now(),
        });

        // The user only ever sees the apology string.
        if let Err(e) = self.chat.send_apology(&job.conversation_id).await {
            warn!(
                conversation_id = %job.conversation_id,
                error = %e,
                "Apology delivery failed"
            );
        }
    }

    fn sweep_completed(&self) {
        let cutoff =
            Utc::now() - chrono::Duration::milliseconds(self.config.completed_retention_ms as i64);
        let before = self.completed.len();
        self.completed.retain(|_, record| record.completed_at > cutoff);
        let removed = before - self.completed.len();
        if removed > 0 {
            debug!(removed = removed, "Swept expired completed-job records");
        }
    }
}
