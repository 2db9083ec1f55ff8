//! Job queue, worker pool and dead-letter queue
//!
//! Admitted webhooks become serialisable jobs carrying a handler identifier
//! that workers resolve against a static registry. The queue trait has a
//! memory-backed implementation for development and a Redis-backed one for
//! production; the worker pool drives either under a concurrency cap with
//! retries, typing keep-alive, and DLQ handoff on exhaustion.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use sb_common::Job;

mod dlq;
mod memory;
mod pool;
mod redis_queue;

pub use dlq::{DlqManager, DlqManagerConfig};
pub use memory::MemoryJobQueue;
pub use pool::{CompletedRecord, PoolSnapshot, WorkerPool, WorkerPoolConfig};
pub use redis_queue::RedisJobQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Queue is stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Handler failure, classified for the retry path.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("Processing timeout after {0} ms")]
    Timeout(u64),
}

/// A named unit of work resolvable from a job's handler identifier.
///
/// Handlers must be idempotent over short retries: two distinct messages of
/// one conversation may run in parallel, and a timed-out attempt may run
/// again.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, job: &Job) -> std::result::Result<serde_json::Value, JobError>;
}

/// Static registry resolving handler identifiers to implementations.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    pub fn register(&self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).map(|h| h.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }
}

/// Trait for the job queue backing store.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue identifier used in DLQ records and logs.
    fn identifier(&self) -> &str;

    /// Enqueue a job for immediate pickup. Returns the job id.
    async fn enqueue(&self, job: Job) -> Result<String>;

    /// Enqueue a job that becomes visible after `delay`.
    async fn enqueue_delayed(&self, job: Job, delay: Duration) -> Result<String>;

    /// Pop the next ready job, if any.
    async fn dequeue(&self) -> Result<Option<Job>>;

    /// Approximate number of jobs waiting (ready + scheduled).
    async fn len(&self) -> Result<usize>;
}
