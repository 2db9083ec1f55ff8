//! In-process fallback for the distributed limiter
//!
//! Single-process only: consistency across replicas is degraded while Redis
//! is down, but admission keeps working. Entries are pruned by a background
//! sweep so an outage does not grow the maps without bound.

use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    window_start: i64,
}

#[derive(Debug, Clone, Copy)]
struct DedupeEntry {
    hash: u32,
    seen_at: i64,
}

/// Fallback maps keyed by conversation id.
pub struct MemoryLimiter {
    windows: DashMap<String, Window>,
    dedupe: DashMap<String, DedupeEntry>,
}

impl MemoryLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
            dedupe: DashMap::new(),
        }
    }

    /// Same semantics as the Redis sliding-window script.
    pub fn check_rate(&self, conversation_id: &str, now: i64, window_ms: u64) -> (u32, i64) {
        let mut entry = self
            .windows
            .entry(conversation_id.to_string())
            .or_insert(Window {
                count: 0,
                window_start: now,
            });

        if now - entry.window_start > window_ms as i64 {
            entry.count = 1;
            entry.window_start = now;
        } else {
            entry.count += 1;
        }

        (entry.count, entry.window_start)
    }

    /// Same semantics as the Redis dedupe script.
    pub fn check_duplicate(
        &self,
        conversation_id: &str,
        hash: u32,
        now: i64,
        window_ms: u64,
    ) -> bool {
        let mut entry = self
            .dedupe
            .entry(conversation_id.to_string())
            .or_insert(DedupeEntry { hash: 0, seen_at: 0 });

        let is_duplicate =
            entry.seen_at != 0 && entry.hash == hash && now - entry.seen_at < window_ms as i64;

        if !is_duplicate {
            entry.hash = hash;
            entry.seen_at = now;
        }

        is_duplicate
    }

    /// Prune entries untouched for longer than `max_age_ms`.
    pub fn sweep(&self, max_age_ms: i64) {
        let now = chrono::Utc::now().timestamp_millis();
        let before = self.windows.len() + self.dedupe.len();

        self.windows
            .retain(|_, w| now - w.window_start <= max_age_ms);
        self.dedupe.retain(|_, d| now - d.seen_at <= max_age_ms);

        let removed = before - (self.windows.len() + self.dedupe.len());
        if removed > 0 {
            debug!(removed = removed, "Pruned stale limiter fallback entries");
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len() + self.dedupe.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLimiter {
    fn default() -> Self {
        Self::new()
    }
}
