//! Distributed rate limiter and duplicate detection
//!
//! Provides an atomic sliding-window counter and a repeat-message detector,
//! both keyed per conversation. Each check is a single Redis Lua script so
//! there is no read-modify-write in the application. On any Redis error the
//! call falls back to an in-process map with identical semantics; the
//! verdict reports which backend served it.

use chrono::Utc;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

mod memory;

pub use memory::MemoryLimiter;

/// Backend that served a limiter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterSource {
    Redis,
    Memory,
}

/// Result of a sliding-window rate-limit check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitVerdict {
    pub allowed: bool,
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch milliseconds at which the current window resets.
    pub reset_at: i64,
    pub source: LimiterSource,
}

/// Result of a duplicate-message check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupeVerdict {
    pub is_duplicate: bool,
    pub hash: u32,
    pub source: LimiterSource,
}

/// Limiter configuration.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Sliding window size in milliseconds
    pub window_ms: u64,
    /// Maximum incoming messages per conversation per window
    pub max_requests: u32,
    /// Repeat-message window in milliseconds
    pub dedupe_window_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 10,
            dedupe_window_ms: 5000,
        }
    }
}

/// Atomic sliding-window counter.
///
/// Resets the window when it has elapsed, otherwise increments. Returns
/// `{count, windowStart}`. The key TTL is twice the window so idle
/// conversations expire on their own.
const RATE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local count = 1
local window_start = now
local data = redis.call('HMGET', KEYS[1], 'count', 'windowStart')
if data[1] and data[2] and (now - tonumber(data[2])) <= window_ms then
    count = tonumber(data[1]) + 1
    window_start = tonumber(data[2])
end
redis.call('HMSET', KEYS[1], 'count', count, 'windowStart', window_start)
redis.call('PEXPIRE', KEYS[1], window_ms * 2)
return {count, window_start}
"#;

/// Atomic repeat-message check.
///
/// Compares the stored hash against the incoming one; a match younger than
/// the window is a duplicate. On miss the new hash is stored with a short
/// TTL.
const DEDUPE_SCRIPT: &str = r#"
local now = tonumber(ARGV[2])
local window_ms = tonumber(ARGV[3])
local stored = redis.call('HMGET', KEYS[1], 'hash', 'ts')
if stored[1] and stored[2] and stored[1] == ARGV[1] and (now - tonumber(stored[2])) < window_ms then
    return 1
end
redis.call('HMSET', KEYS[1], 'hash', ARGV[1], 'ts', now)
redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[4]))
return 0
"#;

/// TTL for dedupe records, roughly 6x the default window.
const DEDUPE_TTL_MS: u64 = 30_000;

/// 32-bit rolling hash over the message text.
///
/// Collisions are statistically rare but possible; swap for sha2 if dedupe
/// behaviour on pathological inputs ever matters.
pub fn rolling_hash(text: &str) -> u32 {
    let mut hash: u32 = 0;
    for byte in text.as_bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(*byte as u32);
    }
    hash
}

/// Distributed limiter with in-process fallback.
pub struct DistributedLimiter {
    conn: Option<ConnectionManager>,
    memory: MemoryLimiter,
    config: LimiterConfig,
}

impl DistributedLimiter {
    /// Limiter backed by Redis, falling back to memory on errors.
    pub fn new(conn: ConnectionManager, config: LimiterConfig) -> Self {
        Self {
            conn: Some(conn),
            memory: MemoryLimiter::new(),
            config,
        }
    }

    /// Limiter running purely in-process (dev mode, or Redis disabled).
    pub fn in_memory(config: LimiterConfig) -> Self {
        Self {
            conn: None,
            memory: MemoryLimiter::new(),
            config,
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Spawn the background sweep that prunes stale fallback entries.
    pub fn start_sweeper(self: &std::sync::Arc<Self>) {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                limiter.memory.sweep(300_000);
            }
        });
    }

    /// Check and consume one slot of the conversation's sliding window.
    pub async fn check_rate_limit(&self, conversation_id: &str) -> RateLimitVerdict {
        let now = Utc::now().timestamp_millis();
        let key = format!("rate:{}", conversation_id);

        if let Some(conn) = &self.conn {
            let mut conn = conn.clone();
            let result: redis::RedisResult<(u32, i64)> = redis::Script::new(RATE_SCRIPT)
                .key(&key)
                .arg(now)
                .arg(self.config.window_ms)
                .invoke_async(&mut conn)
                .await;

            match result {
                Ok((count, window_start)) => {
                    return self.rate_verdict(count, window_start, LimiterSource::Redis);
                }
                Err(e) => {
                    warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Rate limit store unavailable, using memory fallback"
                    );
                }
            }
        }

        let (count, window_start) =
            self.memory
                .check_rate(conversation_id, now, self.config.window_ms);
        self.rate_verdict(count, window_start, LimiterSource::Memory)
    }

    /// Check whether the same text was seen on this conversation inside the
    /// dedupe window.
    pub async fn check_duplicate(&self, conversation_id: &str, text: &str) -> DedupeVerdict {
        let now = Utc::now().timestamp_millis();
        let hash = rolling_hash(text);
        let key = format!("dedupe:{}", conversation_id);

        if let Some(conn) = &self.conn {
            let mut conn = conn.clone();
            let result: redis::RedisResult<i32> = redis::Script::new(DEDUPE_SCRIPT)
                .key(&key)
                .arg(hash)
                .arg(now)
                .arg(self.config.dedupe_window_ms)
                .arg(DEDUPE_TTL_MS)
                .invoke_async(&mut conn)
                .await;

            match result {
                Ok(flag) => {
                    debug!(
                        conversation_id = %conversation_id,
                        hash = hash,
                        is_duplicate = flag == 1,
                        "Dedupe check"
                    );
                    return DedupeVerdict {
                        is_duplicate: flag == 1,
                        hash,
                        source: LimiterSource::Redis,
                    };
                }
                Err(e) => {
                    warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Dedupe store unavailable, using memory fallback"
                    );
                }
            }
        }

        let is_duplicate =
            self.memory
                .check_duplicate(conversation_id, hash, now, self.config.dedupe_window_ms);
        DedupeVerdict {
            is_duplicate,
            hash,
            source: LimiterSource::Memory,
        }
    }

    fn rate_verdict(&self, count: u32, window_start: i64, source: LimiterSource) -> RateLimitVerdict {
        let limit = self.config.max_requests;
        RateLimitVerdict {
            allowed: count <= limit,
            count,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at: window_start + self.config.window_ms as i64,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_ms: u64, dedupe_window_ms: u64) -> DistributedLimiter {
        DistributedLimiter::in_memory(LimiterConfig {
            window_ms,
            max_requests,
            dedupe_window_ms,
        })
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_blocks() {
        let limiter = limiter(2, 60_000, 5000);

        let first = limiter.check_rate_limit("C2").await;
        assert!(first.allowed);
        assert_eq!(first.count, 1);
        assert_eq!(first.remaining, 1);

        let second = limiter.check_rate_limit("C2").await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = limiter.check_rate_limit("C2").await;
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert_eq!(third.source, LimiterSource::Memory);
    }

    #[tokio::test]
    async fn conversations_have_independent_windows() {
        let limiter = limiter(1, 60_000, 5000);
        assert!(limiter.check_rate_limit("A").await.allowed);
        assert!(limiter.check_rate_limit("B").await.allowed);
        assert!(!limiter.check_rate_limit("A").await.allowed);
    }

    #[tokio::test]
    async fn window_resets_after_elapsing() {
        let limiter = limiter(1, 50, 5000);
        assert!(limiter.check_rate_limit("C").await.allowed);
        assert!(!limiter.check_rate_limit("C").await.allowed);
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(limiter.check_rate_limit("C").await.allowed);
    }

    #[tokio::test]
    async fn duplicate_inside_window_is_flagged() {
        let limiter = limiter(10, 60_000, 5000);

        let first = limiter.check_duplicate("C1", "hola").await;
        assert!(!first.is_duplicate);

        let second = limiter.check_duplicate("C1", "hola").await;
        assert!(second.is_duplicate);
        assert_eq!(second.hash, first.hash);

        // Different text is not a duplicate.
        let other = limiter.check_duplicate("C1", "adios").await;
        assert!(!other.is_duplicate);
    }

    #[tokio::test]
    async fn duplicate_expires_after_window() {
        let limiter = limiter(10, 60_000, 50);
        assert!(!limiter.check_duplicate("C1", "hola").await.is_duplicate);
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(!limiter.check_duplicate("C1", "hola").await.is_duplicate);
    }

    #[test]
    fn rolling_hash_is_stable_and_discriminates() {
        assert_eq!(rolling_hash("hola"), rolling_hash("hola"));
        assert_ne!(rolling_hash("hola"), rolling_hash("hola!"));
        assert_ne!(rolling_hash(""), rolling_hash(" "));
    }
}
