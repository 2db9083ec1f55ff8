//! Switchboard Processor
//!
//! Wires the core together: admission Governor over the distributed
//! limiter, worker pool with typing keep-alive and DLQ, semantic cache,
//! self-healing AI runner, beacon rule engine, feedback/threshold tuner,
//! and the polled config hub. The inbound HTTP surface and the concrete
//! flow handlers are collaborators registered at startup; this binary
//! owns everything in between.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};

use sb_ai::{SemanticCache, SemanticCacheConfig};
use sb_chat::{ChatClient, HttpChatClient, HttpChatClientConfig, TypingDriver};
use sb_common::{AlertService, AlertServiceConfig};
use sb_config::AppConfig;
use sb_confighub::{ConfigHub, ConfigHubClientConfig};
use sb_governor::{Governor, GovernorConfig, ServiceHours};
use sb_limiter::{DistributedLimiter, LimiterConfig};
use sb_queue::{
    DlqManager, DlqManagerConfig, HandlerRegistry, JobQueue, MemoryJobQueue, RedisJobQueue,
    WorkerPool, WorkerPoolConfig,
};
use sb_rules::{HardRuleConfig, RuleEngine};
use sb_tuner::{FeedbackProcessor, ThresholdTuner, TunerPolicy};

mod dispatcher;

use dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> Result<()> {
    sb_common::logging::init_logging("sb-processor");

    let config = AppConfig::load()?;
    info!(dev_mode = config.dev_mode, "Starting Switchboard processor");

    // 1. Redis connection, shared by the limiter and the job queue.
    let redis_conn = if config.redis.enabled {
        match redis::Client::open(config.redis.url.as_str()) {
            Ok(client) => match redis::aio::ConnectionManager::new(client).await {
                Ok(conn) => {
                    info!(url = %config.redis.url, "Connected to Redis");
                    Some(conn)
                }
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, running on in-process fallbacks");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Invalid Redis URL, running on in-process fallbacks");
                None
            }
        }
    } else {
        info!("Redis disabled by configuration");
        None
    };

    // 2. Distributed limiter with memory fallback.
    let limiter_config = LimiterConfig {
        window_ms: config.rate_limit.window_ms,
        max_requests: config.rate_limit.max_requests,
        dedupe_window_ms: config.dedupe.window_ms,
    };
    let limiter = Arc::new(match redis_conn.clone() {
        Some(conn) => DistributedLimiter::new(conn, limiter_config),
        None => DistributedLimiter::in_memory(limiter_config),
    });
    limiter.start_sweeper();

    // 3. Governor. Agent-presence, blacklist and flow-state capabilities
    // are registered here by the embedding deployment.
    let governor = Arc::new(Governor::new(
        limiter.clone(),
        GovernorConfig {
            service_hours: ServiceHours {
                enabled: config.service_hours.enabled,
                start: config.service_hours.start,
                end: config.service_hours.end,
                utc_offset_hours: config.service_hours.utc_offset_hours,
            },
            ..GovernorConfig::default()
        },
    ));

    // 4. Chat platform client and typing driver.
    let chat: Arc<dyn ChatClient> = Arc::new(HttpChatClient::new(HttpChatClientConfig {
        base_url: config.chat.base_url.clone(),
        account_id: config.chat.account_id.clone(),
        api_token: config.chat.api_token.clone(),
        timeout: Duration::from_millis(config.chat.timeout_ms),
        connect_timeout: Duration::from_millis(config.chat.connect_timeout_ms),
        ..HttpChatClientConfig::default()
    }));
    let typing = TypingDriver::new(
        chat.clone(),
        Duration::from_millis(config.worker.typing_interval_ms),
        config.worker.typing_enabled,
    );

    // 5. Queue, DLQ and worker pool.
    let queue: Arc<dyn JobQueue> = match redis_conn {
        Some(conn) => Arc::new(RedisJobQueue::new(conn, "main")),
        None => Arc::new(MemoryJobQueue::new("main")),
    };

    let alerts = Arc::new(AlertService::new(AlertServiceConfig {
        suppression_minutes: config.dlq.alert_suppression_minutes,
        ..AlertServiceConfig::default()
    }));
    let dlq = Arc::new(DlqManager::new(
        DlqManagerConfig {
            alert_threshold: config.dlq.alert_threshold,
            check_interval: Duration::from_millis(config.dlq.check_interval_ms),
        },
        alerts.clone(),
    ));
    dlq.start_alert_loop();

    let registry = Arc::new(HandlerRegistry::new());
    // Flow handlers and the intent classifier register here; they are
    // collaborators outside the core.

    let pool = Arc::new(WorkerPool::new(
        WorkerPoolConfig {
            max_concurrent: config.worker.max_concurrent,
            max_retries: config.worker.max_retries,
            retry_delay_ms: config.worker.retry_delay_ms,
            processing_timeout_ms: config.worker.processing_timeout_ms,
            completed_retention_ms: config.worker.completed_retention_ms,
            ..WorkerPoolConfig::default()
        },
        queue.clone(),
        registry.clone(),
        chat.clone(),
        typing,
        dlq.clone(),
    ));
    pool.start();

    let _dispatcher = Arc::new(Dispatcher::new(governor.clone(), pool.clone()));

    // 6. Semantic cache with its expired-entry sweep.
    let cache = Arc::new(SemanticCache::new(SemanticCacheConfig {
        max_entries: config.cache.max_entries,
        ttl_faq: Duration::from_secs(config.cache.ttl_faq_secs),
        ttl_general: Duration::from_secs(config.cache.ttl_general_secs),
        ttl_transient: Duration::from_secs(config.cache.ttl_transient_secs),
    }));
    cache.start_sweeper(Duration::from_millis(config.cache.sweep_interval_ms));

    // 7. Beacon rule engine.
    let rule_pairs = |ranges: &[sb_config::MonthDayRange]| {
        ranges
            .iter()
            .map(|r| (r.start.clone(), r.end.clone()))
            .collect::<Vec<_>>()
    };
    let _rule_engine = Arc::new(RuleEngine::new(HardRuleConfig::from_pairs(
        &rule_pairs(&config.rules.peak_shaving),
        &rule_pairs(&config.rules.pull_only),
    )));

    // 8. Feedback loop and threshold tuner.
    let _feedback = Arc::new(FeedbackProcessor::new());
    let _tuner = Arc::new(ThresholdTuner::new(TunerPolicy {
        min_samples: config.tuner.min_samples as u64,
        window: chrono_days(config.tuner.window_days),
        fpr_trigger: config.tuner.fpr_trigger,
        recall_miss_trigger: config.tuner.recall_miss_trigger,
        min_adjustment_percent: config.tuner.min_adjustment_percent,
        approval_required_above_percent: config.tuner.approval_required_above_percent,
        cooldown: chrono_hours(config.tuner.cooldown_hours),
        max_auto_per_week: config.tuner.max_auto_per_week,
    }));

    // 9. Config hub polling.
    if config.config_hub.enabled {
        let hub = Arc::new(ConfigHub::new(ConfigHubClientConfig {
            url: config.config_hub.url.clone(),
            poll_interval: Duration::from_secs(config.config_hub.poll_interval_secs),
            request_timeout: Duration::from_secs(config.config_hub.request_timeout_secs),
            max_retry_attempts: config.config_hub.max_retry_attempts,
            retry_delay: Duration::from_secs(config.config_hub.retry_delay_secs),
        }));
        if let Err(e) = hub.fetch_once().await {
            warn!(error = %e, "Initial config hub fetch failed, starting with empty snapshot");
        }
        hub.start_polling();
    }

    info!("Switchboard processor started. Press Ctrl+C to shutdown.");
    shutdown_signal().await;
    info!("Shutdown signal received...");

    pool.shutdown();

    info!("Switchboard processor shutdown complete");
    Ok(())
}

fn chrono_days(days: i64) -> chrono::Duration {
    chrono::Duration::days(days)
}

fn chrono_hours(hours: i64) -> chrono::Duration {
    chrono::Duration::hours(hours)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
