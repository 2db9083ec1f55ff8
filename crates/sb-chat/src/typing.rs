//! Typing heartbeat driver
//!
//! Surfaces activity to the customer while a job is being processed: one
//! immediate pulse, then a repeat every interval until the guard is
//! dropped. Dropping the guard aborts the heartbeat and fires a
//! best-effort "typing off" pulse.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::ChatClient;

/// Spawns typing heartbeats for in-flight conversations.
#[derive(Clone)]
pub struct TypingDriver {
    client: Arc<dyn ChatClient>,
    interval: Duration,
    enabled: bool,
}

impl TypingDriver {
    pub fn new(client: Arc<dyn ChatClient>, interval: Duration, enabled: bool) -> Self {
        Self {
            client,
            interval,
            enabled,
        }
    }

    /// Start the heartbeat for a conversation. Heartbeats cease when the
    /// returned guard is dropped.
    pub fn start(&self, conversation_id: &str) -> Option<TypingGuard> {
        if !self.enabled {
            return None;
        }

        let client = self.client.clone();
        let conversation = conversation_id.to_string();
        let interval = self.interval;

        let handle = tokio::spawn({
            let client = client.clone();
            let conversation = conversation.clone();
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    // First tick fires immediately: the customer sees
                    // activity before any slow work begins.
                    ticker.tick().await;
                    if let Err(e) = client.set_typing(&conversation, true).await {
                        debug!(conversation_id = %conversation, error = %e, "Typing pulse failed");
                    }
                }
            }
        });

        Some(TypingGuard {
            handle,
            client,
            conversation_id: conversation,
        })
    }
}

/// Keeps the typing heartbeat alive for as long as it is held.
pub struct TypingGuard {
    handle: tokio::task::JoinHandle<()>,
    client: Arc<dyn ChatClient>,
    conversation_id: String,
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.handle.abort();
        let client = self.client.clone();
        let conversation = self.conversation_id.clone();
        tokio::spawn(async move {
            let _ = client.set_typing(&conversation, false).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingClient {
        pulses: AtomicU32,
        off_calls: AtomicU32,
        conversations: Mutex<Vec<String>>,
    }

    impl RecordingClient {
        fn new() -> Self {
            Self {
                pulses: AtomicU32::new(0),
                off_calls: AtomicU32::new(0),
                conversations: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatClient for RecordingClient {
        async fn send_reply(&self, _conversation_id: &str, _text: &str) -> crate::Result<()> {
            Ok(())
        }

        async fn set_typing(&self, conversation_id: &str, on: bool) -> crate::Result<()> {
            if on {
                self.pulses.fetch_add(1, Ordering::SeqCst);
                self.conversations.lock().push(conversation_id.to_string());
            } else {
                self.off_calls.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn heartbeat_pulses_until_guard_drops() {
        let client = Arc::new(RecordingClient::new());
        let driver = TypingDriver::new(client.clone(), Duration::from_millis(20), true);

        let guard = driver.start("C1");
        tokio::time::sleep(Duration::from_millis(70)).await;
        drop(guard);

        let pulses = client.pulses.load(Ordering::SeqCst);
        assert!(pulses >= 2, "expected repeated pulses, got {}", pulses);
        assert_eq!(client.conversations.lock()[0], "C1");

        // No further pulses after the guard is gone.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(client.pulses.load(Ordering::SeqCst), pulses);
        assert_eq!(client.off_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_driver_spawns_nothing() {
        let client = Arc::new(RecordingClient::new());
        let driver = TypingDriver::new(client.clone(), Duration::from_millis(10), false);

        assert!(driver.start("C1").is_none());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(client.pulses.load(Ordering::SeqCst), 0);
    }
}
