//! Chat platform client
//!
//! The contract the core consumes from the chat platform: send a reply,
//! surface typing activity, deliver the apology message on processor
//! faults. The HTTP implementation classifies response codes, retries
//! transient failures with a delay table, and carries a delivery gate
//! that pauses outbound calls while the platform is hard-down, so reply
//! retries and typing pulses cannot pile up against it.

use async_trait::async_trait;
use thiserror::Error;

mod client;
mod typing;

pub use client::{HttpChatClient, HttpChatClientConfig};
pub use typing::{TypingDriver, TypingGuard};

/// The only message a user sees on a processor fault. Internal reasons are
/// never leaked.
pub const APOLOGY_MESSAGE: &str =
    "Lo sentimos, tuvimos un problema procesando tu mensaje. Un agente te atenderá en breve.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Chat platform rejected request (HTTP {status}): {message}")]
    Config { status: u16, message: String },

    #[error("Transient chat platform error: {0}")]
    Transient(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Chat delivery paused after repeated failures")]
    DeliveryPaused,
}

impl ChatError {
    /// Transient and connection failures are worth retrying; config errors
    /// and a paused delivery gate are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Transient(_) | ChatError::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

/// Outbound contract to the chat platform.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a reply into the conversation.
    async fn send_reply(&self, conversation_id: &str, text: &str) -> Result<()>;

    /// Toggle the typing indicator for the conversation.
    async fn set_typing(&self, conversation_id: &str, on: bool) -> Result<()>;

    /// Deliver the compact apology message.
    async fn send_apology(&self, conversation_id: &str) -> Result<()> {
        self.send_reply(conversation_id, APOLOGY_MESSAGE).await
    }
}
