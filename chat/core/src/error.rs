//! Client Error Types

use thiserror::Error;

use crate::messages::ConversationId;

/// Errors surfaced by the chat client
#[derive(Debug, Error)]
pub enum ChatError {
    /// Network or connection failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status
    #[error("chat service returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// A response body could not be decoded
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Blank text was submitted where content is required
    #[error("message is empty")]
    EmptyMessage,

    /// A manual reply was attempted while the conversation is automatic
    #[error("conversation {0} is not in manual mode")]
    NotManual(ConversationId),

    /// The service refused an automatic reply because an operator owns the conversation
    #[error("conversation {0} is handled by an operator")]
    ManualModeActive(ConversationId),

    /// The operation needs a conversation that has an identity
    #[error("no conversation is open")]
    NoConversation,

    /// The client could not be configured
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ChatError {
    /// Whether the failure happened on the wire rather than in the request itself
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
