//! Chat Backend Traits
//!
//! The consumption contract against the remote chat service and conversation
//! store. The accumulator, the mode controller and the polling task only talk
//! to the service through [`ChatBackend`], so tests swap in the scripted
//! [`MockChatBackend`](super::mock::MockChatBackend) without touching the
//! network.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::ChatError;
use crate::messages::{
    ConversationId, ConversationRecord, ConversationSummary, Message, ModelCatalog,
};
use crate::sse::StreamEvent;

/// Body of `POST /chat`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// User-authored text
    pub message: String,
    /// Existing conversation, or `None` to start a new one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Ask the service to ground the answer in its knowledge base
    pub use_knowledge: bool,
}

impl ChatRequest {
    /// Create a request for a new conversation
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Continue an existing conversation
    #[must_use]
    pub fn with_conversation(mut self, id: Option<ConversationId>) -> Self {
        self.conversation_id = id;
        self
    }

    /// Toggle knowledge-base grounding
    #[must_use]
    pub fn with_knowledge(mut self, use_knowledge: bool) -> Self {
        self.use_knowledge = use_knowledge;
        self
    }
}

/// Remote chat service
///
/// Implementations must be cheap to share behind an `Arc`; every method takes
/// `&self`.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Check if the service is reachable
    async fn health_check(&self) -> bool;

    /// Open a reply stream for `request`
    ///
    /// Returns a receiver that yields events in arrival order. The channel
    /// closes when the reply is complete; a transport failure is delivered as
    /// a final [`StreamEvent::Failed`]. Dropping the receiver releases the
    /// underlying connection.
    ///
    /// # Errors
    ///
    /// Fails if the stream cannot be opened. A conversation owned by an
    /// operator is refused with [`ChatError::ManualModeActive`].
    async fn send_streaming(
        &self,
        request: &ChatRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ChatError>;

    /// List conversations, most recently updated first
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ChatError>;

    /// Fetch the authoritative copy of a conversation
    async fn get_conversation(&self, id: &ConversationId) -> Result<ConversationRecord, ChatError>;

    /// Delete a conversation
    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), ChatError>;

    /// Switch a conversation between automatic and manual replies
    async fn set_mode(&self, id: &ConversationId, manual: bool) -> Result<(), ChatError>;

    /// Record an operator reply; returns the message as stored by the service
    async fn post_manual_reply(&self, id: &ConversationId, text: &str)
        -> Result<Message, ChatError>;

    /// List the models the service can answer with
    async fn list_models(&self) -> Result<ModelCatalog, ChatError>;

    /// Select the model for subsequent replies; returns the active model
    async fn select_model(&self, model: &str) -> Result<String, ChatError>;
}
