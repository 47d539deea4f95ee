//! Streaming Reply Accumulator
//!
//! Turns one user message into one streamed bot reply inside a
//! [`Conversation`].
//!
//! # Flow
//!
//! ```text
//! send(text) ──▶ blank? ──yes──▶ Ignored
//!                  │no
//!                  ▼
//!            operator owns it? ──yes──▶ Suppressed
//!                  │no
//!                  ▼
//!             open stream
//!                  │
//!       ┌──────────┼──────────────────┐
//!    refused     failed             opened
//!       │          │                  │
//!   reload     push user +       push user,
//!   record     apology           Streaming(ReplyStream)
//!       │          │                  │ next()
//!  Suppressed   Failed                │
//!                              ▼
//!              Assigned ─ Appended ─ ... ─ Finished
//! ```
//!
//! The user message is appended only once the service has taken the
//! request, so a refused send never leaves a message the server does not
//! have. The refused text is handed back in [`SendOutcome::Suppressed`].
//!
//! A [`ReplyStream`] is one-shot. It does not borrow the conversation; the
//! caller passes it in on every [`ReplyStream::next`] call, so the host stays
//! free to render between fragments. The bot reply is created lazily on the
//! first fragment and frozen when the stream ends.
//!
//! On a transport failure the partial reply is replaced with
//! [`APOLOGY_MESSAGE`] and every later event is discarded.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backend::{ChatBackend, ChatRequest, StreamEvent};
use crate::conversation::{Conversation, ConversationMode};
use crate::error::ChatError;
use crate::messages::{ConversationId, MessageId};
use crate::mode::ConversationModeController;

/// Text shown in place of a reply that could not be delivered
pub const APOLOGY_MESSAGE: &str = "Sorry, I ran into a problem. Please try again later.";

/// Per-send options
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Ask the service to ground the answer in its knowledge base
    pub use_knowledge: bool,
    /// Model recorded on the bot reply
    pub model: Option<String>,
}

/// Result of [`StreamingReplyAccumulator::send`]
#[derive(Debug)]
pub enum SendOutcome {
    /// Blank text; nothing was appended and no stream was opened
    Ignored,
    /// An operator owns the conversation; nothing was appended
    Suppressed {
        /// Conversation the operator owns
        conversation_id: ConversationId,
        /// Text that was not delivered, for the host to route elsewhere
        undelivered: String,
    },
    /// The reply stream is open
    Streaming(ReplyStream),
    /// The stream could not be opened; the apology is already in the conversation
    Failed(ChatError),
}

/// One step of a reply stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyProgress {
    /// The service assigned an identity to a new conversation
    Assigned(ConversationId),
    /// A fragment was appended to the bot reply
    Appended {
        /// The reply being extended
        message_id: MessageId,
        /// Text that was appended
        fragment: String,
    },
    /// The stream is over
    Finished(ReplyOutcome),
}

/// How a reply stream ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The service closed the stream normally
    Completed {
        /// Identity of the conversation after the exchange
        conversation_id: Option<ConversationId>,
    },
    /// The transport failed; the reply now reads [`APOLOGY_MESSAGE`]
    Failed {
        /// Transport error description
        error: String,
    },
    /// The caller stopped consuming the stream
    Cancelled,
}

/// Sends user messages and starts reply streams
pub struct StreamingReplyAccumulator<B> {
    backend: Arc<B>,
    modes: Arc<ConversationModeController<B>>,
}

impl<B: ChatBackend> StreamingReplyAccumulator<B> {
    /// Create an accumulator sharing the mode table with `modes`
    pub fn new(backend: Arc<B>, modes: Arc<ConversationModeController<B>>) -> Self {
        Self { backend, modes }
    }

    /// Open the reply stream for `text` and append it as a user message
    ///
    /// Never fails outright: every failure is folded into the conversation
    /// and reported through [`SendOutcome`].
    pub async fn send(
        &self,
        conversation: &mut Conversation,
        text: &str,
        options: &SendOptions,
    ) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Ignored;
        }

        if let Some(id) = conversation.id() {
            if self.modes.is_manual(id) {
                tracing::debug!(conversation_id = %id, "Operator owns conversation, not streaming");
                return SendOutcome::Suppressed {
                    conversation_id: id.clone(),
                    undelivered: text.to_string(),
                };
            }
        }

        let request = ChatRequest::new(text)
            .with_conversation(conversation.id().cloned())
            .with_knowledge(options.use_knowledge);

        match self.backend.send_streaming(&request).await {
            Ok(events) => {
                conversation.push_user(text);
                tracing::debug!(
                    backend = self.backend.name(),
                    conversation_id = ?conversation.id(),
                    "Reply stream opened"
                );
                SendOutcome::Streaming(ReplyStream::new(events, options.model.clone()))
            }
            Err(e) => {
                if let (ChatError::ManualModeActive(_), Some(id)) =
                    (&e, conversation.id().cloned())
                {
                    tracing::info!(conversation_id = %id, "Service routed conversation to an operator");
                    self.modes.observe(&id, ConversationMode::Manual);
                    conversation.set_mode(ConversationMode::Manual);
                    self.reload(conversation, &id).await;
                    return SendOutcome::Suppressed {
                        conversation_id: id,
                        undelivered: text.to_string(),
                    };
                }
                tracing::warn!(error = %e, "Failed to open reply stream");
                conversation.push_user(text);
                conversation.fail_streaming(APOLOGY_MESSAGE);
                SendOutcome::Failed(e)
            }
        }
    }

    /// Adopt the server copy after a refusal; the local view is kept on error
    async fn reload(&self, conversation: &mut Conversation, id: &ConversationId) {
        match self.backend.get_conversation(id).await {
            Ok(record) => {
                self.modes.observe_record(&record);
                conversation.apply_record(record);
            }
            Err(e) => {
                tracing::warn!(conversation_id = %id, error = %e, "Failed to reload refused conversation");
            }
        }
    }
}

/// An open reply stream
///
/// Dropping it releases the underlying connection.
#[derive(Debug)]
pub struct ReplyStream {
    events: Option<mpsc::Receiver<StreamEvent>>,
    model: Option<String>,
    reply: Option<MessageId>,
}

impl ReplyStream {
    /// Wrap an event receiver; `model` is recorded on the bot reply
    #[must_use]
    pub fn new(events: mpsc::Receiver<StreamEvent>, model: Option<String>) -> Self {
        Self {
            events: Some(events),
            model,
            reply: None,
        }
    }

    /// Whether the stream has ended
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.events.is_none()
    }

    /// Bot reply this stream created, once the first fragment arrived
    #[must_use]
    pub fn reply_id(&self) -> Option<MessageId> {
        self.reply
    }

    /// Apply the next event to `conversation`
    ///
    /// Returns `None` once [`ReplyProgress::Finished`] has been reported.
    pub async fn next(&mut self, conversation: &mut Conversation) -> Option<ReplyProgress> {
        loop {
            let event = self.events.as_mut()?.recv().await;

            match event {
                Some(StreamEvent::ConversationAssigned(id)) => {
                    if conversation.assign_id(id.clone()) {
                        tracing::debug!(conversation_id = %id, "Conversation identity assigned");
                        return Some(ReplyProgress::Assigned(id));
                    }
                    if conversation.id() != Some(&id) {
                        tracing::debug!(
                            conversation_id = %id,
                            "Ignoring identity for a conversation that already has one"
                        );
                    }
                }
                Some(StreamEvent::Fragment(fragment)) => {
                    if !conversation.is_streaming() {
                        self.reply = Some(conversation.open_reply(self.model.clone()));
                    }
                    let message_id = conversation
                        .append_streaming(&fragment)
                        .map(|message| message.id)?;
                    return Some(ReplyProgress::Appended {
                        message_id,
                        fragment,
                    });
                }
                Some(StreamEvent::Failed(error)) => {
                    self.events = None;
                    let id = conversation.fail_streaming(APOLOGY_MESSAGE);
                    self.reply.get_or_insert(id);
                    tracing::warn!(error = %error, "Reply stream failed");
                    return Some(ReplyProgress::Finished(ReplyOutcome::Failed { error }));
                }
                None => {
                    self.events = None;
                    conversation.complete_streaming();
                    tracing::debug!(conversation_id = ?conversation.id(), "Reply stream completed");
                    return Some(ReplyProgress::Finished(ReplyOutcome::Completed {
                        conversation_id: conversation.id().cloned(),
                    }));
                }
            }
        }
    }

    /// Consume the stream to the end
    pub async fn run(&mut self, conversation: &mut Conversation) -> ReplyOutcome {
        while let Some(progress) = self.next(conversation).await {
            if let ReplyProgress::Finished(outcome) = progress {
                return outcome;
            }
        }
        ReplyOutcome::Cancelled
    }

    /// Stop consuming, keep what arrived so far, and release the connection
    pub fn cancel(&mut self, conversation: &mut Conversation) -> ReplyOutcome {
        if self.events.take().is_some() {
            conversation.complete_streaming();
            tracing::debug!(conversation_id = ?conversation.id(), "Reply stream cancelled");
        }
        ReplyOutcome::Cancelled
    }
}
