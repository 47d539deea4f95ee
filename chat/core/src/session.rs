//! Session Management
//!
//! [`ChatSession`] is the host a UI surface drives: it owns the conversation
//! being viewed, the conversation list, the reply stream in flight and the
//! polling task for the open conversation.
//!
//! # View Lifetime
//!
//! Everything tied to the current view is released before the next view is
//! loaded. Opening another conversation or starting a new chat:
//!
//! 1. cancels the active reply stream (the partial reply is kept and frozen),
//! 2. cancels polling for the old conversation,
//! 3. discards poll results still queued for it.
//!
//! Poll results are additionally checked against the viewed conversation's
//! identity before they are applied.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::accumulator::{
    ReplyOutcome, ReplyProgress, ReplyStream, SendOptions, SendOutcome, StreamingReplyAccumulator,
};
use crate::backend::ChatBackend;
use crate::config::ClientConfig;
use crate::conversation::{Conversation, ConversationMode};
use crate::error::ChatError;
use crate::messages::{ConversationId, ConversationSummary, ModelCatalog};
use crate::mode::ConversationModeController;
use crate::poller::{ConversationPoller, PollHandle, PollUpdate};

/// Queued poll results before the poller waits on the host
const POLL_QUEUE_DEPTH: usize = 8;

/// Result of [`ChatSession::send_message`]
#[derive(Debug)]
pub enum SendStatus {
    /// Blank text; nothing happened
    Ignored,
    /// An operator owns the conversation; the text was not sent
    Suppressed {
        /// Conversation the operator owns
        conversation_id: ConversationId,
        /// Text that was not delivered
        undelivered: String,
    },
    /// A reply is streaming; drive it with [`ChatSession::next_reply_progress`]
    Streaming,
    /// The stream could not be opened; the apology is already shown
    Failed(ChatError),
}

/// A chat client session bound to one view
pub struct ChatSession<B: ChatBackend + 'static> {
    backend: Arc<B>,
    modes: Arc<ConversationModeController<B>>,
    accumulator: StreamingReplyAccumulator<B>,
    config: ClientConfig,
    conversation: Conversation,
    conversations: Vec<ConversationSummary>,
    current_model: Option<String>,
    active_reply: Option<ReplyStream>,
    poller: Option<PollHandle>,
    updates_tx: mpsc::Sender<PollUpdate>,
    updates_rx: mpsc::Receiver<PollUpdate>,
}

impl<B: ChatBackend + 'static> ChatSession<B> {
    /// Create a session showing a new, empty chat
    pub fn new(backend: Arc<B>, config: ClientConfig) -> Self {
        let modes = Arc::new(ConversationModeController::new(Arc::clone(&backend)));
        let accumulator = StreamingReplyAccumulator::new(Arc::clone(&backend), Arc::clone(&modes));
        let (updates_tx, updates_rx) = mpsc::channel(POLL_QUEUE_DEPTH);

        Self {
            backend,
            modes,
            accumulator,
            current_model: config.default_model.clone(),
            config,
            conversation: Conversation::new(),
            conversations: Vec::new(),
            active_reply: None,
            poller: None,
            updates_tx,
            updates_rx,
        }
    }

    /// The backend this session talks to
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Shared mode table
    #[must_use]
    pub fn modes(&self) -> &Arc<ConversationModeController<B>> {
        &self.modes
    }

    /// Conversation being viewed
    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Last fetched conversation list
    #[must_use]
    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    /// Model recorded on new replies
    #[must_use]
    pub fn current_model(&self) -> Option<&str> {
        self.current_model.as_deref()
    }

    /// Whether a reply stream is in flight
    #[must_use]
    pub fn is_replying(&self) -> bool {
        self.active_reply.is_some()
    }

    /// Whether the viewed conversation is being polled
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    /// Toggle knowledge-base grounding for later sends
    pub fn set_use_knowledge(&mut self, enabled: bool) {
        self.config.use_knowledge = enabled;
    }

    // =========================================================================
    // View lifecycle
    // =========================================================================

    /// Release everything bound to the current view
    pub fn close_view(&mut self) {
        if let Some(mut reply) = self.active_reply.take() {
            reply.cancel(&mut self.conversation);
        }
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
        while self.updates_rx.try_recv().is_ok() {}
    }

    /// Switch to a new, empty chat
    pub fn new_chat(&mut self) {
        self.close_view();
        self.conversation = Conversation::new();
        tracing::debug!("Started new chat");
    }

    /// Load a conversation from the server and start polling it
    ///
    /// # Errors
    ///
    /// Fails if the conversation cannot be fetched. The previous view is
    /// already closed at that point and an empty chat is shown instead.
    pub async fn open_conversation(&mut self, id: &ConversationId) -> Result<(), ChatError> {
        self.new_chat();

        let record = self.backend.get_conversation(id).await?;
        self.modes.observe_record(&record);
        self.conversation = Conversation::from_record(record);
        self.start_polling();

        tracing::info!(
            conversation_id = %id,
            messages = self.conversation.len(),
            mode = ?self.conversation.mode(),
            "Opened conversation"
        );
        Ok(())
    }

    fn start_polling(&mut self) {
        let Some(id) = self.conversation.id().cloned() else {
            return;
        };
        if self.poller.as_ref().is_some_and(|p| *p.conversation_id() == id) {
            return;
        }
        self.poller = Some(ConversationPoller::spawn(
            Arc::clone(&self.backend),
            Arc::clone(&self.modes),
            id,
            self.config.poll_interval,
            self.updates_tx.clone(),
        ));
    }

    // =========================================================================
    // Automatic replies
    // =========================================================================

    /// Send a user message in the viewed conversation
    ///
    /// A reply still streaming from an earlier send is cancelled first.
    pub async fn send_message(&mut self, text: &str) -> SendStatus {
        if let Some(mut reply) = self.active_reply.take() {
            reply.cancel(&mut self.conversation);
        }

        let options = SendOptions {
            use_knowledge: self.config.use_knowledge,
            model: self.current_model.clone(),
        };

        match self.accumulator.send(&mut self.conversation, text, &options).await {
            SendOutcome::Ignored => SendStatus::Ignored,
            SendOutcome::Suppressed {
                conversation_id,
                undelivered,
            } => SendStatus::Suppressed {
                conversation_id,
                undelivered,
            },
            SendOutcome::Streaming(reply) => {
                self.active_reply = Some(reply);
                SendStatus::Streaming
            }
            SendOutcome::Failed(e) => SendStatus::Failed(e),
        }
    }

    /// Apply the next event of the active reply
    ///
    /// Returns `None` when no reply is streaming. When the reply finishes the
    /// conversation list is refreshed.
    pub async fn next_reply_progress(&mut self) -> Option<ReplyProgress> {
        let progress = self.active_reply.as_mut()?.next(&mut self.conversation).await;

        match progress {
            Some(ReplyProgress::Assigned(_)) => self.start_polling(),
            Some(ReplyProgress::Finished(_)) | None => {
                self.active_reply = None;
                if let Err(e) = self.refresh_conversations().await {
                    tracing::warn!(error = %e, "Conversation list refresh failed");
                }
            }
            Some(ReplyProgress::Appended { .. }) => {}
        }
        progress
    }

    /// Drive the active reply to its end
    pub async fn finish_reply(&mut self) -> Option<ReplyOutcome> {
        while let Some(progress) = self.next_reply_progress().await {
            if let ReplyProgress::Finished(outcome) = progress {
                return Some(outcome);
            }
        }
        None
    }

    // =========================================================================
    // Conversation list
    // =========================================================================

    /// Refetch the conversation list
    ///
    /// # Errors
    ///
    /// Fails if the list cannot be fetched; the previous list is kept.
    pub async fn refresh_conversations(&mut self) -> Result<&[ConversationSummary], ChatError> {
        self.conversations = self.backend.list_conversations().await?;
        tracing::debug!(count = self.conversations.len(), "Conversation list refreshed");
        Ok(&self.conversations)
    }

    /// Delete a conversation; a new chat is shown if it was being viewed
    ///
    /// # Errors
    ///
    /// Fails if the service refuses the deletion.
    pub async fn delete_conversation(&mut self, id: &ConversationId) -> Result<(), ChatError> {
        self.backend.delete_conversation(id).await?;
        self.modes.forget(id);
        if self.conversation.id() == Some(id) {
            self.new_chat();
        }
        tracing::info!(conversation_id = %id, "Deleted conversation");

        if let Err(e) = self.refresh_conversations().await {
            tracing::warn!(error = %e, "Conversation list refresh failed");
        }
        Ok(())
    }

    // =========================================================================
    // Manual mode
    // =========================================================================

    fn require_id(&self) -> Result<ConversationId, ChatError> {
        self.conversation.id().cloned().ok_or(ChatError::NoConversation)
    }

    /// Hand the viewed conversation to an operator, or back to automatic
    ///
    /// # Errors
    ///
    /// [`ChatError::NoConversation`] for a chat without identity, or the
    /// service's refusal. The mode is unchanged on error.
    pub async fn set_manual(&mut self, manual: bool) -> Result<(), ChatError> {
        let id = self.require_id()?;
        self.modes.set_mode(&id, manual).await?;
        self.conversation.set_mode(ConversationMode::from_flag(manual));
        Ok(())
    }

    /// Post an operator reply in the viewed conversation and reload it
    ///
    /// A reply still streaming in this view is cancelled first, so no later
    /// fragment lands after the reloaded server copy.
    ///
    /// # Errors
    ///
    /// See [`ConversationModeController::submit_manual_reply`].
    pub async fn submit_manual_reply(&mut self, text: &str) -> Result<(), ChatError> {
        let id = self.require_id()?;
        if let Some(mut reply) = self.active_reply.take() {
            reply.cancel(&mut self.conversation);
        }
        let record = self.modes.submit_manual_reply(&id, text).await?;
        self.conversation.apply_record(record);
        Ok(())
    }

    // =========================================================================
    // Polling
    // =========================================================================

    fn apply_poll_update(&mut self, update: PollUpdate) -> bool {
        if self.conversation.id() != Some(&update.conversation_id) {
            tracing::debug!(conversation_id = %update.conversation_id, "Discarding poll result for another view");
            return false;
        }
        if self.active_reply.is_some() {
            tracing::trace!("Reply streaming, skipping poll result");
            return false;
        }
        self.conversation.apply_record(update.record)
    }

    /// Apply every poll result already received; returns how many were applied
    pub fn apply_poll_updates(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(update) = self.updates_rx.try_recv() {
            if self.apply_poll_update(update) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next poll result and apply it
    ///
    /// Returns `false` immediately when nothing is being polled.
    pub async fn wait_poll_update(&mut self) -> bool {
        if self.poller.is_none() {
            return false;
        }
        match self.updates_rx.recv().await {
            Some(update) => self.apply_poll_update(update),
            None => false,
        }
    }

    // =========================================================================
    // Models
    // =========================================================================

    /// Models offered by the service
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be fetched.
    pub async fn list_models(&mut self) -> Result<ModelCatalog, ChatError> {
        let catalog = self.backend.list_models().await?;
        if let Some(ref current) = catalog.current {
            self.current_model = Some(current.clone());
        }
        Ok(catalog)
    }

    /// Select the model for later replies
    ///
    /// # Errors
    ///
    /// Fails if the service rejects the model.
    pub async fn select_model(&mut self, model: &str) -> Result<(), ChatError> {
        let current = self.backend.select_model(model).await?;
        tracing::info!(model = %current, "Model selected");
        self.current_model = Some(current);
        Ok(())
    }
}

impl<B: ChatBackend + 'static> Drop for ChatSession<B> {
    fn drop(&mut self) {
        self.close_view();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::APOLOGY_MESSAGE;
    use crate::backend::mock::{MockCall, MockChatBackend, MockReply};
    use crate::backend::StreamEvent;
    use crate::messages::{Message, MessageOrigin, ModelInfo};
    use pretty_assertions::assert_eq;

    fn session() -> (Arc<MockChatBackend>, ChatSession<MockChatBackend>) {
        let backend = Arc::new(MockChatBackend::new());
        let session = ChatSession::new(Arc::clone(&backend), ClientConfig::default());
        (backend, session)
    }

    #[tokio::test]
    async fn test_send_streams_and_refreshes_list() {
        let (backend, mut session) = session();
        backend.script_reply(MockReply::fragments(Some("c1"), &["Hi", " there"]));

        assert!(matches!(session.send_message("hello").await, SendStatus::Streaming));
        let outcome = session.finish_reply().await;

        assert_eq!(
            outcome,
            Some(ReplyOutcome::Completed {
                conversation_id: Some(ConversationId::new("c1"))
            })
        );
        assert_eq!(session.conversation().last().unwrap().content, "Hi there");
        assert!(!session.is_replying());
        assert!(session.is_polling());
        assert_eq!(session.conversations().len(), 1);
        assert_eq!(session.conversations()[0].id, ConversationId::new("c1"));
        assert_eq!(backend.calls().last(), Some(&MockCall::ListConversations));
    }

    #[tokio::test]
    async fn test_blank_send_is_ignored() {
        let (backend, mut session) = session();
        assert!(matches!(session.send_message("  ").await, SendStatus::Ignored));
        assert!(session.conversation().is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_shows_apology() {
        let (backend, mut session) = session();
        backend.script_reply(MockReply::ConnectFailure);

        assert!(matches!(session.send_message("hello").await, SendStatus::Failed(_)));
        assert_eq!(session.conversation().last().unwrap().content, APOLOGY_MESSAGE);
        assert!(!session.is_replying());
    }

    #[tokio::test]
    async fn test_switching_conversation_cancels_stream() {
        let (backend, mut session) = session();
        backend.seed_conversation("c2", false);
        backend.script_reply(MockReply::Hold(vec![
            StreamEvent::ConversationAssigned(ConversationId::new("c1")),
            StreamEvent::Fragment("partial".to_string()),
        ]));

        session.send_message("hello").await;
        session.next_reply_progress().await;
        session.next_reply_progress().await;
        assert!(session.is_replying());

        session.open_conversation(&ConversationId::new("c2")).await.unwrap();

        assert!(!session.is_replying());
        assert!(backend.held_streams_released());
        assert_eq!(session.conversation().id(), Some(&ConversationId::new("c2")));
        assert!(session.conversation().is_empty());
        assert_eq!(session.next_reply_progress().await, None);
    }

    #[tokio::test]
    async fn test_new_chat_cancels_polling() {
        let (backend, mut session) = session();
        backend.seed_conversation("c1", false);

        session.open_conversation(&ConversationId::new("c1")).await.unwrap();
        assert!(session.is_polling());

        session.new_chat();
        assert!(!session.is_polling());
        assert_eq!(session.conversation().id(), None);
        assert!(!session.wait_poll_update().await);
    }

    #[tokio::test]
    async fn test_stale_poll_results_are_discarded() {
        let (backend, mut session) = session();
        backend.seed_conversation("c1", false);
        backend.seed_conversation("c2", false);
        backend.append_server_message("c1", Message::user("from c1"));

        session.open_conversation(&ConversationId::new("c2")).await.unwrap();
        session
            .updates_tx
            .send(PollUpdate {
                conversation_id: ConversationId::new("c1"),
                record: backend.conversation("c1").unwrap(),
            })
            .await
            .unwrap();

        assert_eq!(session.apply_poll_updates(), 0);
        assert!(session.conversation().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_brings_in_operator_reply() {
        let (backend, mut session) = session();
        backend.seed_conversation("c1", false);
        session.open_conversation(&ConversationId::new("c1")).await.unwrap();

        backend.append_server_message("c1", Message::bot("operator here", MessageOrigin::Manual));

        assert!(session.wait_poll_update().await);
        assert_eq!(session.conversation().len(), 1);
        assert!(session.conversation().messages()[0].is_manual_reply());
    }

    #[tokio::test]
    async fn test_manual_mode_round_trip() {
        let (backend, mut session) = session();
        backend.seed_conversation("c1", false);
        session.open_conversation(&ConversationId::new("c1")).await.unwrap();

        session.set_manual(true).await.unwrap();
        assert!(session.conversation().mode().is_manual());

        let status = session.send_message("is anyone there?").await;
        assert!(matches!(status, SendStatus::Suppressed { .. }));
        assert!(backend.chat_requests().is_empty());

        session.submit_manual_reply("ok").await.unwrap();
        let last = session.conversation().last().unwrap();
        assert_eq!(last.content, "ok");
        assert!(last.is_manual_reply());

        session.set_manual(false).await.unwrap();
        assert!(!session.conversation().mode().is_manual());
    }

    #[tokio::test]
    async fn test_manual_reply_cancels_streaming_reply() {
        let (backend, mut session) = session();
        backend.seed_conversation("c1", false);
        session.open_conversation(&ConversationId::new("c1")).await.unwrap();
        backend.script_reply(MockReply::Hold(vec![StreamEvent::Fragment("par".to_string())]));

        session.send_message("hello").await;
        session.next_reply_progress().await;
        assert!(session.is_replying());

        session.set_manual(true).await.unwrap();
        session.submit_manual_reply("operator here").await.unwrap();

        assert!(!session.is_replying());
        assert!(backend.held_streams_released());
        assert_eq!(session.next_reply_progress().await, None);
        let server = backend.conversation("c1").unwrap();
        assert_eq!(session.conversation().messages(), server.messages.as_slice());
        assert!(session.conversation().last().unwrap().is_manual_reply());
    }

    #[tokio::test]
    async fn test_refused_send_returns_text() {
        let (backend, mut session) = session();
        backend.seed_conversation("c1", false);
        session.open_conversation(&ConversationId::new("c1")).await.unwrap();
        backend.script_reply(MockReply::ManualMode);

        match session.send_message("are you there?").await {
            SendStatus::Suppressed {
                conversation_id,
                undelivered,
            } => {
                assert_eq!(conversation_id, ConversationId::new("c1"));
                assert_eq!(undelivered, "are you there?");
            }
            other => panic!("expected suppression, got {other:?}"),
        }
        assert!(session.conversation().is_empty());
        assert!(session.conversation().mode().is_manual());
        assert!(!session.is_replying());
    }

    #[tokio::test]
    async fn test_manual_actions_need_identity() {
        let (_, mut session) = session();
        assert!(matches!(
            session.set_manual(true).await,
            Err(ChatError::NoConversation)
        ));
        assert!(matches!(
            session.submit_manual_reply("ok").await,
            Err(ChatError::NoConversation)
        ));
    }

    #[tokio::test]
    async fn test_failed_mode_switch_keeps_view() {
        let (backend, mut session) = session();
        backend.seed_conversation("c1", false);
        session.open_conversation(&ConversationId::new("c1")).await.unwrap();
        backend.fail_mode_changes(true);

        assert!(session.set_manual(true).await.is_err());
        assert!(!session.conversation().mode().is_manual());
        assert!(!session.modes().is_manual(&ConversationId::new("c1")));
    }

    #[tokio::test]
    async fn test_deleting_open_conversation_starts_new_chat() {
        let (backend, mut session) = session();
        backend.seed_conversation("c1", false);
        backend.seed_conversation("c2", false);
        session.open_conversation(&ConversationId::new("c1")).await.unwrap();

        session.delete_conversation(&ConversationId::new("c1")).await.unwrap();

        assert_eq!(session.conversation().id(), None);
        assert!(!session.is_polling());
        let ids: Vec<&str> = session.conversations().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2"]);
    }

    #[tokio::test]
    async fn test_selected_model_is_recorded_on_replies() {
        let (backend, mut session) = session();
        backend.set_models(ModelCatalog {
            models: vec![ModelInfo {
                name: "qwen".to_string(),
                kind: "ollama".to_string(),
            }],
            current: None,
        });
        backend.script_reply(MockReply::fragments(None, &["ok"]));

        assert!(session.select_model("missing").await.is_err());
        session.select_model("qwen").await.unwrap();
        assert_eq!(session.current_model(), Some("qwen"));

        session.send_message("hi").await;
        session.finish_reply().await;
        assert_eq!(session.conversation().last().unwrap().model.as_deref(), Some("qwen"));
    }
}
