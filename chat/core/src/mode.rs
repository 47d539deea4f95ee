//! Conversation Mode Control
//!
//! Tracks, per conversation, whether replies come from the automatic stream
//! or from a human operator, and arbitrates which reply path is active.
//!
//! # State Machine
//!
//! ```text
//!            set_mode(id, true)
//!  Automatic ──────────────────▶ Manual
//!      ▲                           │
//!      └───────────────────────────┘
//!            set_mode(id, false)
//! ```
//!
//! Both states can be initial: the mode is read from the server copy when a
//! conversation is loaded ([`ConversationModeController::observe`]). There is
//! no terminal state.
//!
//! Local state only changes after the service confirms a switch. Manual
//! replies are never synthesized locally; the controller posts them and then
//! reloads the server copy so the view matches what the service recorded.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::ChatBackend;
use crate::conversation::ConversationMode;
use crate::error::ChatError;
use crate::messages::{ConversationId, ConversationRecord};

/// Per-conversation reply mode, shared by the accumulator and the host
pub struct ConversationModeController<B> {
    backend: Arc<B>,
    modes: RwLock<HashMap<ConversationId, ConversationMode>>,
}

impl<B: ChatBackend> ConversationModeController<B> {
    /// Create a controller with no recorded modes
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            modes: RwLock::new(HashMap::new()),
        }
    }

    /// Current local mode; conversations never seen are automatic
    #[must_use]
    pub fn mode(&self, id: &ConversationId) -> ConversationMode {
        self.modes.read().get(id).copied().unwrap_or_default()
    }

    /// Whether an operator owns the conversation
    #[must_use]
    pub fn is_manual(&self, id: &ConversationId) -> bool {
        self.mode(id).is_manual()
    }

    /// Record a mode reported by the service
    pub fn observe(&self, id: &ConversationId, mode: ConversationMode) {
        let previous = self.modes.write().insert(id.clone(), mode);
        if previous.is_some_and(|p| p != mode) {
            tracing::info!(conversation_id = %id, mode = ?mode, "Conversation mode changed remotely");
        }
    }

    /// Record the mode carried by a server copy
    pub fn observe_record(&self, record: &ConversationRecord) {
        self.observe(&record.id, ConversationMode::from_flag(record.is_manual_mode));
    }

    /// Drop local state for a deleted conversation
    pub fn forget(&self, id: &ConversationId) {
        self.modes.write().remove(id);
    }

    /// Ask the service to switch modes; local state follows only on success
    ///
    /// # Errors
    ///
    /// Returns the service's error unchanged; the local mode is untouched.
    pub async fn set_mode(&self, id: &ConversationId, manual: bool) -> Result<(), ChatError> {
        if let Err(e) = self.backend.set_mode(id, manual).await {
            tracing::warn!(conversation_id = %id, manual, error = %e, "Mode switch rejected");
            return Err(e);
        }

        self.modes
            .write()
            .insert(id.clone(), ConversationMode::from_flag(manual));
        tracing::info!(conversation_id = %id, manual, "Conversation mode switched");
        Ok(())
    }

    /// Flip the current mode; returns the new mode
    ///
    /// # Errors
    ///
    /// Same as [`set_mode`](Self::set_mode).
    pub async fn toggle(&self, id: &ConversationId) -> Result<ConversationMode, ChatError> {
        let manual = !self.is_manual(id);
        self.set_mode(id, manual).await?;
        Ok(ConversationMode::from_flag(manual))
    }

    /// Post an operator reply and return the reconciled server copy
    ///
    /// # Errors
    ///
    /// - [`ChatError::EmptyMessage`] for blank text
    /// - [`ChatError::NotManual`] if the conversation is automatic
    /// - the service's error if posting or reloading fails
    pub async fn submit_manual_reply(
        &self,
        id: &ConversationId,
        text: &str,
    ) -> Result<ConversationRecord, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if !self.is_manual(id) {
            return Err(ChatError::NotManual(id.clone()));
        }

        let stored = self.backend.post_manual_reply(id, text).await?;
        tracing::debug!(conversation_id = %id, message_id = %stored.id, "Manual reply recorded");

        let record = self.backend.get_conversation(id).await?;
        self.observe_record(&record);
        Ok(record)
    }
}
