//! Conversation Polling
//!
//! While a conversation is open for viewing, its server copy is refetched on
//! a fixed period so replies entered elsewhere (an operator console, another
//! tab) show up. Each fetch is forwarded to the host as a [`PollUpdate`] and
//! the mode it carries is recorded in the shared
//! [`ConversationModeController`].
//!
//! The polling task is bound to a [`PollHandle`]. Cancelling or dropping the
//! handle stops the task at its next suspension point, including in the middle
//! of a fetch, so a slow response for an old view is never delivered after the
//! view changed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backend::ChatBackend;
use crate::messages::{ConversationId, ConversationRecord};
use crate::mode::ConversationModeController;

/// A fresh server copy of the polled conversation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollUpdate {
    /// Conversation that was polled
    pub conversation_id: ConversationId,
    /// Server copy at the time of the fetch
    pub record: ConversationRecord,
}

/// Spawns polling tasks
pub struct ConversationPoller;

impl ConversationPoller {
    /// Start polling `conversation_id` every `period`
    ///
    /// The first fetch happens one period after the call. Updates are sent to
    /// `updates` until the handle is cancelled or the receiver is dropped.
    pub fn spawn<B>(
        backend: Arc<B>,
        modes: Arc<ConversationModeController<B>>,
        conversation_id: ConversationId,
        period: Duration,
        updates: mpsc::Sender<PollUpdate>,
    ) -> PollHandle
    where
        B: ChatBackend + 'static,
    {
        let token = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            backend,
            modes,
            conversation_id.clone(),
            period,
            updates,
            token.clone(),
        ));

        tracing::debug!(conversation_id = %conversation_id, period = ?period, "Polling started");

        PollHandle {
            conversation_id,
            token,
            task: Some(task),
        }
    }
}

async fn poll_loop<B>(
    backend: Arc<B>,
    modes: Arc<ConversationModeController<B>>,
    conversation_id: ConversationId,
    period: Duration,
    updates: mpsc::Sender<PollUpdate>,
    token: CancellationToken,
) where
    B: ChatBackend + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            () = token.cancelled() => break,
            fetched = backend.get_conversation(&conversation_id) => fetched,
        };

        let record = match fetched {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Conversation refresh failed");
                continue;
            }
        };

        if token.is_cancelled() {
            break;
        }
        modes.observe_record(&record);

        let update = PollUpdate {
            conversation_id: conversation_id.clone(),
            record,
        };
        tokio::select! {
            () = token.cancelled() => break,
            sent = updates.send(update) => {
                if sent.is_err() {
                    tracing::debug!(conversation_id = %conversation_id, "Poll receiver dropped");
                    break;
                }
            }
        }
    }

    tracing::debug!(conversation_id = %conversation_id, "Polling stopped");
}

/// Owner of a running polling task
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct PollHandle {
    conversation_id: ConversationId,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Conversation being polled
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Whether the task has been told to stop
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal the task to stop
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and wait for the task to exit
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(conversation_id = %self.conversation_id, error = %e, "Polling task panicked");
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
