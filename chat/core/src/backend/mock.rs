//! Scripted Mock Backend
//!
//! An in-memory [`ChatBackend`] for exercising the accumulator, the mode
//! controller and the session without a running chat service.
//!
//! # Usage
//!
//! ```ignore
//! use chat_core::backend::mock::{MockChatBackend, MockReply};
//!
//! let backend = MockChatBackend::new();
//! backend.script_reply(MockReply::fragments(Some("c1"), &["Hi", " there"]));
//!
//! // Simulate the service refusing a mode switch
//! backend.fail_mode_changes(true);
//!
//! // After the test, inspect what the client asked for
//! assert_eq!(backend.chat_requests().len(), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::traits::{ChatBackend, ChatRequest};
use crate::error::ChatError;
use crate::messages::{
    ConversationId, ConversationRecord, ConversationSummary, Message, MessageOrigin, ModelCatalog,
    ModelInfo,
};
use crate::sse::StreamEvent;

/// Scripted answer to the next `send_streaming` call
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Deliver these events, then close the stream
    Events(Vec<StreamEvent>),
    /// Deliver these events and keep the stream open until the receiver is dropped
    Hold(Vec<StreamEvent>),
    /// Fail to open the stream
    ConnectFailure,
    /// Refuse because an operator owns the conversation; the stored record
    /// is switched to manual and nothing is stored
    ManualMode,
}

impl MockReply {
    /// Identity assignment (if any) followed by one fragment per entry
    #[must_use]
    pub fn fragments(conversation_id: Option<&str>, fragments: &[&str]) -> Self {
        let mut events = Vec::new();
        if let Some(id) = conversation_id {
            events.push(StreamEvent::ConversationAssigned(ConversationId::new(id)));
        }
        events.extend(fragments.iter().map(|f| StreamEvent::Fragment((*f).to_string())));
        Self::Events(events)
    }
}

/// A call observed by the mock
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockCall {
    /// `send_streaming`
    Chat(ChatRequest),
    /// `list_conversations`
    ListConversations,
    /// `get_conversation`
    GetConversation(ConversationId),
    /// `delete_conversation`
    DeleteConversation(ConversationId),
    /// `set_mode`
    SetMode(ConversationId, bool),
    /// `post_manual_reply`
    ManualReply(ConversationId, String),
    /// `list_models`
    ListModels,
    /// `select_model`
    SelectModel(String),
}

/// In-memory chat service
#[derive(Debug, Default)]
pub struct MockChatBackend {
    replies: Mutex<VecDeque<MockReply>>,
    conversations: Mutex<HashMap<ConversationId, ConversationRecord>>,
    calls: Mutex<Vec<MockCall>>,
    held: Mutex<Vec<mpsc::Sender<StreamEvent>>>,
    models: Mutex<ModelCatalog>,
    fail_mode_changes: AtomicBool,
    fail_manual_replies: AtomicBool,
    fail_reads: AtomicBool,
}

impl MockChatBackend {
    /// Create an empty mock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer to the next `send_streaming` call
    pub fn script_reply(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    /// Store a conversation as the service's authoritative copy
    pub fn insert_conversation(&self, record: ConversationRecord) {
        self.conversations.lock().insert(record.id.clone(), record);
    }

    /// Seed an empty conversation with a given mode
    pub fn seed_conversation(&self, id: &str, manual: bool) {
        self.insert_conversation(ConversationRecord {
            id: ConversationId::new(id),
            title: Some(id.to_string()),
            messages: Vec::new(),
            created_at: String::new(),
            updated_at: String::new(),
            is_manual_mode: manual,
        });
    }

    /// Current server copy of a conversation
    #[must_use]
    pub fn conversation(&self, id: &str) -> Option<ConversationRecord> {
        self.conversations.lock().get(&ConversationId::new(id)).cloned()
    }

    /// Append a message server-side, as another client would
    pub fn append_server_message(&self, id: &str, message: Message) {
        if let Some(record) = self.conversations.lock().get_mut(&ConversationId::new(id)) {
            record.messages.push(message);
        }
    }

    /// Make `set_mode` fail with a server error
    pub fn fail_mode_changes(&self, fail: bool) {
        self.fail_mode_changes.store(fail, Ordering::SeqCst);
    }

    /// Make `post_manual_reply` fail with a server error
    pub fn fail_manual_replies(&self, fail: bool) {
        self.fail_manual_replies.store(fail, Ordering::SeqCst);
    }

    /// Make `get_conversation` and `list_conversations` fail
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Replace the model catalog
    pub fn set_models(&self, catalog: ModelCatalog) {
        *self.models.lock() = catalog;
    }

    /// Every call observed so far
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Requests passed to `send_streaming`
    #[must_use]
    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::Chat(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of `get_conversation` calls for `id`
    #[must_use]
    pub fn fetch_count(&self, id: &str) -> usize {
        let id = ConversationId::new(id);
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, MockCall::GetConversation(c) if *c == id))
            .count()
    }

    /// Whether every held stream has been released by its receiver
    #[must_use]
    pub fn held_streams_released(&self) -> bool {
        self.held.lock().iter().all(mpsc::Sender::is_closed)
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    fn server_error() -> ChatError {
        ChatError::Status {
            status: 500,
            body: "simulated failure".to_string(),
        }
    }

    fn not_found() -> ChatError {
        ChatError::Status {
            status: 404,
            body: "conversation not found".to_string(),
        }
    }

    /// Mirror a scripted reply into the store the way the service would
    fn store_exchange(&self, request: &ChatRequest, events: &[StreamEvent]) {
        let assigned = events.iter().find_map(|event| match event {
            StreamEvent::ConversationAssigned(id) => Some(id.clone()),
            _ => None,
        });
        let Some(id) = request.conversation_id.clone().or(assigned) else {
            return;
        };
        let reply: String = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Fragment(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();

        let mut conversations = self.conversations.lock();
        let record = conversations.entry(id.clone()).or_insert_with(|| ConversationRecord {
            id,
            title: Some(request.message.chars().take(20).collect()),
            messages: Vec::new(),
            created_at: String::new(),
            updated_at: String::new(),
            is_manual_mode: false,
        });
        record.messages.push(Message::user(request.message.clone()));
        record.messages.push(Message::bot(reply, MessageOrigin::Automatic));
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn send_streaming(
        &self,
        request: &ChatRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ChatError> {
        self.record(MockCall::Chat(request.clone()));

        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or(MockReply::Events(Vec::new()));

        let (events, hold) = match reply {
            MockReply::Events(events) => (events, false),
            MockReply::Hold(events) => (events, true),
            MockReply::ConnectFailure => return Err(Self::server_error()),
            MockReply::ManualMode => {
                let id = request.conversation_id.clone().unwrap_or_else(|| ConversationId::new(""));
                if let Some(record) = self.conversations.lock().get_mut(&id) {
                    record.is_manual_mode = true;
                }
                return Err(ChatError::ManualModeActive(id));
            }
        };

        if !hold {
            self.store_exchange(request, &events);
        }

        let (tx, rx) = mpsc::channel(events.len() + 1);
        for event in events {
            let _ = tx.try_send(event);
        }
        if hold {
            self.held.lock().push(tx);
        }
        Ok(rx)
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        self.record(MockCall::ListConversations);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::server_error());
        }
        let mut summaries: Vec<ConversationSummary> = self
            .conversations
            .lock()
            .values()
            .map(|record| ConversationSummary {
                id: record.id.clone(),
                title: record.title.clone().unwrap_or_default(),
                updated_at: record.updated_at.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.0.cmp(&b.id.0)));
        Ok(summaries)
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<ConversationRecord, ChatError> {
        self.record(MockCall::GetConversation(id.clone()));
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::server_error());
        }
        self.conversations
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), ChatError> {
        self.record(MockCall::DeleteConversation(id.clone()));
        self.conversations
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(Self::not_found)
    }

    async fn set_mode(&self, id: &ConversationId, manual: bool) -> Result<(), ChatError> {
        self.record(MockCall::SetMode(id.clone(), manual));
        if self.fail_mode_changes.load(Ordering::SeqCst) {
            return Err(Self::server_error());
        }
        let mut conversations = self.conversations.lock();
        let record = conversations.get_mut(id).ok_or_else(Self::not_found)?;
        record.is_manual_mode = manual;
        Ok(())
    }

    async fn post_manual_reply(
        &self,
        id: &ConversationId,
        text: &str,
    ) -> Result<Message, ChatError> {
        self.record(MockCall::ManualReply(id.clone(), text.to_string()));
        if self.fail_manual_replies.load(Ordering::SeqCst) {
            return Err(Self::server_error());
        }
        let mut conversations = self.conversations.lock();
        let record = conversations.get_mut(id).ok_or_else(Self::not_found)?;
        let message = Message::bot(text, MessageOrigin::Manual);
        record.messages.push(message.clone());
        Ok(message)
    }

    async fn list_models(&self) -> Result<ModelCatalog, ChatError> {
        self.record(MockCall::ListModels);
        Ok(self.models.lock().clone())
    }

    async fn select_model(&self, model: &str) -> Result<String, ChatError> {
        self.record(MockCall::SelectModel(model.to_string()));
        let mut catalog = self.models.lock();
        if !catalog.models.iter().any(|m: &ModelInfo| m.name == model) {
            return Err(ChatError::Status {
                status: 400,
                body: "model unavailable".to_string(),
            });
        }
        catalog.current = Some(model.to_string());
        Ok(model.to_string())
    }
}
