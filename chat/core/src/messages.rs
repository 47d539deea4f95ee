//! Chat Messages
//!
//! Identifier, message and record types shared by every part of the client.
//!
//! # Wire Compatibility
//!
//! The serde layout of these types is the JSON the chat service stores and
//! returns, so records fetched from `GET /conversations/{id}` deserialize
//! directly into [`ConversationRecord`] and the messages inside it can be
//! appended to a local [`Conversation`](crate::conversation::Conversation)
//! without translation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Message identifier
///
/// Derived from the creation time in milliseconds. Identifiers minted by this
/// process are strictly increasing, even when several are created within the
/// same millisecond.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Mint a new identifier from the current time
    #[must_use]
    pub fn new() -> Self {
        static LAST: AtomicU64 = AtomicU64::new(0);

        let now = now_ms();
        let mut prev = LAST.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match LAST.compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::Relaxed) {
                Ok(_) => return Self(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation identifier
///
/// Assigned by the chat service; the client never invents one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Wrap a server-assigned identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Who authored a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The person chatting
    User,
    /// The assistant, whether automatic or an operator speaking for it
    Bot,
}

/// Which reply path produced a bot message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageOrigin {
    /// Streamed from the completion backend
    Automatic,
    /// Typed by a human operator
    Manual,
}

/// A single chat message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Creation-time derived identifier
    pub id: MessageId,
    /// Author
    #[serde(rename = "type")]
    pub role: MessageRole,
    /// Text content
    pub content: String,
    /// Wall-clock creation time (`HH:MM:SS`, local time)
    #[serde(default)]
    pub timestamp: String,
    /// Model that produced a bot reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Origin tag; absent on user messages and on records that predate tagging
    #[serde(rename = "isManual", default, skip_serializing_if = "Option::is_none")]
    pub is_manual: Option<bool>,
}

impl Message {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::User,
            content: content.into(),
            timestamp: clock_time(),
            model: None,
            is_manual: None,
        }
    }

    /// Create a bot message with an origin tag
    pub fn bot(content: impl Into<String>, origin: MessageOrigin) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::Bot,
            content: content.into(),
            timestamp: clock_time(),
            model: None,
            is_manual: Some(origin == MessageOrigin::Manual),
        }
    }

    /// Record the model that produced this message
    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Origin tag, if the message carries one
    #[must_use]
    pub fn origin(&self) -> Option<MessageOrigin> {
        self.is_manual.map(|manual| {
            if manual {
                MessageOrigin::Manual
            } else {
                MessageOrigin::Automatic
            }
        })
    }

    /// Whether this is a bot reply typed by an operator
    #[must_use]
    pub fn is_manual_reply(&self) -> bool {
        self.role == MessageRole::Bot && self.is_manual == Some(true)
    }
}

/// Conversation entry in the list view
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// Conversation identifier
    pub id: ConversationId,
    /// Title derived by the server from the first (or latest) user message
    #[serde(default)]
    pub title: String,
    /// Last update (ISO 8601, server clock)
    #[serde(default)]
    pub updated_at: String,
}

/// Authoritative server copy of a conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// Conversation identifier
    pub id: ConversationId,
    /// Title (absent on widget-channel conversations)
    #[serde(default)]
    pub title: Option<String>,
    /// Full message history
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Creation time (ISO 8601, server clock)
    #[serde(default)]
    pub created_at: String,
    /// Last update (ISO 8601, server clock)
    #[serde(default)]
    pub updated_at: String,
    /// Whether an operator has taken over
    #[serde(default)]
    pub is_manual_mode: bool,
}

/// A model the chat service can answer with
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier
    pub name: String,
    /// Provider family (e.g. `ollama`, `baidu`)
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Response of `GET /models`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    /// Available models
    #[serde(default)]
    pub models: Vec<ModelInfo>,
    /// Model currently selected on the server
    #[serde(default)]
    pub current: Option<String>,
}

/// Milliseconds since the Unix epoch
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Local wall-clock time in the format the service uses for messages
fn clock_time() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_message_ids_strictly_increase() {
        let ids: Vec<MessageId> = (0..1000).map(|_| MessageId::new()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_message_id_is_time_derived() {
        let before = now_ms();
        let id = MessageId::new();
        assert!(id.0 >= before);
    }

    #[test]
    fn test_user_message_has_no_origin() {
        let msg = Message::user("hello");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.origin(), None);
        assert!(!msg.is_manual_reply());
    }

    #[test]
    fn test_bot_message_origin() {
        let auto = Message::bot("hi", MessageOrigin::Automatic);
        let manual = Message::bot("hi", MessageOrigin::Manual);
        assert_eq!(auto.origin(), Some(MessageOrigin::Automatic));
        assert_eq!(manual.origin(), Some(MessageOrigin::Manual));
        assert!(manual.is_manual_reply());
        assert!(!auto.is_manual_reply());
    }

    #[test]
    fn test_message_deserializes_server_shape() {
        let json = r#"{
            "id": 1718000000123,
            "type": "bot",
            "content": "operator here",
            "timestamp": "10:15:02",
            "isManual": true
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, MessageId(1_718_000_000_123));
        assert_eq!(msg.role, MessageRole::Bot);
        assert!(msg.is_manual_reply());
        assert_eq!(msg.model, None);
    }

    #[test]
    fn test_message_serializes_type_field() {
        let msg = Message::user("hey");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "user");
        assert!(value.get("isManual").is_none());
        assert!(value.get("model").is_none());
    }

    #[test]
    fn test_record_defaults_missing_fields() {
        let json = r#"{"id": "sdk_20240101120000", "messages": [], "updatedAt": "x"}"#;
        let record: ConversationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id.as_str(), "sdk_20240101120000");
        assert_eq!(record.title, None);
        assert!(!record.is_manual_mode);
    }

    #[test]
    fn test_model_catalog_deserializes() {
        let json = r#"{"models":[{"name":"mistral","type":"ollama"}],"current":"mistral"}"#;
        let catalog: ModelCatalog = serde_json::from_str(json).unwrap();
        assert_eq!(catalog.models.len(), 1);
        assert_eq!(catalog.models[0].kind, "ollama");
        assert_eq!(catalog.current.as_deref(), Some("mistral"));
    }
}
