//! Conversation State
//!
//! A client-side conversation: an append-only message log plus at most one
//! "open" bot message at the tail that a reply stream may still extend.
//!
//! # Invariants
//!
//! - Messages are never reordered or removed locally. The only wholesale
//!   replacement is [`Conversation::apply_record`], which adopts the server's
//!   authoritative copy.
//! - At most one message is open for streaming. It is always the last element
//!   and always has role [`MessageRole::Bot`].
//! - Appending anything else freezes the open message first, so content is
//!   immutable once a message stops being the streaming target.
//! - The conversation identity is assign-once.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::messages::{
    ConversationId, ConversationRecord, Message, MessageId, MessageOrigin, MessageRole,
};

/// Who answers the conversation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    /// Replies are streamed from the completion backend
    #[default]
    Automatic,
    /// A human operator replies
    Manual,
}

impl ConversationMode {
    /// Map the service's `isManual` flag to a mode
    #[must_use]
    pub fn from_flag(manual: bool) -> Self {
        if manual {
            Self::Manual
        } else {
            Self::Automatic
        }
    }

    /// Whether an operator owns the conversation
    #[must_use]
    pub fn is_manual(self) -> bool {
        self == Self::Manual
    }
}

/// A conversation as seen by one client view
#[derive(Clone, Debug)]
pub struct Conversation {
    id: Option<ConversationId>,
    title: Option<String>,
    messages: Vec<Message>,
    /// Whether the last message is open for streaming
    streaming: bool,
    mode: ConversationMode,
    updated_at: NaiveDateTime,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// Start a new conversation with no identity yet
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: None,
            title: None,
            messages: Vec::new(),
            streaming: false,
            mode: ConversationMode::Automatic,
            updated_at: local_now(),
        }
    }

    /// Build a view from the server's copy
    #[must_use]
    pub fn from_record(record: ConversationRecord) -> Self {
        let mut conversation = Self::new();
        conversation.apply_record(record);
        conversation
    }

    /// Conversation identity, once assigned
    #[must_use]
    pub fn id(&self) -> Option<&ConversationId> {
        self.id.as_ref()
    }

    /// Assign the identity if none is set yet
    ///
    /// Returns `true` if the identity was assigned by this call. Later
    /// assignments are ignored.
    pub fn assign_id(&mut self, id: ConversationId) -> bool {
        if self.id.is_some() {
            return false;
        }
        self.id = Some(id);
        true
    }

    /// Server-side title, if known
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Message history, oldest first
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation has no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Most recent message
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Current reply mode
    #[must_use]
    pub fn mode(&self) -> ConversationMode {
        self.mode
    }

    /// Record the reply mode
    pub fn set_mode(&mut self, mode: ConversationMode) {
        self.mode = mode;
    }

    /// Last local or server update
    #[must_use]
    pub fn updated_at(&self) -> NaiveDateTime {
        self.updated_at
    }

    /// Whether a bot message is open for streaming
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// The message currently being streamed, if any
    #[must_use]
    pub fn streaming_message(&self) -> Option<&Message> {
        if self.streaming {
            self.messages.last()
        } else {
            None
        }
    }

    /// Append a user message, freezing any open reply first
    pub fn push_user(&mut self, content: impl Into<String>) -> MessageId {
        self.push(Message::user(content))
    }

    /// Append a complete message, freezing any open reply first
    pub fn push(&mut self, message: Message) -> MessageId {
        self.complete_streaming();
        let id = message.id;
        self.messages.push(message);
        self.touch();
        id
    }

    /// Open an empty automatic bot reply at the tail
    pub fn open_reply(&mut self, model: Option<String>) -> MessageId {
        self.complete_streaming();
        let message = Message::bot(String::new(), MessageOrigin::Automatic).with_model(model);
        let id = message.id;
        self.messages.push(message);
        self.streaming = true;
        self.touch();
        id
    }

    /// Append text to the open reply
    ///
    /// Returns the updated message, or `None` if no reply is open.
    pub fn append_streaming(&mut self, text: &str) -> Option<&Message> {
        if !self.streaming {
            return None;
        }
        let message = self.messages.last_mut()?;
        debug_assert_eq!(message.role, MessageRole::Bot);
        message.content.push_str(text);
        self.updated_at = local_now();
        self.messages.last()
    }

    /// Freeze the open reply
    ///
    /// Returns the frozen message, or `None` if nothing was open.
    pub fn complete_streaming(&mut self) -> Option<&Message> {
        if !self.streaming {
            return None;
        }
        self.streaming = false;
        self.messages.last()
    }

    /// Replace the open reply with `text` and freeze it
    ///
    /// When no reply is open a new bot message carrying `text` is appended,
    /// so a failure is always visible at the tail.
    pub fn fail_streaming(&mut self, text: &str) -> MessageId {
        if self.streaming {
            if let Some(message) = self.messages.last_mut() {
                message.content.clear();
                message.content.push_str(text);
                let id = message.id;
                self.streaming = false;
                self.touch();
                return id;
            }
        }
        self.push(Message::bot(text, MessageOrigin::Automatic))
    }

    /// Adopt the server's authoritative copy
    ///
    /// Returns `false` and leaves the view untouched when the record belongs
    /// to a different conversation.
    pub fn apply_record(&mut self, record: ConversationRecord) -> bool {
        if let Some(ref id) = self.id {
            if *id != record.id {
                return false;
            }
        }
        self.id = Some(record.id);
        if record.title.is_some() {
            self.title = record.title;
        }
        self.messages = record.messages;
        self.streaming = false;
        self.mode = ConversationMode::from_flag(record.is_manual_mode);
        self.updated_at = parse_server_time(&record.updated_at).unwrap_or_else(local_now);
        true
    }

    /// Indices where an operator took over from the automatic path
    ///
    /// A handover point is a manual bot reply (not the first message) whose
    /// preceding bot reply was not manual. Renderers draw a separator before
    /// each of these.
    #[must_use]
    pub fn handover_points(&self) -> Vec<usize> {
        let mut points = Vec::new();
        let mut previous_bot_manual = false;
        for (idx, message) in self.messages.iter().enumerate() {
            if message.role != MessageRole::Bot {
                continue;
            }
            let manual = message.is_manual_reply();
            if manual && !previous_bot_manual && idx > 0 {
                points.push(idx);
            }
            previous_bot_manual = manual;
        }
        points
    }

    fn touch(&mut self) {
        self.updated_at = local_now();
    }
}

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Parse the service's `isoformat()` timestamps
fn parse_server_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(id: &str, messages: Vec<Message>, manual: bool) -> ConversationRecord {
        ConversationRecord {
            id: ConversationId::new(id),
            title: Some("title".to_string()),
            messages,
            created_at: "2024-05-01T10:00:00.000001".to_string(),
            updated_at: "2024-05-01T10:05:00.5".to_string(),
            is_manual_mode: manual,
        }
    }

    #[test]
    fn test_new_conversation_is_empty_and_automatic() {
        let conv = Conversation::new();
        assert!(conv.id().is_none());
        assert!(conv.is_empty());
        assert_eq!(conv.mode(), ConversationMode::Automatic);
        assert!(!conv.is_streaming());
    }

    #[test]
    fn test_assign_id_once() {
        let mut conv = Conversation::new();
        assert!(conv.assign_id(ConversationId::new("c1")));
        assert!(!conv.assign_id(ConversationId::new("c2")));
        assert_eq!(conv.id().map(ConversationId::as_str), Some("c1"));
    }

    #[test]
    fn test_streaming_append_and_complete() {
        let mut conv = Conversation::new();
        conv.push_user("hello");
        conv.open_reply(Some("mistral".to_string()));
        conv.append_streaming("Hi");
        conv.append_streaming(" there");

        let open = conv.streaming_message().unwrap();
        assert_eq!(open.content, "Hi there");
        assert_eq!(open.model.as_deref(), Some("mistral"));
        assert_eq!(open.origin(), Some(MessageOrigin::Automatic));

        let frozen = conv.complete_streaming().unwrap();
        assert_eq!(frozen.content, "Hi there");
        assert!(!conv.is_streaming());
        assert!(conv.append_streaming("late").is_none());
        assert_eq!(conv.last().unwrap().content, "Hi there");
    }

    #[test]
    fn test_push_freezes_open_reply() {
        let mut conv = Conversation::new();
        conv.open_reply(None);
        conv.append_streaming("partial");
        conv.push_user("next");

        assert!(!conv.is_streaming());
        assert!(conv.append_streaming("x").is_none());
        assert_eq!(conv.messages()[0].content, "partial");
    }

    #[test]
    fn test_fail_streaming_replaces_partial_content() {
        let mut conv = Conversation::new();
        conv.push_user("q");
        conv.open_reply(None);
        conv.append_streaming("half an ans");
        conv.fail_streaming("sorry");

        assert_eq!(conv.len(), 2);
        assert_eq!(conv.last().unwrap().content, "sorry");
        assert!(!conv.is_streaming());
    }

    #[test]
    fn test_fail_streaming_without_open_reply_appends() {
        let mut conv = Conversation::new();
        conv.push_user("q");
        conv.fail_streaming("sorry");

        assert_eq!(conv.len(), 2);
        assert_eq!(conv.last().unwrap().role, MessageRole::Bot);
        assert_eq!(conv.last().unwrap().content, "sorry");
    }

    #[test]
    fn test_apply_record_adopts_server_copy() {
        let mut conv = Conversation::new();
        conv.push_user("local only");
        conv.open_reply(None);

        let applied = conv.apply_record(record(
            "c1",
            vec![Message::user("a"), Message::bot("b", MessageOrigin::Manual)],
            true,
        ));

        assert!(applied);
        assert_eq!(conv.id().unwrap().as_str(), "c1");
        assert_eq!(conv.len(), 2);
        assert!(!conv.is_streaming());
        assert!(conv.mode().is_manual());
        assert_eq!(conv.title(), Some("title"));
        assert_eq!(conv.updated_at().to_string(), "2024-05-01 10:05:00.500");
    }

    #[test]
    fn test_apply_record_rejects_other_conversation() {
        let mut conv = Conversation::new();
        conv.assign_id(ConversationId::new("c1"));
        conv.push_user("mine");

        assert!(!conv.apply_record(record("c2", Vec::new(), false)));
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.id().unwrap().as_str(), "c1");
    }

    #[test]
    fn test_handover_points() {
        let conv = Conversation::from_record(record(
            "c1",
            vec![
                Message::user("q1"),
                Message::bot("auto", MessageOrigin::Automatic),
                Message::user("q2"),
                Message::bot("op 1", MessageOrigin::Manual),
                Message::user("q3"),
                Message::bot("op 2", MessageOrigin::Manual),
                Message::bot("auto again", MessageOrigin::Automatic),
                Message::bot("op 3", MessageOrigin::Manual),
            ],
            true,
        ));

        assert_eq!(conv.handover_points(), vec![3, 7]);
    }

    #[test]
    fn test_handover_ignores_leading_manual_message() {
        let conv = Conversation::from_record(record(
            "c1",
            vec![Message::bot("op", MessageOrigin::Manual)],
            true,
        ));
        assert!(conv.handover_points().is_empty());
    }
}
