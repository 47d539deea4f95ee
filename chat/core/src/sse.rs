//! Event Stream Framing
//!
//! Decodes the `POST /chat` response body into [`StreamEvent`]s.
//!
//! # Framing
//!
//! The body is a sequence of newline-terminated lines. Lines starting with
//! `data: ` carry one JSON payload each; every other line (blank separators,
//! comments, stray text) is ignored. A payload that fails to parse is logged
//! and skipped, and decoding carries on with the next line.
//!
//! Network reads do not respect line boundaries, so the decoder buffers raw
//! bytes and only decodes complete lines. A line (or a multi-byte character)
//! split across two reads is decoded once, when its terminator arrives.

use serde::Deserialize;

use crate::messages::ConversationId;

/// Prefix marking a payload line
pub const DATA_PREFIX: &str = "data: ";

/// One incremental event of a reply stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// The service assigned an identity to a new conversation
    ConversationAssigned(ConversationId),
    /// Text to append to the reply
    Fragment(String),
    /// The transport or the service failed; no further events follow
    Failed(String),
}

/// JSON payload of a `data:` line
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamPayload {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    chunk: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: Option<bool>,
}

/// Incremental decoder for the reply stream body
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    done: bool,
    skipped: u32,
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the service signalled the end of the reply
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of malformed payload lines skipped so far
    #[must_use]
    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    /// Feed a network chunk, returning events for every completed line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line[..line.len() - 1], &mut events);
            if self.done {
                self.buffer.clear();
                break;
            }
        }
        events
    }

    /// Flush a final line that arrived without a terminator
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line, &mut events);
        }
        self.buffer.clear();
        events
    }

    fn decode_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let line = String::from_utf8_lossy(raw);
        let line = line.strip_suffix('\r').unwrap_or(&line);

        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            if !line.is_empty() {
                tracing::trace!(line = %line, "Ignoring non-data stream line");
            }
            return;
        };

        let payload: StreamPayload = match serde_json::from_str(payload) {
            Ok(payload) => payload,
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, payload = %payload, "Skipping malformed stream event");
                return;
            }
        };

        if let Some(id) = payload.conversation_id.filter(|id| !id.is_empty()) {
            events.push(StreamEvent::ConversationAssigned(ConversationId::new(id)));
        }
        if let Some(chunk) = payload.chunk.filter(|chunk| !chunk.is_empty()) {
            events.push(StreamEvent::Fragment(chunk));
        }
        if let Some(error) = payload.error.filter(|e| !e.is_empty()) {
            tracing::warn!(error = %error, "Service reported a stream error");
            events.push(StreamEvent::Failed(error));
            self.done = true;
            return;
        }
        if payload.done == Some(true) {
            tracing::debug!("Stream signalled completion");
            self.done = true;
        }
    }
}
