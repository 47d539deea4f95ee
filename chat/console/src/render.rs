//! Plain-text rendering for the console
//!
//! All output goes through `impl Write` so the transcript format is testable
//! without a terminal.

use std::io::{self, Write};

use chat_core::{
    Conversation, ConversationSummary, Message, MessageId, MessageRole, ModelCatalog,
};

/// Drawn before the first operator reply that follows an automatic one
pub const HANDOVER_SEPARATOR: &str = "--- operator takeover ---";

/// Speaker label for a message
fn speaker(message: &Message) -> &'static str {
    match message.role {
        MessageRole::User => "you",
        MessageRole::Bot if message.is_manual_reply() => "operator",
        MessageRole::Bot => "bot",
    }
}

/// One transcript line
#[must_use]
pub fn format_message(message: &Message) -> String {
    let mut line = String::new();
    if !message.timestamp.is_empty() {
        line.push_str(&format!("[{}] ", message.timestamp));
    }
    line.push_str(speaker(message));
    if let Some(ref model) = message.model {
        line.push_str(&format!(" ({model})"));
    }
    line.push_str(": ");
    line.push_str(&message.content);
    line
}

/// Header plus every message
pub fn transcript(out: &mut impl Write, conversation: &Conversation) -> io::Result<()> {
    header(out, conversation)?;
    messages_from(out, conversation, 0)
}

fn header(out: &mut impl Write, conversation: &Conversation) -> io::Result<()> {
    let id = conversation
        .id()
        .map_or_else(|| "(new chat)".to_string(), ToString::to_string);
    let mode = if conversation.mode().is_manual() {
        "manual"
    } else {
        "automatic"
    };
    match conversation.title() {
        Some(title) => writeln!(out, "# {title} [{id}, {mode}]")?,
        None => writeln!(out, "# {id} [{mode}]")?,
    }
    Ok(())
}

/// Messages from index `start` on, with handover separators
pub fn messages_from(
    out: &mut impl Write,
    conversation: &Conversation,
    start: usize,
) -> io::Result<()> {
    let handovers = conversation.handover_points();
    for (idx, message) in conversation.messages().iter().enumerate().skip(start) {
        if handovers.contains(&idx) {
            writeln!(out, "{HANDOVER_SEPARATOR}")?;
        }
        writeln!(out, "{}", format_message(message))?;
    }
    Ok(())
}

/// Incremental transcript for a conversation that keeps changing
///
/// Remembers what was printed for each message. A message whose content
/// changed since (a reply the service is still writing) is printed again,
/// and an empty trailing bot reply is held back until it has text. If the
/// history no longer starts with what was printed, the whole transcript is
/// drawn again.
#[derive(Debug, Default)]
pub struct TranscriptView {
    header_shown: bool,
    printed: Vec<(MessageId, String)>,
}

impl TranscriptView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Print whatever changed since the last call
    pub fn render(&mut self, out: &mut impl Write, conversation: &Conversation) -> io::Result<()> {
        let messages = conversation.messages();
        let diverged = self.printed.len() > messages.len()
            || self
                .printed
                .iter()
                .zip(messages)
                .any(|((id, _), message)| *id != message.id);
        if diverged {
            self.header_shown = false;
            self.printed.clear();
        }
        if !self.header_shown {
            header(out, conversation)?;
            self.header_shown = true;
        }

        let handovers = conversation.handover_points();
        for (idx, message) in messages.iter().enumerate() {
            let pending = idx + 1 == messages.len()
                && message.role == MessageRole::Bot
                && message.content.is_empty();
            if pending {
                break;
            }
            match self.printed.get_mut(idx) {
                Some((_, shown)) if *shown == message.content => {}
                Some((_, shown)) => {
                    writeln!(out, "{}", format_message(message))?;
                    shown.clone_from(&message.content);
                }
                None => {
                    if handovers.contains(&idx) {
                        writeln!(out, "{HANDOVER_SEPARATOR}")?;
                    }
                    writeln!(out, "{}", format_message(message))?;
                    self.printed.push((message.id, message.content.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Conversation list, one per line
pub fn conversation_list(
    out: &mut impl Write,
    conversations: &[ConversationSummary],
) -> io::Result<()> {
    if conversations.is_empty() {
        return writeln!(out, "No conversations");
    }
    for summary in conversations {
        writeln!(out, "{}  {}  {}", summary.id, summary.updated_at, summary.title)?;
    }
    Ok(())
}

/// Model catalog; the selected model is starred
pub fn models(out: &mut impl Write, catalog: &ModelCatalog) -> io::Result<()> {
    for model in &catalog.models {
        let marker = if catalog.current.as_deref() == Some(model.name.as_str()) {
            '*'
        } else {
            ' '
        };
        writeln!(out, "{marker} {} ({})", model.name, model.kind)?;
    }
    Ok(())
}
