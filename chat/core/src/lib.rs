//! Chat Core - Headless Streaming Chat Client
//!
//! This crate holds the client-side logic of the chat application: it turns
//! a user message into a streamed bot reply, decides whether the automatic
//! path or a human operator answers a conversation, and keeps the viewed
//! conversation in sync with the server. It has no UI dependencies and can
//! drive a terminal console, a GUI or a headless test.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       UI Surface                             │
//! │              (chat-console, tests, ...)                      │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┼───────────────────────────────┐
//! │                         CHAT CORE                            │
//! │  ┌───────────────────────────┴──────────────────────────────┐│
//! │  │                      ChatSession                         ││
//! │  │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────┐ ││
//! │  │  │  Streaming   │  │ Conversation │  │  Conversation   │ ││
//! │  │  │    Reply     │──│     Mode     │──│     Poller      │ ││
//! │  │  │ Accumulator  │  │  Controller  │  │                 │ ││
//! │  │  └──────┬───────┘  └──────┬───────┘  └────────┬────────┘ ││
//! │  └─────────┼─────────────────┼───────────────────┼──────────┘│
//! │            └─────────────────┼───────────────────┘           │
//! │                        ChatBackend                           │
//! │                  (HTTP, or scripted mock)                    │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ HTTP, `data: <json>` framed replies
//!                          chat service
//! ```
//!
//! # Key Types
//!
//! - [`ChatSession`]: host owning the viewed conversation, active reply and polling
//! - [`StreamingReplyAccumulator`]: folds a reply stream into the trailing bot message
//! - [`ConversationModeController`]: automatic/manual mode per conversation
//! - [`Conversation`]: append-only message log with one open streaming slot
//! - [`ChatBackend`]: the chat service contract; [`HttpChatBackend`] implements it
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use chat_core::{load_config, ChatSession, HttpChatBackend, ReplyProgress};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let backend = Arc::new(HttpChatBackend::from_config(&config)?);
//!     let mut session = ChatSession::new(backend, config);
//!
//!     session.send_message("hello").await;
//!     while let Some(progress) = session.next_reply_progress().await {
//!         if let ReplyProgress::Appended { fragment, .. } = progress {
//!             print!("{fragment}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`accumulator`]: streaming reply accumulation
//! - [`backend`]: chat service abstraction (HTTP, mock)
//! - [`config`]: TOML, environment and CLI configuration
//! - [`conversation`]: client-side conversation state
//! - [`error`]: error types
//! - [`messages`]: identifiers, messages and server records
//! - [`mode`]: manual/automatic mode control
//! - [`poller`]: cancellable conversation refresh
//! - [`session`]: the session host
//! - [`sse`]: reply stream framing

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod accumulator;
pub mod backend;
pub mod config;
pub mod conversation;
pub mod error;
pub mod messages;
pub mod mode;
pub mod poller;
pub mod session;
pub mod sse;

// Re-exports for convenience
pub use accumulator::{
    ReplyOutcome, ReplyProgress, ReplyStream, SendOptions, SendOutcome, StreamingReplyAccumulator,
    APOLOGY_MESSAGE,
};
pub use backend::{ChatBackend, ChatRequest, HttpChatBackend, StreamEvent};
pub use conversation::{Conversation, ConversationMode};
pub use error::ChatError;
pub use messages::{
    ConversationId, ConversationRecord, ConversationSummary, Message, MessageId, MessageOrigin,
    MessageRole, ModelCatalog, ModelInfo,
};
pub use mode::ConversationModeController;
pub use poller::{ConversationPoller, PollHandle, PollUpdate};
pub use session::{ChatSession, SendStatus};
pub use sse::FrameDecoder;

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ClientConfig, ClientToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
