//! Chat Service Integration
//!
//! This module provides access to the remote chat service and conversation
//! store through a common trait interface.
//!
//! # Available Backends
//!
//! - **HTTP**: the chat service's REST surface (default)
//! - **Mock**: scripted in-memory service for tests and demos
//!
//! # Usage
//!
//! ```ignore
//! use chat_core::backend::{ChatBackend, ChatRequest, HttpChatBackend};
//!
//! let backend = HttpChatBackend::from_config(&config)?;
//! let mut rx = backend.send_streaming(&ChatRequest::new("Hello!")).await?;
//! while let Some(event) = rx.recv().await {
//!     // apply event
//! }
//! ```

mod http;
pub mod mock;
mod traits;

pub use http::HttpChatBackend;
pub use traits::{ChatBackend, ChatRequest};

// Re-export StreamEvent for convenience
pub use crate::sse::StreamEvent;
