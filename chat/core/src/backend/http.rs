//! HTTP Backend Implementation
//!
//! [`ChatBackend`] over the chat service's REST surface.
//!
//! # Endpoints
//!
//! All paths are resolved under `base_url` + `route_prefix`:
//!
//! - `POST /chat` - streamed reply, `data: <json>` framed
//! - `GET /conversations`, `GET|DELETE /conversations/{id}`
//! - `PUT /conversations/{id}/mode` - `{isManual}`
//! - `POST /manual-reply` - `{message, conversationId}`
//! - `GET /models`, `PUT /models/current`
//!
//! Only the connect phase has a timeout. A reply stream ends on completion,
//! transport failure, or when the caller drops the receiver.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::traits::{ChatBackend, ChatRequest};
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::messages::{
    ConversationId, ConversationRecord, ConversationSummary, Message, ModelCatalog,
};
use crate::sse::{FrameDecoder, StreamEvent};

/// Error code the service uses to refuse automatic replies
const MANUAL_MODE_REFUSAL: &str = "conversation_in_manual_mode";

/// Chat service client
#[derive(Clone, Debug)]
pub struct HttpChatBackend {
    /// Base URL including the route prefix, without trailing slash
    endpoint: String,
    /// Capacity of each reply stream channel
    stream_buffer: usize,
    http_client: reqwest::Client,
}

#[derive(Deserialize)]
struct ManualReplyResponse {
    message: Message,
}

#[derive(Deserialize)]
struct SelectModelResponse {
    current: String,
}

impl HttpChatBackend {
    /// Create a client for `base_url`, with routes under `route_prefix`
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        route_prefix: &str,
        connect_timeout: Duration,
    ) -> Result<Self, ChatError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), route_prefix),
            stream_buffer: 100,
            http_client,
        })
    }

    /// Create from a loaded [`ClientConfig`]
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ChatError> {
        let mut backend =
            Self::new(&config.base_url, &config.route_prefix, config.connect_timeout)?;
        backend.stream_buffer = config.stream_buffer.max(1);
        Ok(backend)
    }

    /// Base URL requests are sent to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn conversation_url(&self, id: &ConversationId) -> String {
        self.url(&format!("/conversations/{}", id.as_str()))
    }
}

/// Turn a non-success response into [`ChatError::Status`]
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ChatError::Status { status, body })
}

/// Read a reply body until it ends, fails, or the receiver goes away
async fn pump_reply<S, B, E>(mut body: S, tx: mpsc::Sender<StreamEvent>)
where
    S: futures::Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut decoder = FrameDecoder::new();

    loop {
        let next = tokio::select! {
            () = tx.closed() => {
                tracing::debug!("Reply receiver dropped, releasing stream");
                return;
            }
            next = body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                for event in decoder.push(bytes.as_ref()) {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                if decoder.is_done() {
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Reply stream failed");
                let _ = tx.send(StreamEvent::Failed(e.to_string())).await;
                return;
            }
            None => {
                for event in decoder.finish() {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                break;
            }
        }
    }

    if decoder.skipped() > 0 {
        tracing::debug!(skipped = decoder.skipped(), "Reply stream ended with skipped events");
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    fn name(&self) -> &'static str {
        "HTTP"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.url("/conversations"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send_streaming(
        &self,
        request: &ChatRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ChatError> {
        let response = self
            .http_client
            .post(self.url("/chat"))
            .json(request)
            .send()
            .await?;

        let response = match check_status(response).await {
            Ok(response) => response,
            Err(ChatError::Status { status: 400, body }) if body.contains(MANUAL_MODE_REFUSAL) => {
                let id = request.conversation_id.clone().unwrap_or_else(|| ConversationId::new(""));
                return Err(ChatError::ManualModeActive(id));
            }
            Err(e) => return Err(e),
        };

        let (tx, rx) = mpsc::channel(self.stream_buffer);
        tokio::spawn(pump_reply(response.bytes_stream(), tx));
        Ok(rx)
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        let response = self.http_client.get(self.url("/conversations")).send().await?;
        let body = check_status(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<ConversationRecord, ChatError> {
        let response = self.http_client.get(self.conversation_url(id)).send().await?;
        let body = check_status(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), ChatError> {
        let response = self.http_client.delete(self.conversation_url(id)).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn set_mode(&self, id: &ConversationId, manual: bool) -> Result<(), ChatError> {
        let response = self
            .http_client
            .put(format!("{}/mode", self.conversation_url(id)))
            .json(&serde_json::json!({ "isManual": manual }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn post_manual_reply(
        &self,
        id: &ConversationId,
        text: &str,
    ) -> Result<Message, ChatError> {
        let response = self
            .http_client
            .post(self.url("/manual-reply"))
            .json(&serde_json::json!({ "message": text, "conversationId": id }))
            .send()
            .await?;
        let body = check_status(response).await?.bytes().await?;
        let reply: ManualReplyResponse = serde_json::from_slice(&body)?;
        Ok(reply.message)
    }

    async fn list_models(&self) -> Result<ModelCatalog, ChatError> {
        let response = self.http_client.get(self.url("/models")).send().await?;
        let body = check_status(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn select_model(&self, model: &str) -> Result<String, ChatError> {
        let response = self
            .http_client
            .put(self.url("/models/current"))
            .json(&serde_json::json!({ "model": model }))
            .send()
            .await?;
        let body = check_status(response).await?.bytes().await?;
        let selected: SelectModelResponse = serde_json::from_slice(&body)?;
        Ok(selected.current)
    }
}
