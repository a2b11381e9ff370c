//! Chat-completion providers for iflow.
//!
//! The [`LLMProvider`] trait is the seam between the conversation controller and
//! the network. [`OpenAiCompatProvider`] speaks the OpenAI-style
//! `/chat/completions` protocol and decodes its server-sent-event stream with
//! the [`sse`] module.

pub mod openai;
pub mod sse;

pub use openai::OpenAiCompatProvider;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Where requests go and how they authenticate.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    pub stream: bool,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
}

/// One incremental piece of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionChunk {
    pub content: String,
    /// Set on the last chunk, after the `[DONE]` sentinel or a clean EOF.
    pub finished: bool,
}

impl CompletionChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finished: false,
        }
    }

    pub fn done() -> Self {
        Self {
            content: String::new(),
            finished: true,
        }
    }
}

pub type CompletionStream = ReceiverStream<Result<CompletionChunk>>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no API key configured, use /api <key> to set one")]
    MissingApiKey,
    #[error("chat endpoint returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request to chat endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response from chat endpoint: {0}")]
    Malformed(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("chat endpoint did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

#[async_trait::async_trait]
pub trait LLMProvider: Send + Sync {
    /// Single non-streamed completion.
    async fn complete(
        &self,
        endpoint: &Endpoint,
        request: CompletionRequest,
    ) -> Result<CompletionResponse>;

    /// Streamed completion. The stream stops early once `cancel` fires.
    async fn stream(
        &self,
        endpoint: &Endpoint,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionStream>;

    fn name(&self) -> &str;
}
