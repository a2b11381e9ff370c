//! OpenAI-compatible chat-completion provider.
//!
//! Works against any endpoint that accepts the `/chat/completions` request
//! shape and streams `choices[0].delta.content` frames over server-sent events,
//! which covers the iFlow platform as well as most hosted and local gateways.
//!
//! # Usage
//!
//! ```rust,no_run
//! use iflow_providers::{CompletionRequest, Endpoint, LLMProvider, Message, OpenAiCompatProvider};
//! use tokio_stream::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = OpenAiCompatProvider::new(None)?;
//!     let endpoint = Endpoint {
//!         url: "https://apis.iflow.cn/v1/chat/completions".to_string(),
//!         api_key: Some("sk-...".to_string()),
//!     };
//!     let request = CompletionRequest {
//!         model: "qwen3-coder-plus".to_string(),
//!         messages: vec![Message::user("Hello!")],
//!         max_tokens: Some(4096),
//!         temperature: Some(0.7),
//!         top_p: Some(0.7),
//!         stream: true,
//!     };
//!
//!     let mut stream = provider.stream(&endpoint, request, CancellationToken::new()).await?;
//!     while let Some(chunk) = stream.next().await {
//!         print!("{}", chunk?.content);
//!     }
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    sse, CompletionRequest, CompletionResponse, CompletionStream, Endpoint, LLMProvider,
    ProviderError,
};

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
const STREAM_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct OpenAiCompatProvider {
    client: Client,
    /// Limit on connecting and on every wait for data, never on the whole reply.
    read_timeout: Duration,
}

impl OpenAiCompatProvider {
    pub fn new(timeout_secs: Option<u64>) -> Result<Self> {
        let read_timeout = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let client = Client::builder()
            .connect_timeout(read_timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        info!(
            "Initialized chat provider with {:?} connect/read timeout",
            read_timeout
        );

        Ok(Self {
            client,
            read_timeout,
        })
    }

    async fn post(
        &self,
        endpoint: &Endpoint,
        request: &CompletionRequest,
    ) -> Result<reqwest::Response> {
        let api_key = endpoint
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ProviderError::MissingApiKey)?;

        debug!(
            "Sending request to {}: model={}, messages={}, stream={}",
            endpoint.url,
            request.model,
            request.messages.len(),
            request.stream
        );

        let mut builder = self.client.post(&endpoint.url).bearer_auth(api_key).json(request);
        if !request.stream {
            // A plain completion is one read, so the limit can cover all of it.
            builder = builder.timeout(self.read_timeout);
        }

        let response = tokio::time::timeout(self.read_timeout, builder.send())
            .await
            .map_err(|_| ProviderError::Timeout(self.read_timeout))?
            .map_err(ProviderError::Transport)?;

        let status = response.status();
        debug!("Chat endpoint answered with status {}", status);
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl LLMProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        endpoint: &Endpoint,
        mut request: CompletionRequest,
    ) -> Result<CompletionResponse> {
        request.stream = false;
        let response = self.post(endpoint, &request).await?;

        let response_text = response.text().await.map_err(ProviderError::Transport)?;
        debug!("Raw completion response: {}", response_text);

        let parsed: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| ProviderError::Malformed(format!("{} - Response: {}", e, response_text)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| ProviderError::Malformed("response carries no choices".to_string()))?;

        Ok(CompletionResponse {
            content,
            model: parsed.model.unwrap_or(request.model),
        })
    }

    async fn stream(
        &self,
        endpoint: &Endpoint,
        mut request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionStream> {
        request.stream = true;
        let response = self.post(endpoint, &request).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let body = Box::pin(response.bytes_stream());
        let read_timeout = self.read_timeout;

        tokio::spawn(async move {
            sse::pump(body, tx, cancel, read_timeout).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    #[test]
    fn test_provider_creation() {
        let provider = OpenAiCompatProvider::new(Some(5)).unwrap();
        assert_eq!(provider.name(), "openai-compatible");
    }

    #[tokio::test]
    async fn test_missing_api_key_is_rejected_before_sending() {
        let provider = OpenAiCompatProvider::new(None).unwrap();
        let endpoint = Endpoint {
            url: "http://127.0.0.1:9/never".to_string(),
            api_key: Some("   ".to_string()),
        };
        let request = CompletionRequest {
            model: "m".to_string(),
            messages: vec![Message::user("hi")],
            max_tokens: None,
            temperature: None,
            top_p: None,
            stream: true,
        };

        let err = provider
            .stream(&endpoint, request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::MissingApiKey)
        ));
    }

    #[test]
    fn test_chat_response_parsing() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"model":"qwen","choices":[{"index":0,"message":{"role":"assistant","content":"Title"}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.model.as_deref(), Some("qwen"));
        assert_eq!(
            parsed.choices[0].message.as_ref().unwrap().content.as_deref(),
            Some("Title")
        );
    }
}
