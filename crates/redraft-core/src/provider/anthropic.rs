//! Anthropic API provider.
//!
//! Uses reqwest against the Messages API, with hand-rolled SSE parsing for
//! streaming completions.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CompletionOptions, TextProvider};
use crate::error::ProviderError;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic API provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| ProviderError::Unavailable("invalid API key format".into()))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        Ok(headers)
    }

    async fn send(
        &self,
        request: &MessagesRequest,
        options: &CompletionOptions,
    ) -> Result<reqwest::Response, ProviderError> {
        let send = self
            .client
            .post(ANTHROPIC_API_URL)
            .headers(self.headers()?)
            .json(request)
            .send();

        let response = tokio::time::timeout(options.timeout, send)
            .await
            .map_err(|_| {
                ProviderError::Unavailable(format!(
                    "request timed out after {}s",
                    options.timeout.as_secs()
                ))
            })?
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ApiError>().await {
            Ok(err) => err.error.message,
            Err(_) => format!("HTTP {}", status),
        };
        if status == StatusCode::TOO_MANY_REQUESTS {
            Err(ProviderError::RateLimited(message))
        } else {
            Err(ProviderError::Unavailable(message))
        }
    }
}

#[async_trait]
impl TextProvider for AnthropicProvider {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let request = MessagesRequest::new(&self.model, system, prompt, options, false);
        let response = self.send(&request, options).await?;

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let text: String = body
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text.as_str()),
            })
            .collect();

        if text.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "response carried no text content".into(),
            ));
        }
        Ok(text)
    }

    async fn complete_streaming(
        &self,
        system: &str,
        prompt: &str,
        options: &CompletionOptions,
        on_token: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<String, ProviderError> {
        let request = MessagesRequest::new(&self.model, system, prompt, options, true);
        let response = self.send(&request, options).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut text = String::new();

        while let Some(chunk_result) = stream.next().await {
            if cancel.is_cancelled() {
                debug!("stream cancelled by caller");
                break;
            }

            let chunk = chunk_result.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Process complete SSE events.
            while let Some(event_end) = buffer.find("\n\n") {
                let event_data = buffer[..event_end].to_string();
                buffer = buffer[event_end + 2..].to_string();

                for line in event_data.lines() {
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        continue;
                    }
                    let Ok(event) = serde_json::from_str::<StreamEvent>(data) else {
                        continue;
                    };
                    match event {
                        StreamEvent::ContentBlockDelta { delta } => {
                            if let ContentDelta::TextDelta { text: piece } = delta {
                                let _ = on_token.send(piece.clone()).await;
                                text.push_str(&piece);
                            }
                        }
                        StreamEvent::MessageStop => {
                            debug!("message complete");
                        }
                        StreamEvent::Error { error } => {
                            return Err(ProviderError::Unavailable(error.message));
                        }
                        _ => {}
                    }
                }
            }
        }

        if text.is_empty() && !cancel.is_cancelled() {
            return Err(ProviderError::MalformedResponse(
                "stream ended with no text content".into(),
            ));
        }
        Ok(text)
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

impl MessagesRequest {
    fn new(
        model: &str,
        system: &str,
        prompt: &str,
        options: &CompletionOptions,
        stream: bool,
    ) -> Self {
        Self {
            model: model.to_string(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            messages: vec![RequestMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            system: if system.is_empty() {
                None
            } else {
                Some(system.to_string())
            },
            stream: stream.then_some(true),
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)] // Fields required for deserialization but not all are read
enum StreamEvent {
    MessageStart {
        message: serde_json::Value,
    },
    ContentBlockStart {
        index: usize,
        content_block: serde_json::Value,
    },
    ContentBlockDelta {
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: serde_json::Value,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiErrorDetail,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)] // Fields required for deserialization but not all are read
enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}
