//! OpenAI API provider.
//!
//! Uses async-openai chat completions for both blocking and streaming calls.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CompletionOptions, TextProvider};
use crate::error::ProviderError;

/// OpenAI API provider.
pub struct OpenAIProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, model: &str) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    fn build_request(
        &self,
        system: &str,
        prompt: &str,
        options: &CompletionOptions,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, ProviderError> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(system)
            .build()
            .map_err(map_openai_error)?;
        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(map_openai_error)?;

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(options.max_tokens)
            .temperature(options.temperature)
            .messages([system_message.into(), user_message.into()])
            .stream(stream)
            .build()
            .map_err(map_openai_error)
    }
}

#[async_trait]
impl TextProvider for OpenAIProvider {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let request = self.build_request(system, prompt, options, false)?;

        let response = tokio::time::timeout(options.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                ProviderError::Unavailable(format!(
                    "request timed out after {}s",
                    options.timeout.as_secs()
                ))
            })?
            .map_err(map_openai_error)?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "completion carried no text content".into(),
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
        let request = self.build_request(system, prompt, options, true)?;

        let mut stream = tokio::time::timeout(
            options.timeout,
            self.client.chat().create_stream(request),
        )
        .await
        .map_err(|_| {
            ProviderError::Unavailable(format!(
                "request timed out after {}s",
                options.timeout.as_secs()
            ))
        })?
        .map_err(map_openai_error)?;

        let mut text = String::new();
        while let Some(result) = stream.next().await {
            if cancel.is_cancelled() {
                debug!("stream cancelled by caller");
                break;
            }
            let response = result.map_err(map_openai_error)?;
            for choice in &response.choices {
                if let Some(piece) = &choice.delta.content {
                    if !piece.is_empty() {
                        let _ = on_token.send(piece.clone()).await;
                        text.push_str(piece);
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
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn map_openai_error(err: OpenAIError) -> ProviderError {
    match err {
        OpenAIError::ApiError(api) => {
            let rate_limited = api
                .code
                .as_deref()
                .map(|c| c.contains("rate_limit"))
                .unwrap_or(false)
                || api.message.to_lowercase().contains("rate limit");
            if rate_limited {
                ProviderError::RateLimited(api.message)
            } else {
                ProviderError::Unavailable(api.message)
            }
        }
        OpenAIError::JSONDeserialize(e, _) => ProviderError::MalformedResponse(e.to_string()),
        other => ProviderError::Unavailable(other.to_string()),
    }
}
