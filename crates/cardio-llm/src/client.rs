//! OpenAI-compatible chat client.
//!
//! Works with the OpenAI API and any compatible endpoint (including Ollama's /v1 endpoint).

use std::time::Instant;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse,
    },
    Client,
};
use cardio_core::CardioError;
use tracing::info;

/// Token usage and timing metrics from an LLM call.
#[derive(Debug, Clone, Default)]
pub struct LlmMetrics {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub elapsed_ms: u64,
}

/// Complete response from an LLM call.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub metrics: LlmMetrics,
}

/// Converts any error into a CardioError::Advisory.
fn llm_err(e: impl ToString) -> CardioError {
    CardioError::Advisory(e.to_string())
}

/// Builds the message list for a simple system + user request.
fn build_messages(
    system_prompt: &str,
    user_input: &str,
) -> Result<Vec<ChatCompletionRequestMessage>, CardioError> {
    Ok(vec![
        ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(llm_err)?,
        ),
        ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_input)
                .build()
                .map_err(llm_err)?,
        ),
    ])
}

/// Extracts content and metrics from a completion response.
fn extract_response(
    response: CreateChatCompletionResponse,
    elapsed_ms: u64,
) -> Result<LlmResponse, CardioError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| CardioError::Advisory("No response content".into()))?;

    let (input_tokens, output_tokens) = response
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));

    info!(
        "LLM: {}ms, tokens: {}/{} (in/out)",
        elapsed_ms, input_tokens, output_tokens
    );

    Ok(LlmResponse {
        content,
        metrics: LlmMetrics { input_tokens, output_tokens, elapsed_ms },
    })
}

/// Client for OpenAI-compatible chat completion APIs.
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl LlmClient {
    /// Creates a new client for the given model and optional API base URL.
    ///
    /// Without an API base the key is read from `OPENAI_API_KEY`.
    pub fn new(model: &str, api_base: Option<&str>) -> Self {
        let config = match api_base {
            Some(base) => OpenAIConfig::new()
                .with_api_base(base)
                .with_api_key(std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| "ollama".into())),
            None => OpenAIConfig::default(),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    /// Sends a chat request and returns the complete response.
    pub async fn chat(&self, system_prompt: &str, user_input: &str) -> Result<LlmResponse, CardioError> {
        let start = Instant::now();
        let messages = build_messages(system_prompt, user_input)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(llm_err)?;

        let response = self.client.chat().create(request).await.map_err(llm_err)?;
        extract_response(response, start.elapsed().as_millis() as u64)
    }
}
