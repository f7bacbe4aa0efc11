//! OpenAI-compatible chat client

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::timeout;

use kbqa_core::{ChatMessage, ChatModel, ChatResponse, Error, MessageRole, Result, TokenStream};

use crate::config::DashScopeConfig;
use crate::sse::token_stream;

/// Chat client for any endpoint speaking the OpenAI chat-completions protocol.
///
/// Pointed at DashScope's compatible-mode base URL it serves the Qwen models.
pub struct OpenAiLike {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    is_chat_model: bool,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    request_timeout: Duration,
}

impl OpenAiLike {
    /// Model constants
    pub const QWEN_PLUS_0919: &'static str = "qwen-plus-0919";
    pub const QWEN_PLUS: &'static str = "qwen-plus";
    pub const QWEN_MAX: &'static str = "qwen-max";
    pub const QWEN_TURBO: &'static str = "qwen-turbo";

    /// Create a new client
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            is_chat_model: true,
            temperature: None,
            max_tokens: None,
            request_timeout: Duration::from_secs(60),
        })
    }

    /// Create a new client from configuration
    pub fn from_config(config: &DashScopeConfig) -> Result<Self> {
        Self::new(&config.api_base, &config.api_key, &config.chat_model)
    }

    /// Create a new client from environment variables
    pub fn from_env() -> Result<Self> {
        let config = DashScopeConfig::from_env()?;
        Self::from_config(&config)
    }

    /// Set the model to use for generation
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Use `/chat/completions` (true, the default) or the legacy `/completions` endpoint
    pub fn with_chat_mode(mut self, is_chat_model: bool) -> Self {
        self.is_chat_model = is_chat_model;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Timeout applied to non-streaming calls
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn is_chat_model(&self) -> bool {
        self.is_chat_model
    }

    fn endpoint(&self) -> String {
        if self.is_chat_model {
            format!("{}/chat/completions", self.api_base)
        } else {
            format!("{}/completions", self.api_base)
        }
    }

    /// Build the JSON request body for the configured endpoint
    pub(crate) fn request_body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        let mut body = if self.is_chat_model {
            json!({
                "model": self.model,
                "messages": messages,
                "stream": stream,
            })
        } else {
            json!({
                "model": self.model,
                "prompt": messages_to_prompt(messages),
                "stream": stream,
            })
        };

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = self.temperature { obj.insert("temperature".to_string(), json!(t)); }
            if let Some(t) = self.max_tokens { obj.insert("max_tokens".to_string(), json!(t)); }
        }

        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let url = self.endpoint();
        tracing::debug!(url = %url, model = %self.model, "sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication(format!(
                "Chat endpoint rejected the API key: {}",
                error_text
            )));
        }
        Err(Error::Llm(format!(
            "Chat request failed with status {}: {}",
            status, error_text
        )))
    }

    async fn perform_chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let body = self.request_body(messages, false);
        let response = self.send(&body).await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))?;
        parse_completion(&payload, self.is_chat_model, &self.model)
    }
}

/// Flatten chat messages into a single completion prompt
pub(crate) fn messages_to_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        prompt.push_str(&format!("{}: {}\n", role, message.content));
    }
    prompt.push_str("assistant: ");
    prompt
}

/// Extract the answer from a non-streaming response
pub(crate) fn parse_completion(payload: &Value, is_chat_model: bool, model: &str) -> Result<ChatResponse> {
    let choice = &payload["choices"][0];
    let content = if is_chat_model {
        choice["message"]["content"].as_str()
    } else {
        choice["text"].as_str()
    }
    .ok_or_else(|| Error::Llm(format!("Response has no completion text: {}", payload)))?;

    Ok(ChatResponse {
        content: content.to_string(),
        model_id: payload["model"].as_str().unwrap_or(model).to_string(),
        tokens_used: payload["usage"]["total_tokens"].as_u64().map(|t| t as u32),
    })
}

pub(crate) fn chat_delta(event: &Value) -> Option<&str> {
    event["choices"][0]["delta"]["content"].as_str()
}

pub(crate) fn completion_delta(event: &Value) -> Option<&str> {
    event["choices"][0]["text"].as_str()
}

#[async_trait]
impl ChatModel for OpenAiLike {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        match timeout(self.request_timeout, self.perform_chat(messages)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout("Request timed out".to_string())),
        }
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let body = self.request_body(messages, true);
        let response = self.send(&body).await?;
        let extract: fn(&Value) -> Option<&str> = if self.is_chat_model { chat_delta } else { completion_delta };
        Ok(token_stream(Box::pin(response.bytes_stream()), extract))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
