//! Chat model trait and types

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::Result;

/// Incrementally delivered response text.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Role of a chat message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
}

/// Result of a non-streaming chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model_id: String,
    pub tokens_used: Option<u32>,
}

/// Trait for chat models (e.g., DashScope's OpenAI-compatible endpoint)
///
/// Implementations talk to a remote model. Both a one-shot call and a
/// streaming call are required: the query engine streams the final answer
/// and uses one-shot calls for intermediate refinement steps.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send messages and wait for the complete answer
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse>;

    /// Send messages and receive the answer as it is generated
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream>;

    /// Get the model ID being used
    fn model_id(&self) -> &str;
}

/// Drain a token stream into a single string.
pub async fn collect_stream(mut stream: TokenStream) -> Result<String> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk?);
    }
    Ok(text)
}
