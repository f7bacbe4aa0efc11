//! DashScope integration for KBQA
//!
//! This crate provides the remote collaborators of the chatbot: the DashScope
//! text-embedding service and an OpenAI-compatible chat client pointed at
//! DashScope's compatible-mode endpoint.

mod chat;
mod config;
mod embedding;
mod sse;


pub use chat::OpenAiLike;
pub use config::DashScopeConfig;
pub use embedding::{DashScopeEmbedding, TextEmbeddingModel};

// Re-export core types for convenience
pub use kbqa_core::{
    ChatMessage, ChatModel, ChatResponse, EmbeddingModel, Error, Result, TextType, TokenStream,
};
