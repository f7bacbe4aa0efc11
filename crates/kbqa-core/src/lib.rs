//! Core traits and types for KBQA
//!
//! This crate defines the fundamental traits and types used across the KBQA system.
//! It provides capability-facing interfaces for chat models, embedding models and
//! vector stores, plus the document, node and prompt types that flow between them.

pub mod llm;
pub mod embedding;
pub mod vector_store;
pub mod document;
pub mod prompt;
pub mod error;

pub use error::{Error, Result};
pub use llm::{ChatModel, ChatMessage, ChatResponse, MessageRole, TokenStream, collect_stream};
pub use embedding::{EmbeddingModel, TextType};
pub use vector_store::{VectorStore, VectorStoreQuery, VectorStoreQueryResult, cosine_similarity};
pub use document::{Document, TextNode, NodeWithScore, MetadataMode};
pub use prompt::PromptTemplate;
