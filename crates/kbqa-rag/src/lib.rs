//! Retrieval-augmented question answering for KBQA
//!
//! This crate loads documents from disk, splits them into nodes, builds and
//! persists a vector index, and answers questions through a query engine that
//! retrieves context and streams the answer from a chat model.

mod reader;
mod splitter;
mod vector_store;
mod storage;
mod index;
mod retriever;
mod prompts;
mod synthesizer;
mod engine;
mod local_embedding;
mod chatbot;

#[cfg(test)]
mod tests;

pub use reader::DirectoryReader;
pub use splitter::SentenceSplitter;
pub use vector_store::SimpleVectorStore;
pub use storage::{DocStore, IndexStore, IndexStruct, RefDocInfo, StorageContext};
pub use index::VectorStoreIndex;
pub use retriever::VectorIndexRetriever;
pub use prompts::{
    DEFAULT_ASSISTANT_PROMPT, REFINE_TEMPLATE_KEY, TEXT_QA_TEMPLATE_KEY,
    default_refine_prompt, default_text_qa_prompt,
};
pub use synthesizer::{ResponseMode, ResponseSynthesizer, EMPTY_RESPONSE};
pub use engine::{QueryEngineOptions, Response, RetrieverQueryEngine, StreamingResponse};
pub use local_embedding::LocalHashEmbedding;
pub use chatbot::{
    DEFAULT_DOCUMENT_PATH, DEFAULT_PERSIST_PATH,
    ask, create_index, create_index_with, create_query_engine, create_query_engine_with, indexing,
    indexing_with, load_index, update_prompt_template,
};

// Re-export core types for convenience
pub use kbqa_core::{
    ChatMessage, ChatModel, Document, EmbeddingModel, Error, MetadataMode, NodeWithScore,
    PromptTemplate, Result, TextNode, TextType, VectorStore,
};
