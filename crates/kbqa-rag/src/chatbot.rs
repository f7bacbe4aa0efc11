//! Knowledge-base chatbot: index building, loading, querying and prompt setup

use std::path::Path;
use std::sync::Arc;

use kbqa_core::{ChatModel, EmbeddingModel, PromptTemplate, Result};

use crate::engine::{QueryEngineOptions, RetrieverQueryEngine};
use crate::index::VectorStoreIndex;
use crate::prompts::TEXT_QA_TEMPLATE_KEY;
use crate::reader::DirectoryReader;
use crate::splitter::SentenceSplitter;
use crate::storage::StorageContext;

/// Where documents are read from by default
pub const DEFAULT_DOCUMENT_PATH: &str = "./tree_docs";
/// Where the index is persisted by default
pub const DEFAULT_PERSIST_PATH: &str = "knowledge_base/tree_test";

/// Build an index from every file in `document_path`
pub async fn create_index(
    document_path: impl AsRef<Path>,
    embed_model: Arc<dyn EmbeddingModel>,
) -> Result<VectorStoreIndex> {
    create_index_with(&DirectoryReader::new(document_path), embed_model).await
}

/// Build an index from the files a configured reader selects
pub async fn create_index_with(
    reader: &DirectoryReader,
    embed_model: Arc<dyn EmbeddingModel>,
) -> Result<VectorStoreIndex> {
    let documents = reader.load_data()?;
    VectorStoreIndex::from_documents(documents, embed_model, SentenceSplitter::default()).await
}

/// Build an index from `document_path` and persist it to `persist_path`
pub async fn indexing(
    document_path: impl AsRef<Path>,
    persist_path: impl AsRef<Path>,
    embed_model: Arc<dyn EmbeddingModel>,
) -> Result<VectorStoreIndex> {
    indexing_with(&DirectoryReader::new(document_path), persist_path, embed_model).await
}

pub async fn indexing_with(
    reader: &DirectoryReader,
    persist_path: impl AsRef<Path>,
    embed_model: Arc<dyn EmbeddingModel>,
) -> Result<VectorStoreIndex> {
    let index = create_index_with(reader, embed_model).await?;
    index.persist(persist_path)?;
    Ok(index)
}

/// Load a persisted index. `embed_model` must match the one it was built with.
pub fn load_index(
    persist_path: impl AsRef<Path>,
    embed_model: Arc<dyn EmbeddingModel>,
) -> Result<VectorStoreIndex> {
    let storage = StorageContext::from_persist_dir(persist_path)?;
    VectorStoreIndex::load(storage, embed_model, None)
}

/// Streaming query engine retrieving the two closest nodes
pub fn create_query_engine(
    index: &VectorStoreIndex,
    llm: Arc<dyn ChatModel>,
) -> RetrieverQueryEngine<'_> {
    create_query_engine_with(index, llm, QueryEngineOptions::default())
}

pub fn create_query_engine_with(
    index: &VectorStoreIndex,
    llm: Arc<dyn ChatModel>,
    options: QueryEngineOptions,
) -> RetrieverQueryEngine<'_> {
    index.as_query_engine(llm, options)
}

/// Answer `question`, printing the answer to stdout as it streams in
pub async fn ask(question: &str, query_engine: &RetrieverQueryEngine<'_>) -> Result<()> {
    let response = query_engine.query(question).await?;
    response.print_response_stream().await?;
    Ok(())
}

/// Replace the question-answering prompt.
///
/// `template` may use `{context_str}` and `{query_str}`.
pub fn update_prompt_template<'a>(
    mut query_engine: RetrieverQueryEngine<'a>,
    template: &str,
) -> Result<RetrieverQueryEngine<'a>> {
    query_engine.update_prompts([(TEXT_QA_TEMPLATE_KEY.to_string(), PromptTemplate::new(template))])?;
    Ok(query_engine)
}
