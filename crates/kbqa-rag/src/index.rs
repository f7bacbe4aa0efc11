//! Vector store index over split document nodes

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use kbqa_core::{
    ChatModel, Document, EmbeddingModel, Error, MetadataMode, Result, TextNode, TextType,
    VectorStore,
};

use crate::engine::{QueryEngineOptions, RetrieverQueryEngine};
use crate::retriever::VectorIndexRetriever;
use crate::splitter::SentenceSplitter;
use crate::storage::{IndexStruct, StorageContext};

/// Nodes, their embeddings and the embedding model that produced them
pub struct VectorStoreIndex {
    index_id: String,
    storage: StorageContext,
    embed_model: Arc<dyn EmbeddingModel>,
    splitter: SentenceSplitter,
}

impl fmt::Debug for VectorStoreIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorStoreIndex")
            .field("index_id", &self.index_id)
            .field("embed_model", &self.embed_model.model_name())
            .field("nodes", &self.node_count())
            .field("splitter", &self.splitter)
            .finish()
    }
}

impl VectorStoreIndex {
    /// Split, embed and store documents in a fresh index
    pub async fn from_documents(
        documents: Vec<Document>,
        embed_model: Arc<dyn EmbeddingModel>,
        splitter: SentenceSplitter,
    ) -> Result<Self> {
        let index_id = uuid::Uuid::new_v4().to_string();
        let mut storage = StorageContext::new();
        storage
            .index_store
            .add(IndexStruct::new(&index_id, embed_model.model_name()));

        let mut index = Self {
            index_id,
            storage,
            embed_model,
            splitter,
        };
        index.insert_documents(&documents).await?;

        tracing::info!(
            "Built index {} from {} documents ({} nodes)",
            index.index_id,
            documents.len(),
            index.node_count()
        );
        Ok(index)
    }

    /// Rebuild an index from loaded storage.
    ///
    /// The embedding model must be the one the index was built with.
    pub fn load(
        storage: StorageContext,
        embed_model: Arc<dyn EmbeddingModel>,
        index_id: Option<&str>,
    ) -> Result<Self> {
        let index_struct = storage.index_store.resolve(index_id)?;
        if index_struct.embed_model != embed_model.model_name() {
            return Err(Error::EmbeddingModelMismatch {
                expected: index_struct.embed_model.clone(),
                found: embed_model.model_name().to_string(),
            });
        }

        let index_id = index_struct.index_id.clone();
        tracing::info!(
            "Loaded index {} ({} nodes)",
            index_id,
            index_struct.node_ids.len()
        );

        Ok(Self {
            index_id,
            storage,
            embed_model,
            splitter: SentenceSplitter::default(),
        })
    }

    /// Use a different splitter for documents inserted later
    pub fn with_splitter(mut self, splitter: SentenceSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Split and embed documents without touching the stores
    async fn embed_documents(&self, documents: &[Document]) -> Result<Vec<(TextNode, Vec<f32>)>> {
        let nodes = self.splitter.split_documents(documents);
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = nodes
            .iter()
            .map(|node| node.content(MetadataMode::Embed))
            .collect();

        let embeddings = self.embed_model.embed(&texts, TextType::Document).await?;
        if embeddings.len() != nodes.len() {
            return Err(Error::Embedding(format!(
                "Requested {} embeddings, received {}",
                nodes.len(),
                embeddings.len()
            )));
        }
        if let Some(expected) = self.storage.vector_store.dimensions() {
            if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
                return Err(Error::Embedding(format!(
                    "Embedding has {} dimensions, index expects {}",
                    bad.len(),
                    expected
                )));
            }
        }
        Ok(nodes.into_iter().zip(embeddings).collect())
    }

    /// Add embedded nodes and record the source document hashes
    fn store_nodes(&mut self, documents: &[Document], embedded: Vec<(TextNode, Vec<f32>)>) -> Result<()> {
        let mut nodes = Vec::with_capacity(embedded.len());
        for (node, embedding) in embedded {
            let ref_doc_id = node.ref_doc_id.as_deref().unwrap_or(&node.id);
            self.storage.vector_store.add(&node.id, ref_doc_id, embedding)?;
            nodes.push(node);
        }
        self.storage.docstore.add_nodes(&nodes);
        for document in documents {
            self.storage
                .docstore
                .set_document_hash(&document.id, &document_hash(document));
        }

        let dimensions = self.storage.vector_store.dimensions();
        let index_struct = self.index_struct_mut()?;
        index_struct.node_ids.extend(nodes.iter().map(|n| n.id.clone()));
        if index_struct.dimensions.is_none() {
            index_struct.dimensions = dimensions;
        }
        Ok(())
    }

    async fn insert_documents(&mut self, documents: &[Document]) -> Result<()> {
        let embedded = self.embed_documents(documents).await?;
        self.store_nodes(documents, embedded)
    }

    /// Split, embed and add one document
    pub async fn insert(&mut self, document: Document) -> Result<()> {
        self.insert_documents(std::slice::from_ref(&document)).await
    }

    /// Remove a document and every node split from it
    pub fn delete_ref_doc(&mut self, doc_id: &str) -> Result<()> {
        let removed = self.storage.docstore.delete_ref_doc(doc_id);
        self.storage.vector_store.delete(doc_id)?;
        self.index_struct_mut()?
            .node_ids
            .retain(|id| !removed.contains(id));
        Ok(())
    }

    /// Insert new documents and re-embed changed ones.
    ///
    /// Returns, per input document, whether it was (re)indexed. A changed
    /// document keeps its old nodes until its new ones are embedded.
    pub async fn refresh(&mut self, documents: Vec<Document>) -> Result<Vec<bool>> {
        let mut refreshed = Vec::with_capacity(documents.len());
        for document in documents {
            let hash = document_hash(&document);
            let known = match self.storage.docstore.document_hash(&document.id) {
                Some(existing) if existing == hash => {
                    refreshed.push(false);
                    continue;
                }
                Some(_) => true,
                None => false,
            };

            tracing::debug!(doc_id = %document.id, "refreshing document");
            let batch = std::slice::from_ref(&document);
            let embedded = self.embed_documents(batch).await?;
            if known {
                self.delete_ref_doc(&document.id)?;
            }
            self.store_nodes(batch, embedded)?;
            refreshed.push(true);
        }
        Ok(refreshed)
    }

    /// Write the index to a directory
    pub fn persist(&self, persist_dir: impl AsRef<Path>) -> Result<()> {
        self.storage.persist(persist_dir)
    }

    /// Retriever returning the `similarity_top_k` closest nodes
    pub fn as_retriever(&self, similarity_top_k: usize) -> VectorIndexRetriever<'_> {
        VectorIndexRetriever::new(self, similarity_top_k)
    }

    /// Query engine answering with `llm`
    pub fn as_query_engine(
        &self,
        llm: Arc<dyn ChatModel>,
        options: QueryEngineOptions,
    ) -> RetrieverQueryEngine<'_> {
        RetrieverQueryEngine::from_options(self, llm, options)
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn embed_model(&self) -> &Arc<dyn EmbeddingModel> {
        &self.embed_model
    }

    pub fn storage_context(&self) -> &StorageContext {
        &self.storage
    }

    pub fn index_struct(&self) -> Result<&IndexStruct> {
        self.storage.index_store.resolve(Some(&self.index_id))
    }

    fn index_struct_mut(&mut self) -> Result<&mut IndexStruct> {
        let index_id = &self.index_id;
        self.storage
            .index_store
            .get_mut(index_id)
            .ok_or_else(|| Error::Storage(format!("Index {} not found in index store", index_id)))
    }

    pub fn node_count(&self) -> usize {
        self.storage.vector_store.count()
    }
}

/// Content hash used to detect changed documents
fn document_hash(document: &Document) -> String {
    let metadata = serde_json::to_string(&document.metadata).unwrap_or_default();
    format!("{:x}", md5::compute(format!("{}\u{0}{}", document.text, metadata)))
}
