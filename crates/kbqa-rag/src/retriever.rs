//! Similarity retriever over a vector store index

use kbqa_core::{NodeWithScore, Result, VectorStore, VectorStoreQuery};

use crate::index::VectorStoreIndex;

pub const DEFAULT_SIMILARITY_TOP_K: usize = 2;

/// Embeds the query and returns the closest nodes, best first
pub struct VectorIndexRetriever<'a> {
    index: &'a VectorStoreIndex,
    similarity_top_k: usize,
}

impl<'a> VectorIndexRetriever<'a> {
    pub fn new(index: &'a VectorStoreIndex, similarity_top_k: usize) -> Self {
        Self { index, similarity_top_k }
    }

    pub fn similarity_top_k(&self) -> usize {
        self.similarity_top_k
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<NodeWithScore>> {
        let storage = self.index.storage_context();
        if storage.vector_store.count() == 0 || self.similarity_top_k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.index.embed_model().embed_query(query).await?;
        let result = storage.vector_store.query(&VectorStoreQuery {
            embedding,
            similarity_top_k: self.similarity_top_k,
        })?;

        let nodes = storage.docstore.get_nodes(&result.ids)?;
        tracing::debug!(query = %query, hits = nodes.len(), "retrieved nodes");

        Ok(nodes
            .into_iter()
            .zip(result.similarities)
            .map(|(node, score)| NodeWithScore { node, score: Some(score) })
            .collect())
    }
}
