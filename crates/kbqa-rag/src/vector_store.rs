//! In-memory vector store

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use kbqa_core::{
    Error, Result, VectorStore, VectorStoreQuery, VectorStoreQueryResult, cosine_similarity,
};

/// Embeddings held in memory and scanned exhaustively at query time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleVectorStore {
    embedding_dict: BTreeMap<String, Vec<f32>>,
    text_id_to_ref_doc_id: BTreeMap<String, String>,
}

impl SimpleVectorStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Length of the stored vectors, if any are stored
    pub fn dimensions(&self) -> Option<usize> {
        self.embedding_dict.values().next().map(Vec::len)
    }

    pub fn get(&self, node_id: &str) -> Option<&Vec<f32>> {
        self.embedding_dict.get(node_id)
    }
}

impl VectorStore for SimpleVectorStore {
    fn add(&mut self, node_id: &str, ref_doc_id: &str, embedding: Vec<f32>) -> Result<()> {
        if let Some(dims) = self.dimensions() {
            if dims != embedding.len() && !self.embedding_dict.contains_key(node_id) {
                return Err(Error::VectorStore(format!(
                    "Embedding for node {} has {} dimensions, store holds {}",
                    node_id,
                    embedding.len(),
                    dims
                )));
            }
        }
        self.embedding_dict.insert(node_id.to_string(), embedding);
        self.text_id_to_ref_doc_id
            .insert(node_id.to_string(), ref_doc_id.to_string());
        Ok(())
    }

    fn delete(&mut self, ref_doc_id: &str) -> Result<()> {
        let node_ids: Vec<String> = self
            .text_id_to_ref_doc_id
            .iter()
            .filter(|(_, doc_id)| doc_id.as_str() == ref_doc_id)
            .map(|(node_id, _)| node_id.clone())
            .collect();

        for node_id in node_ids {
            self.embedding_dict.remove(&node_id);
            self.text_id_to_ref_doc_id.remove(&node_id);
        }
        Ok(())
    }

    fn query(&self, query: &VectorStoreQuery) -> Result<VectorStoreQueryResult> {
        let mut scored: Vec<(f32, &String)> = self
            .embedding_dict
            .iter()
            .map(|(id, embedding)| (cosine_similarity(&query.embedding, embedding), id))
            .collect();

        // Sort by similarity (highest first), then by id for stable ties
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });
        scored.truncate(query.similarity_top_k);

        Ok(VectorStoreQueryResult {
            ids: scored.iter().map(|(_, id)| (*id).clone()).collect(),
            similarities: scored.iter().map(|(score, _)| *score).collect(),
        })
    }

    fn count(&self) -> usize {
        self.embedding_dict.len()
    }
}
