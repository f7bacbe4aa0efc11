//! Vector store trait and types

use serde::{Deserialize, Serialize};

use crate::Result;

/// Query against a vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreQuery {
    pub embedding: Vec<f32>,
    pub similarity_top_k: usize,
}

/// Matching node ids with their similarities, best first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStoreQueryResult {
    pub ids: Vec<String>,
    pub similarities: Vec<f32>,
}

/// Trait for vector stores
///
/// Stores hold only embeddings keyed by node id; node text lives in the doc store.
pub trait VectorStore: Send + Sync {
    /// Store an embedding for a node that belongs to `ref_doc_id`
    fn add(&mut self, node_id: &str, ref_doc_id: &str, embedding: Vec<f32>) -> Result<()>;

    /// Remove every embedding that belongs to `ref_doc_id`
    fn delete(&mut self, ref_doc_id: &str) -> Result<()>;

    /// Find the most similar embeddings
    fn query(&self, query: &VectorStoreQuery) -> Result<VectorStoreQueryResult>;

    /// Get the total number of stored embeddings
    fn count(&self) -> usize;
}

/// Cosine similarity; zero for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
