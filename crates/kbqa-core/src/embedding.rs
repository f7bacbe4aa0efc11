//! Embedding model trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Whether text is being embedded for storage or for lookup.
///
/// Some providers embed queries and documents asymmetrically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextType {
    Document,
    Query,
}

/// Trait for embedding models
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed a batch of texts. The output has one vector per input, in input order.
    async fn embed(&self, texts: &[String], text_type: TextType) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[query.to_string()], TextType::Query).await?;
        vectors
            .pop()
            .ok_or_else(|| crate::Error::Embedding("No embedding returned for query".to_string()))
    }

    /// Identifier recorded with persisted indexes
    fn model_name(&self) -> &str;

    /// Maximum number of texts sent in one request
    fn batch_size(&self) -> usize;
}
