//! Offline hashed bag-of-words embeddings

use async_trait::async_trait;

use kbqa_core::{EmbeddingModel, Error, Result, TextType};

pub const DEFAULT_LOCAL_DIMENSIONS: usize = 384;

/// Deterministic feature-hashing embedding that needs no network.
///
/// Words and word bigrams are hashed into a fixed number of buckets; runs of
/// non-ASCII letters (CJK text has no spaces) contribute character bigrams.
/// Good enough for tests and offline smoke runs, not for real retrieval.
#[derive(Debug, Clone)]
pub struct LocalHashEmbedding {
    dimensions: usize,
    name: String,
}

impl Default for LocalHashEmbedding {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_DIMENSIONS)
    }
}

impl LocalHashEmbedding {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            name: format!("local-hash-{}", dimensions),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn bucket(&self, feature: &str) -> (usize, usize) {
        let digest = md5::compute(feature.as_bytes()).0;
        let a = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        let b = u64::from_le_bytes([
            digest[8], digest[9], digest[10], digest[11], digest[12], digest[13], digest[14],
            digest[15],
        ]);
        let dims = self.dimensions as u64;
        ((a % dims) as usize, (b % dims) as usize)
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let mut embedding = vec![0.0f32; self.dimensions];
        let mut add = |feature: &str, weight: f32| {
            let (primary, secondary) = self.bucket(feature);
            embedding[primary] += weight;
            embedding[secondary] += weight * 0.5;
        };

        for word in &words {
            add(word, 1.0);
            if !word.is_ascii() {
                let chars: Vec<char> = word.chars().collect();
                for pair in chars.windows(2) {
                    add(&pair.iter().collect::<String>(), 0.8);
                }
            }
        }
        for pair in words.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.8);
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in embedding.iter_mut() {
                *value /= magnitude;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingModel for LocalHashEmbedding {
    async fn embed(&self, texts: &[String], _text_type: TextType) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(Error::Embedding("No texts to embed".to_string()));
        }
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn batch_size(&self) -> usize {
        usize::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbqa_core::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic_and_normalized() {
        let model = LocalHashEmbedding::default();
        let texts = vec!["Rust ownership rules".to_string()];
        let first = model.embed(&texts, TextType::Document).await.unwrap();
        let second = model.embed(&texts, TextType::Query).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].len(), 384);
        let norm: f32 = first[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(model.model_name(), "local-hash-384");
    }

    #[tokio::test]
    async fn test_related_text_scores_higher() {
        let model = LocalHashEmbedding::new(256);
        let query = model.embed_query("财务部 负责人").await.unwrap();
        let related = model.embed_query("财务部的负责人是张三").await.unwrap();
        let unrelated = model.embed_query("the weather is sunny today").await.unwrap();

        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let model = LocalHashEmbedding::default();
        assert!(model.embed(&[], TextType::Document).await.is_err());
    }
}
