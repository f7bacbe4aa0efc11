//! DashScope text-embedding client

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use kbqa_core::{EmbeddingModel, Error, Result, TextType};

use crate::config::DashScopeConfig;

/// Known DashScope text-embedding models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEmbeddingModel {
    V1,
    V2,
    V3,
}

impl TextEmbeddingModel {
    pub fn name(&self) -> &'static str {
        match self {
            TextEmbeddingModel::V1 => "text-embedding-v1",
            TextEmbeddingModel::V2 => "text-embedding-v2",
            TextEmbeddingModel::V3 => "text-embedding-v3",
        }
    }

    /// Largest number of texts the service accepts per request
    pub fn max_batch_size(&self) -> usize {
        match self {
            TextEmbeddingModel::V1 | TextEmbeddingModel::V2 => 25,
            TextEmbeddingModel::V3 => 10,
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            TextEmbeddingModel::V1 | TextEmbeddingModel::V2 => 1536,
            TextEmbeddingModel::V3 => 1024,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "text-embedding-v1" => Some(TextEmbeddingModel::V1),
            "text-embedding-v2" => Some(TextEmbeddingModel::V2),
            "text-embedding-v3" => Some(TextEmbeddingModel::V3),
            _ => None,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct EmbeddingRequest<'a> {
    pub model: &'a str,
    pub input: EmbeddingInput<'a>,
    pub parameters: EmbeddingParameters,
}

#[derive(Serialize)]
pub(crate) struct EmbeddingInput<'a> {
    pub texts: &'a [String],
}

#[derive(Serialize)]
pub(crate) struct EmbeddingParameters {
    pub text_type: TextType,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    output: EmbeddingOutput,
}

#[derive(Deserialize)]
struct EmbeddingOutput {
    embeddings: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    text_index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ServiceError {
    code: Option<String>,
    message: Option<String>,
}

/// Embedding model backed by the DashScope text-embedding service
pub struct DashScopeEmbedding {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    batch_size: usize,
}

impl DashScopeEmbedding {
    /// Create a new embedding client
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        let model = model.into();
        let batch_size = TextEmbeddingModel::from_name(&model)
            .map(|m| m.max_batch_size())
            .unwrap_or(10);

        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            model,
            batch_size,
        })
    }

    /// Create a new embedding client from configuration
    pub fn from_config(config: &DashScopeConfig) -> Result<Self> {
        Self::new(&config.embedding_url, &config.api_key, &config.embedding_model)
    }

    /// Create a new embedding client from environment variables
    pub fn from_env() -> Result<Self> {
        let config = DashScopeConfig::from_env()?;
        Self::from_config(&config)
    }

    /// Lower the per-request batch size; values above the model limit are clamped
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        let limit = TextEmbeddingModel::from_name(&self.model)
            .map(|m| m.max_batch_size())
            .unwrap_or(batch_size);
        self.batch_size = batch_size.clamp(1, limit.max(1));
        self
    }

    async fn embed_batch(&self, texts: &[String], text_type: TextType) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: EmbeddingInput { texts },
            parameters: EmbeddingParameters { text_type },
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !status.is_success() {
            let detail = describe_service_error(&body);
            if status == StatusCode::UNAUTHORIZED {
                return Err(Error::Authentication(detail));
            }
            return Err(Error::Embedding(format!(
                "Embedding request failed with status {}: {}",
                status, detail
            )));
        }

        parse_embedding_response(&body, texts.len())
    }
}

fn describe_service_error(body: &str) -> String {
    match serde_json::from_str::<ServiceError>(body) {
        Ok(ServiceError { code: Some(code), message: Some(message) }) => format!("{}: {}", code, message),
        Ok(ServiceError { message: Some(message), .. }) => message,
        _ => body.to_string(),
    }
}

/// Parse a service response, restoring input order
pub(crate) fn parse_embedding_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let response: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| Error::Serialization(e.to_string()))?;

    let mut items = response.output.embeddings;
    items.sort_by_key(|item| item.text_index);

    if items.len() != expected || items.iter().enumerate().any(|(i, item)| item.text_index != i) {
        return Err(Error::Embedding(format!(
            "Expected {} embeddings, service returned indices {:?}",
            expected,
            items.iter().map(|item| item.text_index).collect::<Vec<_>>()
        )));
    }

    Ok(items.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl EmbeddingModel for DashScopeEmbedding {
    async fn embed(&self, texts: &[String], text_type: TextType) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            tracing::debug!(batch = i, size = batch.len(), model = %self.model, "embedding batch");
            vectors.extend(self.embed_batch(batch, text_type).await?);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}
