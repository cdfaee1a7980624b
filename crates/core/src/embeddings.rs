use crate::traits::Embedder;
use crate::{ConfigError, EmbeddingError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::OnceLock;
use url::Url;

const DEFAULT: usize = 256;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Deterministic offline embedder: hashes lowercase words and character
/// trigrams into a fixed number of buckets, then L2-normalises.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl HashingEmbedder {
    /// At least one bucket is always kept.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn vector_len(&self) -> usize {
        self.dimensions
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimensions;
        let mut vector = vec![0f32; buckets];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let slot = bucket(word.as_bytes(), buckets);
            vector[slot] += 2.0;

            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram = window.iter().collect::<String>();
                let slot = bucket(trigram.as_bytes(), buckets);
                vector[slot] += 1.0;
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

fn bucket(bytes: &[u8], buckets: usize) -> usize {
    let mut hash = 1469598103934665603u64;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % buckets as u64) as usize
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions)
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}

/// Embeddings served by an Ollama daemon (`/api/embeddings`).
pub struct OllamaEmbedder {
    endpoint: Url,
    model: String,
    client: Client,
    dimensions: OnceLock<usize>,
}

impl OllamaEmbedder {
    pub fn new(endpoint: &str, model: impl Into<String>) -> Result<Self, ConfigError> {
        let base = Url::parse(endpoint).map_err(|error| ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            details: error.to_string(),
        })?;
        let endpoint = base
            .join("api/embeddings")
            .map_err(|error| ConfigError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                details: error.to_string(),
            })?;

        Ok(Self {
            endpoint,
            model: model.into(),
            client: Client::new(),
            dimensions: OnceLock::new(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dimensions(&self) -> Option<usize> {
        self.dimensions.get().copied()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({
                "model": self.model,
                "prompt": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let vector = parse_embedding_response(&parsed)?;

        let expected = *self.dimensions.get_or_init(|| vector.len());
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }
}

fn parse_embedding_response(payload: &Value) -> Result<Vec<f32>, EmbeddingError> {
    let values = payload
        .pointer("/embedding")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            EmbeddingError::MalformedResponse("response has no `embedding` array".to_string())
        })?;

    if values.is_empty() {
        return Err(EmbeddingError::MalformedResponse(
            "embedding array is empty".to_string(),
        ));
    }

    values
        .iter()
        .map(|value| {
            value.as_f64().map(|number| number as f32).ok_or_else(|| {
                EmbeddingError::MalformedResponse(format!("non-numeric component {value}"))
            })
        })
        .collect()
}
