use crate::generation::PromptFormat;
use crate::store::DistanceMetric;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChunkMetadata {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
}

impl ChunkMetadata {
    /// Display name of the originating document: the upload name when known,
    /// otherwise the last path segment of the source.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.original_filename {
            return name.clone();
        }

        self.source
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
    pub sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub rank: usize,
    pub snippet: String,
    pub source: String,
    pub original_filename: Option<String>,
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexedFile {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StoreStatus {
    Ready,
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub entry_count: Option<usize>,
    pub model_name: String,
    pub embedding_model: String,
    pub status: StoreStatus,
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct IngestionSummary {
    pub documents_processed: usize,
    pub chunks_added: usize,
    pub skipped_files: Vec<SkippedPdf>,
    pub completed_at: DateTime<Utc>,
}

impl IngestionSummary {
    pub fn documents_skipped(&self) -> usize {
        self.skipped_files.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub ollama_url: String,
    pub model_name: String,
    pub embedding_model: String,
    pub persist_dir: PathBuf,
    pub collection: String,
    pub prompt_format: PromptFormat,
    pub metric: DistanceMetric,
    pub top_k: usize,
    pub search_k: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:3b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            persist_dir: PathBuf::from("./chroma_store"),
            collection: "rag_docs".to_string(),
            prompt_format: PromptFormat::Llama3Chat,
            metric: DistanceMetric::Cosine,
            top_k: 3,
            search_k: 10,
        }
    }
}
