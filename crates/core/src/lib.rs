pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{build_chunks, normalize_whitespace, split_text, ChunkingConfig};
pub use embeddings::{HashingEmbedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    ConfigError, EmbeddingError, GenerationError, IngestError, QueryError, SearchError,
};
pub use extractor::{extract_document_text, LopdfExtractor, PageText, PdfExtractor};
pub use generation::{simple_prompt, AnswerGenerator, OllamaModel, PromptFormat};
pub use ingest::{
    discover_pdf_files, index_chunks, ingest_folder, ingest_pdfs, ingest_pdfs_with,
    ingest_upload, upload_source_id,
};
pub use models::{
    Answer, Chunk, ChunkMetadata, IndexEntry, IndexedFile, IngestionOptions, IngestionSummary,
    RagSettings, RetrievedChunk, SearchHit, SkippedPdf, StoreStats, StoreStatus,
};
pub use orchestrator::{
    build_context, connect, initialize, is_low_confidence, probe_embedder, probe_model,
    OllamaContext, RagContext, LOW_CONFIDENCE_PHRASES, QUERY_ERROR_PREFIX,
    SIMPLE_QUERY_ERROR_PREFIX,
};
pub use retriever::Retriever;
pub use store::{cosine_similarity, DistanceMetric};
pub use stores::{LocalVectorStore, QdrantStore};
pub use traits::{Embedder, LanguageModel, VectorIndex};
