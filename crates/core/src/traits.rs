use crate::store::DistanceMetric;
use crate::{
    ChunkMetadata, EmbeddingError, GenerationError, IndexEntry, RetrievedChunk, SearchError,
};
use async_trait::async_trait;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Vector length, once known. Remote embedders learn it on the first call.
    fn dimensions(&self) -> Option<usize>;

    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dimensions(&self) -> usize;

    fn metric(&self) -> DistanceMetric;

    async fn add(&self, entries: &[IndexEntry]) -> Result<(), SearchError>;

    /// Top `k` entries ordered by relevance, ties broken by insertion order.
    async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError>;

    async fn count(&self) -> Result<usize, SearchError>;

    async fn list_metadata(&self) -> Result<Vec<ChunkMetadata>, SearchError>;
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Box<T> {
    fn dimensions(&self) -> Option<usize> {
        (**self).dimensions()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text).await
    }
}

#[async_trait]
impl<T: LanguageModel + ?Sized> LanguageModel for Box<T> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        (**self).complete(prompt).await
    }
}

#[async_trait]
impl<T: VectorIndex + ?Sized> VectorIndex for Box<T> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn metric(&self) -> DistanceMetric {
        (**self).metric()
    }

    async fn add(&self, entries: &[IndexEntry]) -> Result<(), SearchError> {
        (**self).add(entries).await
    }

    async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        (**self).search(query_vector, k).await
    }

    async fn count(&self) -> Result<usize, SearchError> {
        (**self).count().await
    }

    async fn list_metadata(&self) -> Result<Vec<ChunkMetadata>, SearchError> {
        (**self).list_metadata().await
    }
}
