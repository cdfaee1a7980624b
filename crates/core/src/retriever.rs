use crate::traits::{Embedder, VectorIndex};
use crate::{RetrievedChunk, SearchError};
use tracing::debug;

/// Embeds a query with the indexing embedder and asks the index for the
/// nearest chunks.
pub struct Retriever<'a, E: ?Sized, V: ?Sized> {
    embedder: &'a E,
    index: &'a V,
}

impl<'a, E, V> Retriever<'a, E, V>
where
    E: Embedder + ?Sized,
    V: VectorIndex + ?Sized,
{
    pub fn new(embedder: &'a E, index: &'a V) -> Self {
        Self { embedder, index }
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, SearchError> {
        validate_request(query, k)?;

        let query_vector = self.embedder.embed(query).await?;
        let hits = self.index.search(&query_vector, k).await?;

        debug!(k, hits = hits.len(), "retrieved chunks");
        for (position, hit) in hits.iter().enumerate() {
            debug!(
                rank = position + 1,
                score = hit.score,
                preview = %preview(&hit.chunk.text, 100),
                "retrieved chunk"
            );
        }

        Ok(hits)
    }
}

pub fn validate_request(query: &str, k: usize) -> Result<(), SearchError> {
    if query.trim().is_empty() {
        return Err(SearchError::InvalidArgument("query is empty".to_string()));
    }
    if k == 0 {
        return Err(SearchError::InvalidArgument(
            "k must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut preview: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        preview.push_str("...");
    }
    preview
}
