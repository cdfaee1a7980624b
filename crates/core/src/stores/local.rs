use crate::store::{rank_hits, DistanceMetric};
use crate::traits::VectorIndex;
use crate::{
    Chunk, ChunkMetadata, ConfigError, IndexEntry, RetrievedChunk, SearchError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

const MANIFEST_FILE: &str = "manifest.json";
const ENTRIES_FILE: &str = "entries.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    dimensions: usize,
    metric: DistanceMetric,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    id: Uuid,
    sequence: u64,
    vector: Vec<f32>,
    text: String,
    metadata: ChunkMetadata,
    ingested_at: DateTime<Utc>,
}

/// File-backed vector index: a manifest plus an append-only JSON-lines log,
/// mirrored in memory and scanned exhaustively on search.
pub struct LocalVectorStore {
    location: PathBuf,
    dimensions: usize,
    metric: DistanceMetric,
    entries: RwLock<Vec<StoredEntry>>,
}

impl LocalVectorStore {
    /// Opens (or creates) the store under `location`. Reopening restores every
    /// entry added before; a store built for another dimensionality is refused.
    pub async fn open(
        location: impl Into<PathBuf>,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<Self, ConfigError> {
        let location = location.into();
        fs::create_dir_all(&location).await.map_err(SearchError::from)?;

        let manifest_path = location.join(MANIFEST_FILE);
        let metric = if fs::try_exists(&manifest_path).await.map_err(SearchError::from)? {
            let raw = fs::read(&manifest_path).await.map_err(SearchError::from)?;
            let manifest: Manifest = serde_json::from_slice(&raw).map_err(SearchError::from)?;

            if manifest.dimensions != dimensions {
                return Err(ConfigError::DimensionMismatch {
                    location: location.display().to_string(),
                    expected: manifest.dimensions,
                    actual: dimensions,
                });
            }
            if manifest.metric != metric {
                warn!(
                    location = %location.display(),
                    stored = %manifest.metric,
                    requested = %metric,
                    "keeping the metric the index was created with"
                );
            }
            manifest.metric
        } else {
            let manifest = Manifest {
                dimensions,
                metric,
                created_at: Utc::now(),
            };
            let raw = serde_json::to_vec_pretty(&manifest).map_err(SearchError::from)?;
            fs::write(&manifest_path, raw).await.map_err(SearchError::from)?;
            metric
        };

        let entries = load_entries(&location.join(ENTRIES_FILE)).await?;
        debug!(location = %location.display(), entries = entries.len(), "opened local vector store");

        Ok(Self {
            location,
            dimensions,
            metric,
            entries: RwLock::new(entries),
        })
    }

}

/// Reads the entry log. An unterminated last line is what a crash in the
/// middle of an append leaves behind; it is cut off so the log ends on a
/// complete record again.
async fn load_entries(path: &Path) -> Result<Vec<StoredEntry>, SearchError> {
    if !fs::try_exists(path).await? {
        return Ok(Vec::new());
    }

    let mut raw = fs::read_to_string(path).await?;
    if !raw.is_empty() && !raw.ends_with('\n') {
        let keep = raw.rfind('\n').map_or(0, |newline| newline + 1);
        warn!(
            path = %path.display(),
            dropped_bytes = raw.len() - keep,
            "discarding torn record at the end of the entry log"
        );
        let file = OpenOptions::new().write(true).open(path).await?;
        file.set_len(keep as u64).await?;
        file.sync_data().await?;
        raw.truncate(keep);
    }

    let mut entries = Vec::new();
    for line in raw.lines().filter(|line| !line.trim().is_empty()) {
        entries.push(serde_json::from_str::<StoredEntry>(line)?);
    }
    entries.sort_by_key(|entry| entry.sequence);
    Ok(entries)
}

/// Appends `lines` and syncs. On failure the file is cut back to its previous
/// length so a later append never lands after a partial record.
async fn append_lines(path: &Path, lines: &str) -> Result<(), SearchError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let committed = file.metadata().await?.len();

    let written = match file.write_all(lines.as_bytes()).await {
        Ok(()) => file.sync_data().await,
        Err(error) => Err(error),
    };

    if let Err(error) = written {
        if let Err(rollback) = file.set_len(committed).await {
            warn!(path = %path.display(), error = %rollback, "could not roll back partial append");
        }
        return Err(error.into());
    }
    Ok(())
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn add(&self, entries: &[IndexEntry]) -> Result<(), SearchError> {
        if entries.is_empty() {
            return Ok(());
        }

        if let Some(bad) = entries.iter().find(|entry| entry.vector.len() != self.dimensions) {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.vector.len(),
            });
        }

        let mut stored = self.entries.write().await;
        let first_sequence = stored.last().map_or(0, |entry| entry.sequence + 1);
        let ingested_at = Utc::now();

        let records = entries
            .iter()
            .enumerate()
            .map(|(offset, entry)| StoredEntry {
                id: Uuid::new_v4(),
                sequence: first_sequence + offset as u64,
                vector: entry.vector.clone(),
                text: entry.chunk.text.clone(),
                metadata: entry.chunk.metadata.clone(),
                ingested_at,
            })
            .collect::<Vec<_>>();

        let mut lines = String::new();
        for record in &records {
            lines.push_str(&serde_json::to_string(record)?);
            lines.push('\n');
        }

        append_lines(&self.location.join(ENTRIES_FILE), &lines).await?;

        stored.extend(records);
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        if query_vector.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }

        let stored = self.entries.read().await;
        let hits = stored
            .iter()
            .map(|entry| RetrievedChunk {
                chunk: Chunk {
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                },
                score: self.metric.score(query_vector, &entry.vector),
                sequence: entry.sequence,
            })
            .collect();

        Ok(rank_hits(hits, self.metric, k))
    }

    async fn count(&self) -> Result<usize, SearchError> {
        Ok(self.entries.read().await.len())
    }

    async fn list_metadata(&self) -> Result<Vec<ChunkMetadata>, SearchError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|entry| entry.metadata.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(text: &str, source: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            vector,
            chunk: Chunk {
                text: text.to_string(),
                metadata: ChunkMetadata {
                    source: source.to_string(),
                    original_filename: None,
                },
            },
        }
    }

    #[tokio::test]
    async fn empty_store_searches_to_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::open(dir.path(), 3, DistanceMetric::Cosine).await?;

        assert_eq!(store.count().await?, 0);
        assert!(store.search(&[1.0, 0.0, 0.0], 3).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn search_orders_by_similarity() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::open(dir.path(), 2, DistanceMetric::Cosine).await?;
        store
            .add(&[
                entry("east", "a.pdf", vec![1.0, 0.0]),
                entry("north", "a.pdf", vec![0.0, 1.0]),
                entry("north-east", "a.pdf", vec![1.0, 1.0]),
            ])
            .await?;

        let hits = store.search(&[1.0, 0.1], 3).await?;
        let texts: Vec<&str> = hits.iter().map(|hit| hit.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["east", "north-east", "north"]);
        assert!(hits[0].score >= hits[1].score && hits[1].score >= hits[2].score);
        Ok(())
    }

    #[tokio::test]
    async fn equal_scores_keep_insertion_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::open(dir.path(), 2, DistanceMetric::L2).await?;
        store.add(&[entry("first", "a.pdf", vec![0.5, 0.5])]).await?;
        store
            .add(&[
                entry("second", "b.pdf", vec![0.5, 0.5]),
                entry("third", "b.pdf", vec![0.5, 0.5]),
            ])
            .await?;

        let hits = store.search(&[0.5, 0.5], 3).await?;
        let order: Vec<u64> = hits.iter().map(|hit| hit.sequence).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(hits[0].chunk.text, "first");
        Ok(())
    }

    #[tokio::test]
    async fn reopening_recovers_entries() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let store = LocalVectorStore::open(dir.path(), 2, DistanceMetric::Cosine).await?;
            store
                .add(&[
                    entry("one", "a.pdf", vec![1.0, 0.0]),
                    entry("two", "a.pdf", vec![0.0, 1.0]),
                ])
                .await?;
        }

        let reopened = LocalVectorStore::open(dir.path(), 2, DistanceMetric::Cosine).await?;
        assert_eq!(reopened.count().await?, 2);

        reopened.add(&[entry("three", "b.pdf", vec![1.0, 1.0])]).await?;
        let hits = reopened.search(&[1.0, 1.0], 1).await?;
        assert_eq!(hits[0].chunk.text, "three");
        assert_eq!(hits[0].sequence, 2);
        Ok(())
    }

    #[tokio::test]
    async fn torn_final_record_is_dropped_on_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let store = LocalVectorStore::open(dir.path(), 2, DistanceMetric::Cosine).await?;
            store
                .add(&[
                    entry("one", "a.pdf", vec![1.0, 0.0]),
                    entry("two", "a.pdf", vec![0.0, 1.0]),
                ])
                .await?;
        }
        let log = dir.path().join(ENTRIES_FILE);
        let mut file = OpenOptions::new().append(true).open(&log).await?;
        file.write_all(br#"{"id":"0000"#).await?;
        file.sync_data().await?;
        drop(file);

        let reopened = LocalVectorStore::open(dir.path(), 2, DistanceMetric::Cosine).await?;
        assert_eq!(reopened.count().await?, 2);
        assert!(fs::read_to_string(&log).await?.ends_with('\n'));

        reopened.add(&[entry("three", "b.pdf", vec![1.0, 1.0])]).await?;
        drop(reopened);

        let again = LocalVectorStore::open(dir.path(), 2, DistanceMetric::Cosine).await?;
        assert_eq!(again.count().await?, 3);
        let hits = again.search(&[1.0, 1.0], 1).await?;
        assert_eq!(hits[0].chunk.text, "three");
        assert_eq!(hits[0].sequence, 2);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_adds_are_kept() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::open(dir.path(), 2, DistanceMetric::Cosine).await?;
        let batch = [entry("same", "a.pdf", vec![1.0, 0.0])];
        store.add(&batch).await?;
        store.add(&batch).await?;

        assert_eq!(store.count().await?, 2);
        assert_eq!(store.list_metadata().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn reopening_with_other_dimensions_is_refused() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        LocalVectorStore::open(dir.path(), 4, DistanceMetric::Cosine).await?;

        let result = LocalVectorStore::open(dir.path(), 8, DistanceMetric::Cosine).await;
        assert!(matches!(
            result,
            Err(ConfigError::DimensionMismatch {
                expected: 4,
                actual: 8,
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_vectors_fail_the_whole_batch() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::open(dir.path(), 2, DistanceMetric::Cosine).await?;

        let result = store
            .add(&[
                entry("ok", "a.pdf", vec![1.0, 0.0]),
                entry("bad", "a.pdf", vec![1.0, 0.0, 0.0]),
            ])
            .await;

        assert!(matches!(result, Err(SearchError::DimensionMismatch { .. })));
        assert_eq!(store.count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn stored_metric_wins_over_requested_metric() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        LocalVectorStore::open(dir.path(), 2, DistanceMetric::L2).await?;
        let reopened = LocalVectorStore::open(dir.path(), 2, DistanceMetric::Cosine).await?;
        assert_eq!(reopened.metric(), DistanceMetric::L2);
        Ok(())
    }
}
