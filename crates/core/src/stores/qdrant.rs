use crate::store::{rank_hits, DistanceMetric};
use crate::traits::VectorIndex;
use crate::{Chunk, ChunkMetadata, IndexEntry, RetrievedChunk, SearchError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

const SCROLL_PAGE: usize = 256;
const TIE_MARGIN: usize = 16;

/// Vector index backed by a Qdrant collection over its REST API.
///
/// Point ids are random UUIDs; the insertion sequence travels in the payload
/// so ties can be broken the same way as the local store does. Ties are only
/// reordered among the `k + 16` candidates Qdrant returns, so a run of equal
/// scores longer than that margin may still be cut in Qdrant's own order.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    metric: DistanceMetric,
    write_lock: Mutex<()>,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        metric: DistanceMetric,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
            metric,
            write_lock: Mutex::new(()),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    /// Creates the collection when missing. An existing collection must match
    /// the vector size; its distance wins over the requested metric, the same
    /// way a local store keeps the metric in its manifest.
    pub async fn ensure_collection(&mut self) -> Result<(), SearchError> {
        let response = self.client.get(self.collection_url()).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            let response = self
                .client
                .put(self.collection_url())
                .json(&json!({
                    "vectors": { "size": self.vector_size, "distance": qdrant_distance(self.metric) }
                }))
                .send()
                .await?;
            expect_success(response.status())?;
        } else {
            expect_success(response.status())?;
            let parsed: Value = response.json().await?;
            let (size, stored_metric) = stored_vector_params(&parsed)?;

            if let Some(size) = size.filter(|size| *size != self.vector_size) {
                return Err(SearchError::DimensionMismatch {
                    expected: size,
                    actual: self.vector_size,
                });
            }
            if let Some(stored) = stored_metric.filter(|stored| *stored != self.metric) {
                warn!(
                    collection = %self.collection,
                    stored = %stored,
                    requested = %self.metric,
                    "keeping the distance the collection was created with"
                );
                self.metric = stored;
            }
        }

        // `order_by` on scroll needs a range index on the sequence field.
        // Creating it again is a no-op, so collections made elsewhere get it too.
        let response = self
            .client
            .put(format!("{}/index?wait=true", self.collection_url()))
            .json(&json!({ "field_name": "sequence", "field_schema": "integer" }))
            .send()
            .await?;
        expect_success(response.status())
    }

    async fn next_sequence(&self) -> Result<u64, SearchError> {
        let response = self
            .client
            .post(format!("{}/points/scroll", self.collection_url()))
            .json(&json!({
                "limit": 1,
                "with_payload": ["sequence"],
                "with_vector": false,
                "order_by": { "key": "sequence", "direction": "desc" },
            }))
            .send()
            .await?;
        expect_success(response.status())?;

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/points/0/payload/sequence")
            .and_then(Value::as_u64)
            .map_or(0, |sequence| sequence + 1))
    }
}

fn expect_success(status: StatusCode) -> Result<(), SearchError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: status.to_string(),
        })
    }
}

fn qdrant_distance(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "Cosine",
        DistanceMetric::L2 => "Euclid",
    }
}

/// Vector size and distance of an existing collection, from `GET collections/{name}`.
fn stored_vector_params(
    parsed: &Value,
) -> Result<(Option<usize>, Option<DistanceMetric>), SearchError> {
    let params = parsed.pointer("/result/config/params/vectors");
    let size = params
        .and_then(|vectors| vectors.get("size"))
        .and_then(Value::as_u64)
        .map(|size| size as usize);

    let metric = match params
        .and_then(|vectors| vectors.get("distance"))
        .and_then(Value::as_str)
    {
        None => None,
        Some("Cosine") => Some(DistanceMetric::Cosine),
        Some("Euclid") => Some(DistanceMetric::L2),
        Some(other) => {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!("unsupported collection distance `{other}`"),
            })
        }
    };

    Ok((size, metric))
}

/// Qdrant decides ties at the cut-off itself, so a few extra candidates are
/// fetched and ranked locally before truncating to `k`.
fn search_body(query_vector: &[f32], k: usize) -> Value {
    json!({
        "vector": query_vector,
        "limit": k + TIE_MARGIN,
        "with_payload": true,
    })
}

fn parse_point(point: &Value) -> Option<(Chunk, u64)> {
    let text = point.pointer("/payload/text")?.as_str()?.to_string();
    let source = point
        .pointer("/payload/source")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let original_filename = point
        .pointer("/payload/original_filename")
        .and_then(Value::as_str)
        .map(str::to_string);
    let sequence = point
        .pointer("/payload/sequence")
        .and_then(Value::as_u64)
        .unwrap_or(u64::MAX);

    Some((
        Chunk {
            text,
            metadata: ChunkMetadata {
                source,
                original_filename,
            },
        },
        sequence,
    ))
}

fn parse_search_hits(parsed: &Value) -> Vec<RetrievedChunk> {
    parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let (chunk, sequence) = parse_point(hit)?;
                    let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
                    Some(RetrievedChunk {
                        chunk,
                        score: score as f32,
                        sequence,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn dimensions(&self) -> usize {
        self.vector_size
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn add(&self, entries: &[IndexEntry]) -> Result<(), SearchError> {
        if entries.is_empty() {
            return Ok(());
        }

        if let Some(bad) = entries.iter().find(|entry| entry.vector.len() != self.vector_size) {
            return Err(SearchError::DimensionMismatch {
                expected: self.vector_size,
                actual: bad.vector.len(),
            });
        }

        // Sequences are allocated per process; concurrent writers from other
        // processes may interleave them.
        let _guard = self.write_lock.lock().await;
        let first_sequence = self.next_sequence().await?;

        let points = entries
            .iter()
            .enumerate()
            .map(|(offset, entry)| {
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": entry.vector,
                    "payload": {
                        "text": entry.chunk.text,
                        "source": entry.chunk.metadata.source,
                        "original_filename": entry.chunk.metadata.original_filename,
                        "sequence": first_sequence + offset as u64,
                    },
                })
            })
            .collect::<Vec<_>>();

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        expect_success(response.status())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        if query_vector.len() != self.vector_size {
            return Err(SearchError::DimensionMismatch {
                expected: self.vector_size,
                actual: query_vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&search_body(query_vector, k))
            .send()
            .await?;
        expect_success(response.status())?;

        let parsed: Value = response.json().await?;
        Ok(rank_hits(parse_search_hits(&parsed), self.metric, k))
    }

    async fn count(&self) -> Result<usize, SearchError> {
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        expect_success(response.status())?;

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: "count response without result.count".to_string(),
            })
    }

    async fn list_metadata(&self) -> Result<Vec<ChunkMetadata>, SearchError> {
        let mut metadata = Vec::new();
        let mut offset = Value::Null;

        loop {
            let response = self
                .client
                .post(format!("{}/points/scroll", self.collection_url()))
                .json(&json!({
                    "limit": SCROLL_PAGE,
                    "offset": offset,
                    "with_payload": true,
                    "with_vector": false,
                }))
                .send()
                .await?;
            expect_success(response.status())?;

            let parsed: Value = response.json().await?;
            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            metadata.extend(points.iter().filter_map(parse_point).map(|(chunk, _)| chunk.metadata));

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() {
                break;
            }
        }

        Ok(metadata)
    }
}
