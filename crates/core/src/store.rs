use crate::models::RetrievedChunk;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Similarity metric fixed for the lifetime of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DistanceMetric {
    /// Cosine similarity, higher is closer.
    #[default]
    Cosine,
    /// Euclidean distance, lower is closer.
    L2,
}

impl DistanceMetric {
    pub fn score(self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => cosine_similarity(query, candidate),
            DistanceMetric::L2 => query
                .iter()
                .zip(candidate)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt(),
        }
    }

    /// Orders two scores so that the more relevant one comes first.
    pub fn compare(self, left: f32, right: f32) -> Ordering {
        match self {
            DistanceMetric::Cosine => right.total_cmp(&left),
            DistanceMetric::L2 => left.total_cmp(&right),
        }
    }

    /// Maps a raw score onto `[0, 1]`, higher meaning more relevant.
    pub fn relevance(self, score: f32) -> f64 {
        let score = score as f64;
        let relevance = match self {
            DistanceMetric::Cosine => score.clamp(0.0, 1.0),
            DistanceMetric::L2 if score <= 1.0 => (1.0 - score).max(0.0),
            DistanceMetric::L2 => 1.0 / (1.0 + score),
        };
        (relevance * 100.0).round() / 100.0
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Cosine => f.write_str("cosine"),
            DistanceMetric::L2 => f.write_str("l2"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "l2" | "euclid" | "euclidean" => Ok(DistanceMetric::L2),
            other => Err(format!("unknown distance metric `{other}`")),
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Sorts hits by relevance, earliest insertion first on ties, and keeps `k`.
pub fn rank_hits(mut hits: Vec<RetrievedChunk>, metric: DistanceMetric, k: usize) -> Vec<RetrievedChunk> {
    hits.sort_by(|left, right| {
        metric
            .compare(left.score, right.score)
            .then(left.sequence.cmp(&right.sequence))
    });
    hits.truncate(k);
    hits
}
