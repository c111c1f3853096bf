use serde::{Deserialize, Serialize};

use super::vector_store::ChunkMeta;

/// Neighbors fetched per query.
pub const TOP_K: usize = 5;
/// Minimum best-match similarity before retrieved context is trusted.
pub const CONFIDENCE_THRESHOLD: f32 = 0.25;

/// One retrieved passage with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub text: String,
    pub source: String,
    pub chunk_id: usize,
    pub similarity: f32,
}

/// Maps squared distance into `(0, 1]`: identical vectors score 1.0 and the
/// score decays monotonically as distance grows, with no division by zero.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

pub fn score_hits(hits: Vec<(ChunkMeta, f32)>) -> Vec<ScoredChunk> {
    hits.into_iter()
        .map(|(meta, distance)| ScoredChunk {
            text: meta.text,
            source: meta.source,
            chunk_id: meta.chunk_id,
            similarity: similarity_from_distance(distance),
        })
        .collect()
}

/// Admission control for the answer path: below the threshold the caller
/// gets no passages but still sees the true best similarity, which keeps
/// "low confidence" distinguishable from "nothing ingested" (exactly 0.0).
pub fn apply_confidence_gate(scored: Vec<ScoredChunk>) -> (Vec<ScoredChunk>, f32) {
    let max_similarity = scored
        .iter()
        .map(|c| c.similarity)
        .fold(0.0_f32, f32::max);

    if max_similarity < CONFIDENCE_THRESHOLD {
        return (Vec::new(), max_similarity);
    }
    (scored, max_similarity)
}
