//! Hybrid candidate search: vector similarity fused with lexical relevance.
//!
//! # Fusion
//!
//! 1. Fetch up to `2 × candidate_limit` vector neighbors with cosine
//!    similarity `>= vector_threshold` (`vector_score`).
//! 2. Fetch up to `2 × candidate_limit` lexical neighbors for the source
//!    title; `fts_score = min(raw × 2, 1)`.
//! 3. Union by post id; a post missing from one side scores `0.0` there.
//! 4. `hybrid = min(vector + fts × fts_weight, 1)` when `fts > 0`,
//!    otherwise `hybrid = vector`.
//! 5. Keep `hybrid >= hybrid_threshold`, sort descending, truncate to
//!    `candidate_limit`.
//!
//! The lexical score only ever adds to the vector score. A post found by
//! lexical search alone tops out at `fts_weight`, below the default
//! threshold.

use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;

use crate::models::{MergeCandidate, NeighborRow, Post};
use crate::params::DetectionParams;
use crate::store::{NeighborScope, PostStore};

/// Map a raw lexical relevance score into `[0, 1]`.
pub fn normalize_fts(raw: f64) -> f64 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0.0;
    }
    (raw * 2.0).min(1.0)
}

/// Fuse a vector score and a normalized lexical score.
pub fn hybrid_score(vector_score: f64, fts_score: f64, fts_weight: f64) -> f64 {
    if fts_score > 0.0 {
        (vector_score + fts_score * fts_weight).min(1.0)
    } else {
        vector_score
    }
}

/// Union the two neighbor lists, score, filter, sort and cap them.
pub fn fuse_candidates(
    vector_rows: &[NeighborRow],
    lexical_rows: &[NeighborRow],
    params: &DetectionParams,
) -> Vec<MergeCandidate> {
    let mut merged: HashMap<&str, MergeCandidate> = HashMap::new();

    for row in vector_rows {
        merged
            .entry(row.post_id.as_str())
            .or_insert_with(|| empty_candidate(row))
            .vector_score = row.score.clamp(0.0, 1.0);
    }
    for row in lexical_rows {
        merged
            .entry(row.post_id.as_str())
            .or_insert_with(|| empty_candidate(row))
            .fts_score = normalize_fts(row.score);
    }

    let mut candidates: Vec<MergeCandidate> = merged
        .into_values()
        .map(|mut c| {
            c.hybrid_score = hybrid_score(c.vector_score, c.fts_score, params.fts_weight);
            c
        })
        .filter(|c| c.hybrid_score >= params.hybrid_threshold)
        .collect();

    candidates.sort_by(|a, b| {
        b.hybrid_score
            .partial_cmp(&a.hybrid_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.post_id.cmp(&b.post_id))
    });
    candidates.truncate(params.candidate_limit);
    candidates
}

fn empty_candidate(row: &NeighborRow) -> MergeCandidate {
    MergeCandidate {
        post_id: row.post_id.clone(),
        title: row.title.clone(),
        content: row.content.clone(),
        vote_count: row.vote_count,
        comment_count: row.comment_count,
        created_at: row.created_at,
        vector_score: 0.0,
        fts_score: 0.0,
        hybrid_score: 0.0,
    }
}

/// Find ranked merge candidates for `source`.
///
/// Returns an empty list without touching the neighbor searches when the
/// source has no stored embedding, or one produced by a model other than
/// `embedding_model`.
pub async fn find_merge_candidates<S: PostStore + ?Sized>(
    store: &S,
    source: &Post,
    embedding_model: Option<&str>,
    params: &DetectionParams,
) -> Result<Vec<MergeCandidate>> {
    let embedding = match store.get_embedding(&source.id).await? {
        Some(e) if embedding_model.map(|m| m == e.model).unwrap_or(true) => e,
        Some(e) => {
            debug!(
                post_id = %source.id,
                stored_model = %e.model,
                "Embedding from another model, skipping candidate search"
            );
            return Ok(Vec::new());
        }
        None => {
            debug!(post_id = %source.id, "No embedding, skipping candidate search");
            return Ok(Vec::new());
        }
    };

    let exclude = vec![source.id.clone()];
    let scope = NeighborScope {
        exclude_ids: &exclude,
        board_id: source.board_id.as_deref(),
        embedding_model: Some(embedding.model.as_str()),
    };
    let limit = params.per_search_limit();

    let vector_rows = store
        .find_vector_neighbors(&embedding.vector, &scope, params.vector_threshold, limit)
        .await?;
    let lexical_rows = store
        .find_lexical_neighbors(&source.title, &scope, limit)
        .await?;

    let candidates = fuse_candidates(&vector_rows, &lexical_rows, params);

    debug!(
        post_id = %source.id,
        vector_hits = vector_rows.len(),
        lexical_hits = lexical_rows.len(),
        candidates = candidates.len(),
        "Hybrid candidate search complete"
    );

    Ok(candidates)
}
