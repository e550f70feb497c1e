//! Core data models for duplicate-feedback detection.
//!
//! [`Post`] is owned by the surrounding product and only read here (apart
//! from the merge-check stamp). [`MergeCandidate`] and [`Assessment`] are
//! transient values that flow through a single pipeline pass, and
//! [`MergeSuggestion`] is the only row the pipeline itself creates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A feedback post as seen by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    /// Board (tenant) the post belongs to. Candidates are only drawn from
    /// the same board when both sides carry one.
    #[serde(default)]
    pub board_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub vote_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    /// Set once the post has been merged into another one.
    #[serde(default)]
    pub canonical_post_id: Option<String>,
    /// Last time the post went through the pipeline.
    #[serde(default)]
    pub merge_checked_at: Option<DateTime<Utc>>,
}

impl Post {
    /// Whether this post has already been folded into another post.
    pub fn is_merged(&self) -> bool {
        self.canonical_post_id.is_some()
    }

    /// Text that gets embedded for this post.
    pub fn embedding_text(&self) -> String {
        if self.content.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.content)
        }
    }

    /// SHA-256 of [`embedding_text`](Post::embedding_text), hex encoded.
    ///
    /// Stored with each embedding; a mismatch means the post was edited
    /// after it was embedded.
    pub fn embedding_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.embedding_text().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A stored embedding together with the model that produced it.
///
/// Vectors from different models are not comparable, so the model id is
/// always checked before a vector is reused.
#[derive(Debug, Clone, PartialEq)]
pub struct PostEmbedding {
    pub post_id: String,
    pub vector: Vec<f32>,
    pub model: String,
    /// [`Post::embedding_hash`] of the text that was embedded.
    pub hash: String,
    pub embedded_at: DateTime<Utc>,
}

/// A row returned by one of the two neighbor searches.
#[derive(Debug, Clone)]
pub struct NeighborRow {
    pub post_id: String,
    pub title: String,
    pub content: String,
    pub vote_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    /// Cosine similarity for vector rows, raw relevance for lexical rows.
    pub score: f64,
}

/// A post surfaced by hybrid search as a possible duplicate.
#[derive(Debug, Clone, Serialize)]
pub struct MergeCandidate {
    pub post_id: String,
    pub title: String,
    pub content: String,
    pub vote_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    /// Cosine similarity, `0.0` when the post was not found by vector search.
    pub vector_score: f64,
    /// Normalized lexical score, `0.0` when not found by lexical search.
    pub fts_score: f64,
    pub hybrid_score: f64,
}

/// A duplicate verdict the language model confirmed with enough confidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub candidate_post_id: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// Which post of a confirmed pair is kept and which one is folded away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeDirection {
    /// Post recommended for merging into the target.
    pub source_post_id: String,
    /// Canonical post that survives the merge.
    pub target_post_id: String,
}

/// A persisted merge recommendation awaiting review.
#[derive(Debug, Clone, Serialize)]
pub struct MergeSuggestion {
    pub source_post_id: String,
    pub target_post_id: String,
    pub vector_score: f64,
    pub fts_score: f64,
    pub hybrid_score: f64,
    pub llm_confidence: f64,
    pub llm_reasoning: String,
    pub llm_model: String,
    pub created_at: DateTime<Utc>,
}

impl MergeSuggestion {
    /// The unordered pair key used for conflict detection: `(min, max)`.
    pub fn pair_key(&self) -> (&str, &str) {
        pair_key(&self.source_post_id, &self.target_post_id)
    }
}

/// Order two post ids so that `{a, b}` and `{b, a}` produce the same key.
pub fn pair_key<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(pair_key("b", "a"), pair_key("a", "b"));
        assert_eq!(pair_key("a", "b"), ("a", "b"));
    }

    #[test]
    fn embedding_text_falls_back_to_title() {
        let post = Post {
            id: "p1".into(),
            board_id: None,
            title: "Dark mode".into(),
            content: "   ".into(),
            vote_count: 0,
            comment_count: 0,
            created_at: Utc::now(),
            canonical_post_id: None,
            merge_checked_at: None,
        };
        assert_eq!(post.embedding_text(), "Dark mode");
    }
}
