//! Storage abstraction for the duplicate-detection pipeline.
//!
//! The [`PostStore`] trait covers every read and write the pipeline makes
//! against the product's relational store: embedding access, the two
//! neighbor searches, the eligibility scan, and the two writes
//! (suggestion insert, merge-check stamp). Backends:
//!
//! - [`memory::InMemoryStore`] for tests and dry experiments.
//! - `SqliteStore` in the `feedback-dedup` app crate (FTS5 + BLOB vectors).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::models::{MergeSuggestion, NeighborRow, Post, PostEmbedding};

/// Restricts which posts a neighbor search may return.
#[derive(Debug, Clone)]
pub struct NeighborScope<'a> {
    /// Posts never returned (always contains the source post).
    pub exclude_ids: &'a [String],
    /// When set, only posts on this board or with no board are returned.
    pub board_id: Option<&'a str>,
    /// When set, vector search only compares embeddings from this model.
    pub embedding_model: Option<&'a str>,
}

/// Which posts are due for a merge check.
#[derive(Debug, Clone)]
pub struct EligibilityQuery {
    /// Ignore the cooldown and re-check every eligible post.
    pub force_all: bool,
    /// Minimum age of the previous check.
    pub cooldown_hours: i64,
    /// Reference time for the cooldown comparison.
    pub now: DateTime<Utc>,
    /// When set, only posts embedded with this model count as embedded.
    pub embedding_model: Option<String>,
}

impl EligibilityQuery {
    pub fn new(force_all: bool, cooldown_hours: i64) -> Self {
        Self {
            force_all,
            cooldown_hours,
            now: Utc::now(),
            embedding_model: None,
        }
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Posts checked strictly before this instant are due again.
    pub fn checked_before(&self) -> DateTime<Utc> {
        self.now - Duration::hours(self.cooldown_hours)
    }

    /// Apply the eligibility rule to a post whose embedding model is known.
    ///
    /// `embedding_model` is `None` when the post has no embedding at all.
    pub fn admits(&self, post: &Post, embedding_model: Option<&str>) -> bool {
        let embedded = match (embedding_model, self.embedding_model.as_deref()) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(have), Some(want)) => have == want,
        };
        if !embedded || post.is_merged() {
            return false;
        }
        if self.force_all {
            return true;
        }
        match post.merge_checked_at {
            None => true,
            Some(at) => at < self.checked_before(),
        }
    }
}

/// Keyset position in the eligibility scan, ordered by `(created_at, id)`.
///
/// The sweep pages with a cursor instead of relying on the merge-check stamp
/// to shrink the result set, so dry-run and force runs terminate too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityCursor {
    pub created_at: DateTime<Utc>,
    pub post_id: String,
}

impl EligibilityCursor {
    pub fn after(post: &Post) -> Self {
        Self {
            created_at: post.created_at,
            post_id: post.id.clone(),
        }
    }

    /// Whether `post` sorts strictly after this cursor.
    pub fn precedes(&self, post: &Post) -> bool {
        (post.created_at, post.id.as_str()) > (self.created_at, self.post_id.as_str())
    }
}

/// Abstract storage backend for the pipeline.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_post`](PostStore::upsert_post) | Insert or update a post (import) |
/// | [`get_post`](PostStore::get_post) | Fetch one post by id |
/// | [`get_embedding`](PostStore::get_embedding) | Read a post's vector and model |
/// | [`save_embedding`](PostStore::save_embedding) | Store a post's vector and model |
/// | [`posts_missing_embedding`](PostStore::posts_missing_embedding) | Embedding backfill scan |
/// | [`find_vector_neighbors`](PostStore::find_vector_neighbors) | Cosine similarity search |
/// | [`find_lexical_neighbors`](PostStore::find_lexical_neighbors) | Full-text search |
/// | [`count_eligible`](PostStore::count_eligible) | Size of the sweep |
/// | [`posts_eligible_for_check`](PostStore::posts_eligible_for_check) | One sweep batch |
/// | [`insert_merge_suggestion`](PostStore::insert_merge_suggestion) | Conflict-safe insert |
/// | [`stamp_merge_checked`](PostStore::stamp_merge_checked) | Mark a post as checked |
/// | [`list_merge_suggestions`](PostStore::list_merge_suggestions) | Newest suggestions |
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn upsert_post(&self, post: &Post) -> Result<()>;

    async fn get_post(&self, id: &str) -> Result<Option<Post>>;

    /// Read the stored embedding for a post, if any.
    async fn get_embedding(&self, post_id: &str) -> Result<Option<PostEmbedding>>;

    /// Store (or replace) the embedding for a post. `hash` is the
    /// [`Post::embedding_hash`] of the text that was embedded.
    async fn save_embedding(
        &self,
        post_id: &str,
        vector: &[f32],
        model: &str,
        hash: &str,
        embedded_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Unmerged posts with no embedding, one from a model other than `model`,
    /// or one whose hash no longer matches the post's text.
    async fn posts_missing_embedding(&self, model: &str, limit: usize) -> Result<Vec<Post>>;

    /// Posts whose embedding has cosine similarity `>= min_similarity` with
    /// `vector`, best first. Merged posts are never returned.
    async fn find_vector_neighbors(
        &self,
        vector: &[f32],
        scope: &NeighborScope<'_>,
        min_similarity: f64,
        limit: usize,
    ) -> Result<Vec<NeighborRow>>;

    /// Posts matching `query` lexically, best first, with a non-negative raw
    /// relevance score. Merged posts are never returned.
    async fn find_lexical_neighbors(
        &self,
        query: &str,
        scope: &NeighborScope<'_>,
        limit: usize,
    ) -> Result<Vec<NeighborRow>>;

    async fn count_eligible(&self, query: &EligibilityQuery) -> Result<u64>;

    /// Next page of eligible posts in `(created_at, id)` order, strictly after
    /// `after` when given.
    async fn posts_eligible_for_check(
        &self,
        query: &EligibilityQuery,
        after: Option<&EligibilityCursor>,
        limit: usize,
    ) -> Result<Vec<Post>>;

    /// Insert a suggestion unless one already exists for the unordered pair.
    ///
    /// Returns `true` when a row was written, `false` when the insert was a
    /// no-op because of an existing row. Never errors on conflict.
    async fn insert_merge_suggestion(&self, suggestion: &MergeSuggestion) -> Result<bool>;

    async fn stamp_merge_checked(&self, post_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn list_merge_suggestions(&self, limit: usize) -> Result<Vec<MergeSuggestion>>;
}

/// Split free text into lowercase alphanumeric search terms.
///
/// Terms shorter than two characters are dropped; order is preserved and
/// duplicates removed.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.chars().count() < 2 {
            continue;
        }
        let term = raw.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(checked_hours_ago: Option<i64>) -> Post {
        let now = Utc::now();
        Post {
            id: "p1".into(),
            board_id: None,
            title: "Export to CSV".into(),
            content: String::new(),
            vote_count: 0,
            comment_count: 0,
            created_at: now - Duration::days(3),
            canonical_post_id: None,
            merge_checked_at: checked_hours_ago.map(|h| now - Duration::hours(h)),
        }
    }

    #[test]
    fn recently_checked_post_needs_force() {
        let p = post(Some(1));
        let normal = EligibilityQuery::new(false, 24);
        let forced = EligibilityQuery::new(true, 24);
        assert!(!normal.admits(&p, Some("m")));
        assert!(forced.admits(&p, Some("m")));
    }

    #[test]
    fn stale_or_unchecked_post_is_admitted() {
        let q = EligibilityQuery::new(false, 24);
        assert!(q.admits(&post(None), Some("m")));
        assert!(q.admits(&post(Some(25)), Some("m")));
    }

    #[test]
    fn unembedded_or_merged_post_is_never_admitted() {
        let q = EligibilityQuery::new(true, 24);
        assert!(!q.admits(&post(None), None));

        let mut merged = post(None);
        merged.canonical_post_id = Some("p0".into());
        assert!(!q.admits(&merged, Some("m")));
    }

    #[test]
    fn model_mismatch_counts_as_unembedded() {
        let q = EligibilityQuery::new(false, 24).with_embedding_model("new-model");
        assert!(!q.admits(&post(None), Some("old-model")));
        assert!(q.admits(&post(None), Some("new-model")));
    }

    #[test]
    fn query_terms_strip_punctuation() {
        assert_eq!(
            query_terms("Add dark-mode! (please) a Dark"),
            vec!["add", "dark", "mode", "please"]
        );
    }
}
