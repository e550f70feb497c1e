//! In-memory [`PostStore`] implementation for tests and dry experiments.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity; lexical search scores posts by the share of query terms
//! found in their title and content.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::cosine_similarity;
use crate::models::{pair_key, MergeSuggestion, NeighborRow, Post, PostEmbedding};

use super::{query_terms, EligibilityCursor, EligibilityQuery, NeighborScope, PostStore};

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    posts: RwLock<HashMap<String, Post>>,
    embeddings: RwLock<HashMap<String, PostEmbedding>>,
    suggestions: RwLock<Vec<MergeSuggestion>>,
    pairs: RwLock<HashSet<(String, String)>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored suggestions.
    pub fn suggestion_count(&self) -> usize {
        self.suggestions.read().map(|s| s.len()).unwrap_or(0)
    }

    fn in_scope(post: &Post, scope: &NeighborScope<'_>) -> bool {
        if post.is_merged() || scope.exclude_ids.iter().any(|id| id == &post.id) {
            return false;
        }
        match (scope.board_id, post.board_id.as_deref()) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        }
    }

    fn eligible_sorted(&self, query: &EligibilityQuery) -> Result<Vec<Post>> {
        let posts = read(&self.posts)?;
        let embeddings = read(&self.embeddings)?;
        let mut eligible: Vec<Post> = posts
            .values()
            .filter(|p| {
                let model = embeddings.get(&p.id).map(|e| e.model.as_str());
                query.admits(p, model)
            })
            .cloned()
            .collect();
        eligible.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(eligible)
    }
}

fn neighbor_row(post: &Post, score: f64) -> NeighborRow {
    NeighborRow {
        post_id: post.id.clone(),
        title: post.title.clone(),
        content: post.content.clone(),
        vote_count: post.vote_count,
        comment_count: post.comment_count,
        created_at: post.created_at,
        score,
    }
}

fn sort_desc(rows: &mut [NeighborRow]) {
    rows.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.post_id.cmp(&b.post_id))
    });
}

#[async_trait]
impl PostStore for InMemoryStore {
    async fn upsert_post(&self, post: &Post) -> Result<()> {
        write(&self.posts)?.insert(post.id.clone(), post.clone());
        Ok(())
    }

    async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        Ok(read(&self.posts)?.get(id).cloned())
    }

    async fn get_embedding(&self, post_id: &str) -> Result<Option<PostEmbedding>> {
        Ok(read(&self.embeddings)?.get(post_id).cloned())
    }

    async fn save_embedding(
        &self,
        post_id: &str,
        vector: &[f32],
        model: &str,
        hash: &str,
        embedded_at: DateTime<Utc>,
    ) -> Result<()> {
        write(&self.embeddings)?.insert(
            post_id.to_string(),
            PostEmbedding {
                post_id: post_id.to_string(),
                vector: vector.to_vec(),
                model: model.to_string(),
                hash: hash.to_string(),
                embedded_at,
            },
        );
        Ok(())
    }

    async fn posts_missing_embedding(&self, model: &str, limit: usize) -> Result<Vec<Post>> {
        let posts = read(&self.posts)?;
        let embeddings = read(&self.embeddings)?;
        let mut missing: Vec<Post> = posts
            .values()
            .filter(|p| !p.is_merged())
            .filter(|p| match embeddings.get(&p.id) {
                None => true,
                Some(e) => e.model != model || e.hash != p.embedding_hash(),
            })
            .cloned()
            .collect();
        missing.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        missing.truncate(limit);
        Ok(missing)
    }

    async fn find_vector_neighbors(
        &self,
        vector: &[f32],
        scope: &NeighborScope<'_>,
        min_similarity: f64,
        limit: usize,
    ) -> Result<Vec<NeighborRow>> {
        let posts = read(&self.posts)?;
        let embeddings = read(&self.embeddings)?;
        let mut rows: Vec<NeighborRow> = embeddings
            .values()
            .filter(|e| scope.embedding_model.map(|m| m == e.model).unwrap_or(true))
            .filter_map(|e| {
                let post = posts.get(&e.post_id)?;
                if !Self::in_scope(post, scope) {
                    return None;
                }
                let sim = cosine_similarity(vector, &e.vector) as f64;
                (sim >= min_similarity).then(|| neighbor_row(post, sim))
            })
            .collect();
        sort_desc(&mut rows);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn find_lexical_neighbors(
        &self,
        query: &str,
        scope: &NeighborScope<'_>,
        limit: usize,
    ) -> Result<Vec<NeighborRow>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let posts = read(&self.posts)?;
        let mut rows: Vec<NeighborRow> = posts
            .values()
            .filter(|p| Self::in_scope(p, scope))
            .filter_map(|p| {
                let haystack = query_terms(&format!("{} {}", p.title, p.content));
                let matched = terms.iter().filter(|t| haystack.contains(t)).count();
                // Full coverage maps to 0.5, the top of a ts_rank-like range.
                (matched > 0).then(|| neighbor_row(p, matched as f64 / terms.len() as f64 * 0.5))
            })
            .collect();
        sort_desc(&mut rows);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn count_eligible(&self, query: &EligibilityQuery) -> Result<u64> {
        Ok(self.eligible_sorted(query)?.len() as u64)
    }

    async fn posts_eligible_for_check(
        &self,
        query: &EligibilityQuery,
        after: Option<&EligibilityCursor>,
        limit: usize,
    ) -> Result<Vec<Post>> {
        Ok(self
            .eligible_sorted(query)?
            .into_iter()
            .filter(|p| after.map(|c| c.precedes(p)).unwrap_or(true))
            .take(limit)
            .collect())
    }

    async fn insert_merge_suggestion(&self, suggestion: &MergeSuggestion) -> Result<bool> {
        let (low, high) = suggestion.pair_key();
        let mut pairs = write(&self.pairs)?;
        if !pairs.insert((low.to_string(), high.to_string())) {
            return Ok(false);
        }
        write(&self.suggestions)?.push(suggestion.clone());
        Ok(true)
    }

    async fn stamp_merge_checked(&self, post_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut posts = write(&self.posts)?;
        match posts.get_mut(post_id) {
            Some(post) => {
                post.merge_checked_at = Some(at);
                Ok(())
            }
            None => Err(anyhow!("post not found: {}", post_id)),
        }
    }

    async fn list_merge_suggestions(&self, limit: usize) -> Result<Vec<MergeSuggestion>> {
        let mut all = read(&self.suggestions)?.clone();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }
}
