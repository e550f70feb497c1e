//! SQLite implementation of [`PostStore`].
//!
//! Vectors live in `post_embeddings` as little-endian `f32` BLOBs and are
//! compared in Rust with brute-force cosine similarity. Lexical search runs
//! against the `posts_fts` FTS5 table, which [`upsert_post`](PostStore::upsert_post)
//! keeps in sync with `posts`.
//!
//! FTS5's `bm25()` is unbounded (lower is better), so the raw lexical score
//! reported to the pipeline is `s / (s + k)` with `s = -bm25` and `k` the
//! configured saturation constant. That keeps raw scores in `[0, 1)`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use feedback_dedup_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use feedback_dedup_core::models::{MergeSuggestion, NeighborRow, Post, PostEmbedding};
use feedback_dedup_core::store::{
    query_terms, EligibilityCursor, EligibilityQuery, NeighborScope, PostStore,
};

const POST_COLUMNS: &str = "p.id, p.board_id, p.title, p.content, p.vote_count, \
     p.comment_count, p.created_at, p.canonical_post_id, p.merge_checked_at";

const ELIGIBLE_FROM: &str = "FROM posts p JOIN post_embeddings e ON e.post_id = p.id \
     WHERE p.canonical_post_id IS NULL \
       AND (? IS NULL OR e.model = ?) \
       AND (? = 1 OR p.merge_checked_at IS NULL OR p.merge_checked_at < ?)";

pub struct SqliteStore {
    pool: SqlitePool,
    lexical_saturation: f64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lexical_saturation: 10.0,
        }
    }

    pub fn with_lexical_saturation(mut self, saturation: f64) -> Self {
        self.lexical_saturation = saturation;
        self
    }

    fn saturate(&self, bm25: f64) -> f64 {
        let s = (-bm25).max(0.0);
        s / (s + self.lexical_saturation)
    }
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

fn post_from_row(row: &SqliteRow) -> Post {
    let merge_checked_at: Option<i64> = row.get("merge_checked_at");
    Post {
        id: row.get("id"),
        board_id: row.get("board_id"),
        title: row.get("title"),
        content: row.get("content"),
        vote_count: row.get("vote_count"),
        comment_count: row.get("comment_count"),
        created_at: from_ts(row.get("created_at")),
        canonical_post_id: row.get("canonical_post_id"),
        merge_checked_at: merge_checked_at.map(from_ts),
    }
}

fn neighbor_from_row(row: &SqliteRow, score: f64) -> NeighborRow {
    NeighborRow {
        post_id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        vote_count: row.get("vote_count"),
        comment_count: row.get("comment_count"),
        created_at: from_ts(row.get("created_at")),
        score,
    }
}

/// FTS5 match expression: every term quoted, joined with OR.
fn fts_match_expression(text: &str) -> Option<String> {
    let terms = query_terms(text);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[async_trait]
impl PostStore for SqliteStore {
    async fn upsert_post(&self, post: &Post) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO posts (id, board_id, title, content, hash, vote_count, comment_count,
                               created_at, canonical_post_id, merge_checked_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                board_id = excluded.board_id,
                title = excluded.title,
                content = excluded.content,
                hash = excluded.hash,
                vote_count = excluded.vote_count,
                comment_count = excluded.comment_count,
                created_at = excluded.created_at,
                canonical_post_id = excluded.canonical_post_id,
                merge_checked_at = COALESCE(excluded.merge_checked_at, posts.merge_checked_at)
            "#,
        )
        .bind(&post.id)
        .bind(&post.board_id)
        .bind(&post.title)
        .bind(&post.content)
        .bind(post.embedding_hash())
        .bind(post.vote_count)
        .bind(post.comment_count)
        .bind(post.created_at.timestamp())
        .bind(&post.canonical_post_id)
        .bind(post.merge_checked_at.map(|t| t.timestamp()))
        .execute(&mut *tx)
        .await?;

        // Replace FTS entry
        sqlx::query("DELETE FROM posts_fts WHERE post_id = ?")
            .bind(&post.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO posts_fts (post_id, title, content) VALUES (?, ?, ?)")
            .bind(&post.id)
            .bind(&post.title)
            .bind(&post.content)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(&format!("SELECT {} FROM posts p WHERE p.id = ?", POST_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(post_from_row))
    }

    async fn get_embedding(&self, post_id: &str) -> Result<Option<PostEmbedding>> {
        let row = sqlx::query(
            "SELECT post_id, model, hash, embedding, embedded_at FROM post_embeddings WHERE post_id = ?",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            PostEmbedding {
                post_id: row.get("post_id"),
                vector: blob_to_vec(&blob),
                model: row.get("model"),
                hash: row.get("hash"),
                embedded_at: from_ts(row.get("embedded_at")),
            }
        }))
    }

    async fn save_embedding(
        &self,
        post_id: &str,
        vector: &[f32],
        model: &str,
        hash: &str,
        embedded_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO post_embeddings (post_id, model, dims, hash, embedding, embedded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(post_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                hash = excluded.hash,
                embedding = excluded.embedding,
                embedded_at = excluded.embedded_at
            "#,
        )
        .bind(post_id)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(hash)
        .bind(vec_to_blob(vector))
        .bind(embedded_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn posts_missing_embedding(&self, model: &str, limit: usize) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM posts p
            LEFT JOIN post_embeddings e ON e.post_id = p.id
            WHERE p.canonical_post_id IS NULL
              AND (e.post_id IS NULL OR e.model != ? OR e.hash != p.hash)
            ORDER BY p.created_at, p.id
            LIMIT ?
            "#,
            POST_COLUMNS
        ))
        .bind(model)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(post_from_row).collect())
    }

    async fn find_vector_neighbors(
        &self,
        vector: &[f32],
        scope: &NeighborScope<'_>,
        min_similarity: f64,
        limit: usize,
    ) -> Result<Vec<NeighborRow>> {
        // Fetch all candidate vectors and compute cosine similarity in Rust
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.title, p.content, p.vote_count, p.comment_count, p.created_at, e.embedding
            FROM post_embeddings e
            JOIN posts p ON p.id = e.post_id
            WHERE p.canonical_post_id IS NULL
              AND (? IS NULL OR e.model = ?)
              AND (? IS NULL OR p.board_id IS NULL OR p.board_id = ?)
            "#,
        )
        .bind(scope.embedding_model)
        .bind(scope.embedding_model)
        .bind(scope.board_id)
        .bind(scope.board_id)
        .fetch_all(&self.pool)
        .await?;

        let mut neighbors: Vec<NeighborRow> = rows
            .iter()
            .filter(|row| {
                let id: &str = row.get("id");
                !scope.exclude_ids.iter().any(|x| x == id)
            })
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(vector, &blob_to_vec(&blob)) as f64;
                (similarity >= min_similarity).then(|| neighbor_from_row(row, similarity))
            })
            .collect();

        // Sort by similarity desc and take top K
        neighbors.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });
        neighbors.truncate(limit);
        Ok(neighbors)
    }

    async fn find_lexical_neighbors(
        &self,
        query: &str,
        scope: &NeighborScope<'_>,
        limit: usize,
    ) -> Result<Vec<NeighborRow>> {
        let Some(expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT p.id, p.title, p.content, p.vote_count, p.comment_count, p.created_at,
                   bm25(posts_fts) AS rank
            FROM posts_fts
            JOIN posts p ON p.id = posts_fts.post_id
            WHERE posts_fts MATCH ?
              AND p.canonical_post_id IS NULL
              AND (? IS NULL OR p.board_id IS NULL OR p.board_id = ?)
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&expr)
        .bind(scope.board_id)
        .bind(scope.board_id)
        .bind((limit + scope.exclude_ids.len()) as i64)
        .fetch_all(&self.pool)
        .await?;

        let neighbors: Vec<NeighborRow> = rows
            .iter()
            .filter(|row| {
                let id: &str = row.get("id");
                !scope.exclude_ids.iter().any(|x| x == id)
            })
            .map(|row| {
                let rank: f64 = row.get("rank");
                neighbor_from_row(row, self.saturate(rank))
            })
            .take(limit)
            .collect();
        Ok(neighbors)
    }

    async fn count_eligible(&self, query: &EligibilityQuery) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", ELIGIBLE_FROM))
            .bind(query.embedding_model.as_deref())
            .bind(query.embedding_model.as_deref())
            .bind(query.force_all as i64)
            .bind(query.checked_before().timestamp())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn posts_eligible_for_check(
        &self,
        query: &EligibilityQuery,
        after: Option<&EligibilityCursor>,
        limit: usize,
    ) -> Result<Vec<Post>> {
        let keyset = if after.is_some() {
            "AND (p.created_at > ? OR (p.created_at = ? AND p.id > ?))"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {} {} {} ORDER BY p.created_at, p.id LIMIT ?",
            POST_COLUMNS, ELIGIBLE_FROM, keyset
        );

        let mut q = sqlx::query(&sql)
            .bind(query.embedding_model.as_deref())
            .bind(query.embedding_model.as_deref())
            .bind(query.force_all as i64)
            .bind(query.checked_before().timestamp());
        if let Some(cursor) = after {
            q = q
                .bind(cursor.created_at.timestamp())
                .bind(cursor.created_at.timestamp())
                .bind(cursor.post_id.clone());
        }
        let rows = q.bind(limit as i64).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(post_from_row).collect())
    }

    async fn insert_merge_suggestion(&self, suggestion: &MergeSuggestion) -> Result<bool> {
        let (low, high) = suggestion.pair_key();
        let result = sqlx::query(
            r#"
            INSERT INTO merge_suggestions (id, source_post_id, target_post_id, pair_low, pair_high,
                vector_score, fts_score, hybrid_score, llm_confidence, llm_reasoning, llm_model, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(pair_low, pair_high) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&suggestion.source_post_id)
        .bind(&suggestion.target_post_id)
        .bind(low)
        .bind(high)
        .bind(suggestion.vector_score)
        .bind(suggestion.fts_score)
        .bind(suggestion.hybrid_score)
        .bind(suggestion.llm_confidence)
        .bind(&suggestion.llm_reasoning)
        .bind(&suggestion.llm_model)
        .bind(suggestion.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stamp_merge_checked(&self, post_id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE posts SET merge_checked_at = ? WHERE id = ?")
            .bind(at.timestamp())
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("post not found: {}", post_id);
        }
        Ok(())
    }

    async fn list_merge_suggestions(&self, limit: usize) -> Result<Vec<MergeSuggestion>> {
        let rows = sqlx::query(
            r#"
            SELECT source_post_id, target_post_id, vector_score, fts_score, hybrid_score,
                   llm_confidence, llm_reasoning, llm_model, created_at
            FROM merge_suggestions
            ORDER BY created_at DESC, id
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| MergeSuggestion {
                source_post_id: row.get("source_post_id"),
                target_post_id: row.get("target_post_id"),
                vector_score: row.get("vector_score"),
                fts_score: row.get("fts_score"),
                hybrid_score: row.get("hybrid_score"),
                llm_confidence: row.get("llm_confidence"),
                llm_reasoning: row.get("llm_reasoning"),
                llm_model: row.get("llm_model"),
                created_at: from_ts(row.get("created_at")),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use chrono::Duration;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let url = format!("sqlite:{}", tmp.path().join("feedback.sqlite").display());
        let pool = db::connect_url(&url).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn post(id: &str, title: &str, days_ago: i64) -> Post {
        Post {
            id: id.into(),
            board_id: None,
            title: title.into(),
            content: String::new(),
            vote_count: 0,
            comment_count: 0,
            created_at: from_ts(1_767_225_600) - Duration::days(days_ago),
            canonical_post_id: None,
            merge_checked_at: None,
        }
    }

    fn suggestion(source: &str, target: &str) -> MergeSuggestion {
        MergeSuggestion {
            source_post_id: source.into(),
            target_post_id: target.into(),
            vector_score: 0.8,
            fts_score: 0.2,
            hybrid_score: 0.86,
            llm_confidence: 0.9,
            llm_reasoning: "same request".into(),
            llm_model: "gpt-4o-mini".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_fts_entry() {
        let (_tmp, s) = store().await;
        s.upsert_post(&post("a", "Dark mode please", 1)).await.unwrap();
        s.upsert_post(&post("b", "Faster search", 1)).await.unwrap();
        s.upsert_post(&post("c", "Keyboard shortcuts", 1)).await.unwrap();
        s.upsert_post(&post("a", "Export to CSV", 1)).await.unwrap();

        let scope = NeighborScope {
            exclude_ids: &[],
            board_id: None,
            embedding_model: None,
        };
        assert!(s.find_lexical_neighbors("dark", &scope, 10).await.unwrap().is_empty());
        let hits = s.find_lexical_neighbors("csv export", &scope, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post_id, "a");
        assert!(hits[0].score > 0.0 && hits[0].score < 1.0);
        assert_eq!(s.get_post("a").await.unwrap().unwrap().title, "Export to CSV");
    }

    #[tokio::test]
    async fn test_lexical_search_skips_merged_and_excluded() {
        let (_tmp, s) = store().await;
        s.upsert_post(&post("a", "Dark mode", 3)).await.unwrap();
        s.upsert_post(&post("b", "Dark mode for mobile", 2)).await.unwrap();
        let mut merged = post("c", "Dark theme dark mode", 1);
        merged.canonical_post_id = Some("a".into());
        s.upsert_post(&merged).await.unwrap();

        let exclude = vec!["a".to_string()];
        let scope = NeighborScope {
            exclude_ids: &exclude,
            board_id: None,
            embedding_model: None,
        };
        let hits = s.find_lexical_neighbors("dark mode", &scope, 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.post_id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_vector_search_threshold_model_and_board() {
        let (_tmp, s) = store().await;
        let mut on_other_board = post("d", "d", 1);
        on_other_board.board_id = Some("other".into());
        for p in [post("a", "a", 1), post("b", "b", 1), post("c", "c", 1), on_other_board] {
            s.upsert_post(&p).await.unwrap();
        }
        let now = Utc::now();
        s.save_embedding("a", &[1.0, 0.0], "m1", "h", now).await.unwrap();
        s.save_embedding("b", &[0.9, 0.1], "m1", "h", now).await.unwrap();
        s.save_embedding("c", &[1.0, 0.0], "m2", "h", now).await.unwrap();
        s.save_embedding("d", &[1.0, 0.0], "m1", "h", now).await.unwrap();

        let exclude = vec!["a".to_string()];
        let scope = NeighborScope {
            exclude_ids: &exclude,
            board_id: Some("main"),
            embedding_model: Some("m1"),
        };
        let hits = s.find_vector_neighbors(&[1.0, 0.0], &scope, 0.35, 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.post_id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
        assert!(hits[0].score > 0.9);

        let none = s.find_vector_neighbors(&[0.0, 1.0], &scope, 0.35, 10).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_roundtrip_and_missing_scan() {
        let (_tmp, s) = store().await;
        let a = post("a", "a", 2);
        s.upsert_post(&a).await.unwrap();
        s.upsert_post(&post("b", "b", 1)).await.unwrap();
        s.save_embedding("a", &[0.5, 0.25], "m1", &a.embedding_hash(), Utc::now())
            .await
            .unwrap();

        let e = s.get_embedding("a").await.unwrap().unwrap();
        assert_eq!(e.vector, vec![0.5, 0.25]);
        assert_eq!(e.model, "m1");
        assert_eq!(e.hash, a.embedding_hash());
        assert!(s.get_embedding("b").await.unwrap().is_none());

        let missing: Vec<String> = s
            .posts_missing_embedding("m1", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(missing, vec!["b"]);

        let stale = s.posts_missing_embedding("m2", 10).await.unwrap();
        assert_eq!(stale.len(), 2);
    }

    #[tokio::test]
    async fn test_edited_post_is_pending_again() {
        let (_tmp, s) = store().await;
        let original = post("a", "Dark mode", 1);
        s.upsert_post(&original).await.unwrap();
        s.save_embedding("a", &[1.0], "m1", &original.embedding_hash(), Utc::now())
            .await
            .unwrap();
        assert!(s.posts_missing_embedding("m1", 10).await.unwrap().is_empty());

        // Same text re-imported: still up to date.
        s.upsert_post(&original).await.unwrap();
        assert!(s.posts_missing_embedding("m1", 10).await.unwrap().is_empty());

        let mut edited = original.clone();
        edited.content = "Also for the mobile app".into();
        s.upsert_post(&edited).await.unwrap();
        let pending = s.posts_missing_embedding("m1", 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "a");
    }

    #[tokio::test]
    async fn test_pair_uniqueness_in_both_directions() {
        let (_tmp, s) = store().await;
        assert!(s.insert_merge_suggestion(&suggestion("a", "b")).await.unwrap());
        assert!(!s.insert_merge_suggestion(&suggestion("b", "a")).await.unwrap());
        assert!(!s.insert_merge_suggestion(&suggestion("a", "b")).await.unwrap());
        assert_eq!(s.list_merge_suggestions(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_eligibility_cooldown_force_and_cursor() {
        let (_tmp, s) = store().await;
        let now = Utc::now();
        let mut recent = post("a", "a", 3);
        recent.merge_checked_at = Some(now - Duration::hours(1));
        let mut stale = post("b", "b", 2);
        stale.merge_checked_at = Some(now - Duration::hours(30));
        let unchecked = post("c", "c", 1);
        let unembedded = post("d", "d", 0);
        for p in [&recent, &stale, &unchecked, &unembedded] {
            s.upsert_post(p).await.unwrap();
        }
        for id in ["a", "b", "c"] {
            s.save_embedding(id, &[1.0], "m1", "h", now).await.unwrap();
        }

        let normal = EligibilityQuery::new(false, 24);
        assert_eq!(s.count_eligible(&normal).await.unwrap(), 2);
        let forced = EligibilityQuery::new(true, 24);
        assert_eq!(s.count_eligible(&forced).await.unwrap(), 3);
        let other_model = EligibilityQuery::new(true, 24).with_embedding_model("m2");
        assert_eq!(s.count_eligible(&other_model).await.unwrap(), 0);

        let first = s.posts_eligible_for_check(&forced, None, 2).await.unwrap();
        let ids: Vec<&str> = first.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let cursor = EligibilityCursor::after(&first[1]);
        let rest = s.posts_eligible_for_check(&forced, Some(&cursor), 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "c");
    }

    #[tokio::test]
    async fn test_stamp_unknown_post_fails() {
        let (_tmp, s) = store().await;
        s.upsert_post(&post("a", "a", 1)).await.unwrap();
        let at = Utc::now();
        s.stamp_merge_checked("a", at).await.unwrap();
        let stamped = s.get_post("a").await.unwrap().unwrap();
        assert_eq!(stamped.merge_checked_at.unwrap().timestamp(), at.timestamp());
        assert!(s.stamp_merge_checked("missing", at).await.is_err());
    }

    #[test]
    fn test_fts_expression_quotes_terms() {
        assert_eq!(
            fts_match_expression("Export to CSV!").as_deref(),
            Some("\"export\" OR \"to\" OR \"csv\"")
        );
        assert!(fts_match_expression("? !").is_none());
    }
}
