use anyhow::Result;
use chrono::Utc;
use tracing::warn;

use feedback_dedup_core::embedding::EmbeddingProvider;
use feedback_dedup_core::store::PostStore;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::retry::RetryPolicy;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EmbedSummary {
    pub pending: u64,
    pub embedded: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Embed posts with no embedding, one from another model, or one made
/// before the post was last edited.
pub async fn run_embed_pending(config: &Config, limit: Option<usize>, dry_run: bool) -> Result<()> {
    let provider =
        embedding::create_provider(&config.embedding, RetryPolicy::from_config(&config.retry))?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let limit = limit.unwrap_or(usize::MAX).min(i64::MAX as usize);

    if dry_run {
        let pending = store
            .posts_missing_embedding(provider.model_name(), limit)
            .await?;
        println!("embed pending (dry-run)");
        println!("  posts needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    let summary = embed_pending(&store, provider.as_ref(), limit).await?;

    println!("embed pending");
    if summary.pending == 0 {
        println!("  all posts up to date");
    } else {
        println!("  total pending: {}", summary.pending);
        println!("  embedded: {}", summary.embedded);
        println!("  skipped: {}", summary.skipped);
        println!("  failed: {}", summary.failed);
    }

    pool.close().await;
    Ok(())
}

/// Embed up to `limit` pending posts one at a time.
///
/// A failed or mis-sized vector is logged and counted; the run continues.
pub async fn embed_pending(
    store: &dyn PostStore,
    provider: &dyn EmbeddingProvider,
    limit: usize,
) -> Result<EmbedSummary> {
    let model = provider.model_name().to_string();
    let pending = store.posts_missing_embedding(&model, limit).await?;
    let mut summary = EmbedSummary {
        pending: pending.len() as u64,
        ..Default::default()
    };

    for post in &pending {
        let hash = post.embedding_hash();
        match provider.embed_text(&post.embedding_text()).await {
            Ok(Some(vector)) if vector.len() == provider.dims() => {
                store
                    .save_embedding(&post.id, &vector, &model, &hash, Utc::now())
                    .await?;
                summary.embedded += 1;
            }
            Ok(Some(vector)) => {
                warn!(
                    post_id = %post.id,
                    expected = provider.dims(),
                    got = vector.len(),
                    "Embedding has wrong dimensionality, discarding"
                );
                summary.failed += 1;
            }
            Ok(None) => summary.skipped += 1,
            Err(e) => {
                warn!(post_id = %post.id, error = %e, "Embedding failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use feedback_dedup_core::models::Post;
    use feedback_dedup_core::store::memory::InMemoryStore;

    /// Two-dimensional "embedding": counts of 'a' and 'e'.
    struct LetterCounts {
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for LetterCounts {
        fn model_name(&self) -> &str {
            "letters"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_text(&self, text: &str) -> Result<Option<Vec<f32>>> {
            if text.contains("boom") {
                bail!("provider exploded");
            }
            let a = text.matches('a').count() as f32;
            let e = text.matches('e').count() as f32;
            Ok(Some(vec![a, e]))
        }
    }

    fn post(id: &str, title: &str) -> Post {
        Post {
            id: id.into(),
            board_id: None,
            title: title.into(),
            content: String::new(),
            vote_count: 0,
            comment_count: 0,
            created_at: Utc::now(),
            canonical_post_id: None,
            merge_checked_at: None,
        }
    }

    #[tokio::test]
    async fn embeds_pending_and_counts_failures() {
        let store = InMemoryStore::new();
        store.upsert_post(&post("p1", "Add a dark theme")).await.unwrap();
        store.upsert_post(&post("p2", "boom")).await.unwrap();

        let provider = LetterCounts { dims: 2 };
        let summary = embed_pending(&store, &provider, 10).await.unwrap();
        assert_eq!(summary.pending, 2);
        assert_eq!(summary.embedded, 1);
        assert_eq!(summary.failed, 1);

        let e = store.get_embedding("p1").await.unwrap().unwrap();
        assert_eq!(e.model, "letters");
        assert_eq!(e.vector.len(), 2);

        let again = embed_pending(&store, &provider, 10).await.unwrap();
        assert_eq!(again.pending, 1);
    }

    #[tokio::test]
    async fn edited_post_is_embedded_again() {
        let store = InMemoryStore::new();
        let mut p = post("p1", "Dark mode");
        store.upsert_post(&p).await.unwrap();
        let provider = LetterCounts { dims: 2 };
        embed_pending(&store, &provider, 10).await.unwrap();
        assert_eq!(store.get_embedding("p1").await.unwrap().unwrap().vector, vec![1.0, 1.0]);

        p.title = "Export invoices as a spreadsheet".into();
        store.upsert_post(&p).await.unwrap();
        let summary = embed_pending(&store, &provider, 10).await.unwrap();
        assert_eq!(summary.embedded, 1);

        let e = store.get_embedding("p1").await.unwrap().unwrap();
        assert_eq!(e.hash, p.embedding_hash());
        assert_eq!(e.vector, vec![3.0, 4.0]);
    }

    #[tokio::test]
    async fn wrong_dimensionality_is_not_stored() {
        let store = InMemoryStore::new();
        store.upsert_post(&post("p1", "Dark mode")).await.unwrap();

        let provider = LetterCounts { dims: 3 };
        let summary = embed_pending(&store, &provider, 10).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(store.get_embedding("p1").await.unwrap().is_none());
    }
}
