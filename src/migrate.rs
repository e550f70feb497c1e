use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Create posts table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            id TEXT PRIMARY KEY,
            board_id TEXT,
            title TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            hash TEXT NOT NULL,
            vote_count INTEGER NOT NULL DEFAULT 0,
            comment_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            canonical_post_id TEXT,
            merge_checked_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create post_embeddings table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS post_embeddings (
            post_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            embedded_at INTEGER NOT NULL,
            FOREIGN KEY (post_id) REFERENCES posts(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create merge_suggestions table; (pair_low, pair_high) is the unordered pair
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merge_suggestions (
            id TEXT PRIMARY KEY,
            source_post_id TEXT NOT NULL,
            target_post_id TEXT NOT NULL,
            pair_low TEXT NOT NULL,
            pair_high TEXT NOT NULL,
            vector_score REAL NOT NULL,
            fts_score REAL NOT NULL,
            hybrid_score REAL NOT NULL,
            llm_confidence REAL NOT NULL,
            llm_reasoning TEXT NOT NULL,
            llm_model TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(pair_low, pair_high)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='posts_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE posts_fts USING fts5(
                post_id UNINDEXED,
                title,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at, id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_merge_checked_at ON posts(merge_checked_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_post_embeddings_model ON post_embeddings(model)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_merge_suggestions_created_at \
         ON merge_suggestions(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
