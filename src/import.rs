//! JSON Lines import of feedback posts.
//!
//! One post per line. Only `title` is required; `id` defaults to a fresh
//! UUID and `created_at` to the import time. Blank lines are skipped.
//!
//! ```json
//! {"id": "p1", "board_id": "web", "title": "Dark mode", "content": "…", "vote_count": 12}
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

use feedback_dedup_core::models::Post;
use feedback_dedup_core::store::PostStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Deserialize)]
struct ImportRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    board_id: Option<String>,
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    vote_count: i64,
    #[serde(default)]
    comment_count: i64,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    canonical_post_id: Option<String>,
}

impl ImportRecord {
    fn into_post(self, now: DateTime<Utc>) -> Post {
        Post {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            board_id: self.board_id,
            title: self.title,
            content: self.content,
            vote_count: self.vote_count,
            comment_count: self.comment_count,
            created_at: self.created_at.unwrap_or(now),
            canonical_post_id: self.canonical_post_id,
            merge_checked_at: None,
        }
    }
}

/// Parse JSONL text into posts. Errors name the offending line.
pub fn parse_posts(text: &str) -> Result<Vec<Post>> {
    let now = Utc::now();
    let mut posts = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: ImportRecord = serde_json::from_str(line)
            .with_context(|| format!("invalid post on line {}", i + 1))?;
        posts.push(record.into_post(now));
    }
    Ok(posts)
}

pub async fn import_posts(store: &dyn PostStore, posts: &[Post]) -> Result<u64> {
    for post in posts {
        store.upsert_post(post).await?;
    }
    Ok(posts.len() as u64)
}

pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let posts = parse_posts(&text)?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let count = import_posts(&store, &posts).await?;

    println!("import {}", path.display());
    println!("  posts upserted: {}", count);

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_and_full_records() {
        let text = r#"
{"title": "Dark mode"}

{"id": "p2", "board_id": "web", "title": "CSV export", "content": "Need it", "vote_count": 4, "comment_count": 2, "created_at": "2026-01-01T00:00:00Z"}
"#;
        let posts = parse_posts(text).unwrap();
        assert_eq!(posts.len(), 2);
        assert!(!posts[0].id.is_empty());
        assert_eq!(posts[0].vote_count, 0);
        assert_eq!(posts[1].id, "p2");
        assert_eq!(posts[1].board_id.as_deref(), Some("web"));
        assert_eq!(posts[1].created_at.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn bad_line_is_reported_by_number() {
        let err = parse_posts("{\"title\": \"ok\"}\n{\"content\": \"no title\"}\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
