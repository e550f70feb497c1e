use anyhow::Result;

use feedback_dedup_core::models::MergeSuggestion;
use feedback_dedup_core::store::PostStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Print the newest merge suggestions.
pub async fn run_list(config: &Config, limit: usize, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let suggestions = store.list_merge_suggestions(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&suggestions)?);
    } else if suggestions.is_empty() {
        println!("No merge suggestions.");
    } else {
        for s in &suggestions {
            println!("{}", format_suggestion(s));
        }
    }

    pool.close().await;
    Ok(())
}

fn format_suggestion(s: &MergeSuggestion) -> String {
    format!(
        "{} → {}  confidence {:.2}  hybrid {:.2} (vector {:.2}, fts {:.2})  {}\n    {}",
        s.source_post_id,
        s.target_post_id,
        s.llm_confidence,
        s.hybrid_score,
        s.vector_score,
        s.fts_score,
        s.created_at.format("%Y-%m-%d %H:%M"),
        s.llm_reasoning
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn suggestion_line_shows_direction_and_scores() {
        let s = MergeSuggestion {
            source_post_id: "p2".into(),
            target_post_id: "p1".into(),
            vector_score: 0.8,
            fts_score: 0.2,
            hybrid_score: 0.86,
            llm_confidence: 0.93,
            llm_reasoning: "Both ask for dark mode.".into(),
            llm_model: "gpt-4o-mini".into(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        };
        let line = format_suggestion(&s);
        assert!(line.starts_with("p2 → p1"));
        assert!(line.contains("confidence 0.93"));
        assert!(line.contains("2026-03-01 12:00"));
        assert!(line.contains("Both ask for dark mode."));
    }
}
