//! Prompt construction and response parsing for duplicate verification.
//!
//! The model sees the source post and every candidate in one prompt and
//! answers with a JSON array, one verdict per candidate:
//!
//! ```json
//! [{"candidatePostId": "…", "isDuplicate": true, "confidence": 0.9, "reasoning": "…"}]
//! ```
//!
//! Only verdicts with `isDuplicate == true` and a confidence at or above
//! the configured threshold become [`Assessment`]s. Anything that cannot be
//! parsed yields no assessments at all.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Assessment, MergeCandidate, Post};
use crate::params::DetectionParams;

/// System prompt for the verifier.
pub const SYSTEM_PROMPT: &str = r#"You review feedback posts on a product feedback board and decide whether posts are duplicates.

Two posts are duplicates ONLY if they request the exact same change to the product.
Overlapping topic, shared keywords, or the same product area are NOT enough.
Examples that are NOT duplicates:
- "Dark mode for the dashboard" vs "Dark mode for the mobile app"
- "Export to CSV" vs "Import from CSV"
- "Faster search" vs "Search by tag"

Merging posts moves votes from one post to another, so a wrong merge hurts users more than a missed one. When unsure, answer false.

Respond with a JSON array and nothing else. Include one object per candidate:
[{"candidatePostId": "<id>", "isDuplicate": true|false, "confidence": <number 0..1>, "reasoning": "<one or two sentences>"}]"#;

/// One entry of the model's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub candidate_post_id: String,
    pub is_duplicate: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Why a response produced no verdicts.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed verifier response: {message}")]
pub struct ParseFailure {
    pub message: String,
}

/// Truncate `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Strip a surrounding markdown code fence (```json … ```), if present.
pub fn strip_code_fence(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Build the user prompt listing the source post and its candidates.
pub fn build_user_prompt(
    source: &Post,
    candidates: &[MergeCandidate],
    params: &DetectionParams,
) -> String {
    let max = params.max_content_chars;
    let mut prompt = String::new();

    prompt.push_str("SOURCE POST\n");
    prompt.push_str(&format!("id: {}\n", source.id));
    prompt.push_str(&format!("title: {}\n", source.title));
    prompt.push_str(&format!(
        "content: {}\n\n",
        truncate_chars(&source.content, max)
    ));

    prompt.push_str("CANDIDATES\n");
    for (i, c) in candidates.iter().enumerate() {
        prompt.push_str(&format!("[{}] id: {}\n", i + 1, c.post_id));
        prompt.push_str(&format!("title: {}\n", c.title));
        prompt.push_str(&format!("content: {}\n\n", truncate_chars(&c.content, max)));
    }

    prompt.push_str(
        "For each candidate, decide whether it requests exactly the same change as the source post.",
    );
    prompt
}

/// Parse the raw model output into verdicts.
pub fn parse_verdicts(response: &str) -> Result<Vec<Verdict>, ParseFailure> {
    let body = strip_code_fence(response);
    serde_json::from_str::<Vec<Verdict>>(body).map_err(|e| ParseFailure {
        message: e.to_string(),
    })
}

/// Keep confirmed duplicates that refer to one of `candidates`.
///
/// Verdicts for ids the model invented are dropped, as are confidences
/// outside `[0, 1]`. When the model answers twice for one candidate, the
/// first answer wins.
pub fn confirmed_assessments(
    verdicts: Vec<Verdict>,
    candidates: &[MergeCandidate],
    params: &DetectionParams,
) -> Vec<Assessment> {
    let mut out: Vec<Assessment> = Vec::new();
    for v in verdicts {
        if !v.is_duplicate || !(0.0..=1.0).contains(&v.confidence) {
            continue;
        }
        if v.confidence < params.llm_confidence_threshold {
            continue;
        }
        if !candidates.iter().any(|c| c.post_id == v.candidate_post_id) {
            continue;
        }
        if out.iter().any(|a| a.candidate_post_id == v.candidate_post_id) {
            continue;
        }
        out.push(Assessment {
            candidate_post_id: v.candidate_post_id,
            confidence: v.confidence,
            reasoning: v.reasoning,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candidate(id: &str) -> MergeCandidate {
        MergeCandidate {
            post_id: id.into(),
            title: format!("title {}", id),
            content: "body".into(),
            vote_count: 0,
            comment_count: 0,
            created_at: Utc::now(),
            vector_score: 0.8,
            fts_score: 0.0,
            hybrid_score: 0.8,
        }
    }

    fn verdict(id: &str, dup: bool, confidence: f64) -> Verdict {
        Verdict {
            candidate_post_id: id.into(),
            is_duplicate: dup,
            confidence,
            reasoning: "r".into(),
        }
    }

    #[test]
    fn test_parse_plain_array() {
        let raw = r#"[{"candidatePostId":"a","isDuplicate":true,"confidence":0.9,"reasoning":"same"}]"#;
        let v = parse_verdicts(raw).unwrap();
        assert_eq!(v.len(), 1);
        assert!(v[0].is_duplicate);
    }

    #[test]
    fn test_parse_fenced_array() {
        let raw = "```json\n[{\"candidatePostId\":\"a\",\"isDuplicate\":false,\"confidence\":0.1}]\n```";
        let v = parse_verdicts(raw).unwrap();
        assert_eq!(v[0].candidate_post_id, "a");
        assert_eq!(v[0].reasoning, "");
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_verdicts("not json").is_err());
        assert!(parse_verdicts("{\"candidatePostId\":\"a\"}").is_err());
    }

    #[test]
    fn test_low_confidence_duplicate_dropped() {
        let params = DetectionParams::default();
        let out = confirmed_assessments(
            vec![verdict("a", true, 0.74), verdict("b", true, 0.75)],
            &[candidate("a"), candidate("b")],
            &params,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].candidate_post_id, "b");
    }

    #[test]
    fn test_non_duplicate_and_unknown_ids_dropped() {
        let params = DetectionParams::default();
        let out = confirmed_assessments(
            vec![
                verdict("a", false, 0.99),
                verdict("ghost", true, 0.99),
                verdict("b", true, f64::NAN),
            ],
            &[candidate("a"), candidate("b")],
            &params,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_out_of_range_confidence_dropped() {
        let params = DetectionParams::default();
        let raw = r#"[
            {"candidatePostId":"a","isDuplicate":true,"confidence":60,"reasoning":"60% sure"},
            {"candidatePostId":"b","isDuplicate":true,"confidence":-0.9},
            {"candidatePostId":"c","isDuplicate":true,"confidence":1.0}
        ]"#;
        let out = confirmed_assessments(
            parse_verdicts(raw).unwrap(),
            &[candidate("a"), candidate("b"), candidate("c")],
            &params,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].candidate_post_id, "c");
        assert_eq!(out[0].confidence, 1.0);
    }

    #[test]
    fn test_parse_failure_message() {
        let err = parse_verdicts("not json").unwrap_err();
        assert!(err.to_string().starts_with("malformed verifier response: "));
    }

    #[test]
    fn test_repeated_verdict_keeps_first() {
        let params = DetectionParams::default();
        let out = confirmed_assessments(
            vec![verdict("a", true, 0.8), verdict("a", true, 0.95)],
            &[candidate("a")],
            &params,
        );
        assert_eq!(out.len(), 1);
        assert!((out[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_truncate_chars_respects_multibyte() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn test_prompt_truncates_content() {
        let params = DetectionParams {
            max_content_chars: 10,
            ..Default::default()
        };
        let source = Post {
            id: "src".into(),
            board_id: None,
            title: "Source".into(),
            content: "x".repeat(50),
            vote_count: 0,
            comment_count: 0,
            created_at: Utc::now(),
            canonical_post_id: None,
            merge_checked_at: None,
        };
        let prompt = build_user_prompt(&source, &[candidate("a")], &params);
        assert!(prompt.contains(&format!("content: {}\n", "x".repeat(10))));
        assert!(!prompt.contains(&"x".repeat(11)));
        assert!(prompt.contains("[1] id: a"));
    }
}
