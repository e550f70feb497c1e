//! Best-match selection and suggestion assembly.
//!
//! At most one suggestion is produced per source post and pass, so the review
//! queue grows by at most one decision per post.

use chrono::{DateTime, Utc};

use crate::direction::{resolve_direction, Standing};
use crate::models::{Assessment, MergeCandidate, MergeSuggestion, Post};

/// Pick the strongest confirmed assessment together with its candidate.
///
/// Ordered by confidence, then by the candidate's hybrid score, both
/// descending. Assessments whose candidate is missing are skipped.
pub fn best_match<'a>(
    assessments: &'a [Assessment],
    candidates: &'a [MergeCandidate],
) -> Option<(&'a Assessment, &'a MergeCandidate)> {
    let mut pairs: Vec<(&Assessment, &MergeCandidate)> = assessments
        .iter()
        .filter_map(|a| {
            candidates
                .iter()
                .find(|c| c.post_id == a.candidate_post_id)
                .map(|c| (a, c))
        })
        .collect();

    pairs.sort_by(|(a1, c1), (a2, c2)| {
        a2.confidence
            .partial_cmp(&a1.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                c2.hybrid_score
                    .partial_cmp(&c1.hybrid_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    pairs.into_iter().next()
}

/// Build the suggestion row for a confirmed pair, resolving its direction.
pub fn build_suggestion(
    source: &Post,
    assessment: &Assessment,
    candidate: &MergeCandidate,
    llm_model: &str,
    created_at: DateTime<Utc>,
) -> MergeSuggestion {
    let direction = resolve_direction(Standing::from(source), Standing::from(candidate));
    MergeSuggestion {
        source_post_id: direction.source_post_id,
        target_post_id: direction.target_post_id,
        vector_score: candidate.vector_score,
        fts_score: candidate.fts_score,
        hybrid_score: candidate.hybrid_score,
        llm_confidence: assessment.confidence,
        llm_reasoning: assessment.reasoning.clone(),
        llm_model: llm_model.to_string(),
        created_at,
    }
}
