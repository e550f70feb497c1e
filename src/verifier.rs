//! Duplicate verification: one batched model call per source post.

use anyhow::Result;
use tracing::{debug, warn};

use feedback_dedup_core::models::{Assessment, MergeCandidate, Post};
use feedback_dedup_core::params::DetectionParams;
use feedback_dedup_core::verdict::{
    build_user_prompt, confirmed_assessments, parse_verdicts, SYSTEM_PROMPT,
};

use crate::error::DedupError;
use crate::llm::ChatModel;
use crate::retry::{with_retry, RetryPolicy};

pub struct DuplicateVerifier<'a> {
    model: &'a dyn ChatModel,
    params: &'a DetectionParams,
    retry: &'a RetryPolicy,
}

impl<'a> DuplicateVerifier<'a> {
    pub fn new(
        model: &'a dyn ChatModel,
        params: &'a DetectionParams,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            model,
            params,
            retry,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Ask the model which candidates duplicate `source`.
    ///
    /// No call is made for an empty candidate list. A response that does not
    /// parse yields no assessments; provider failures that outlive the retry
    /// budget are returned as errors.
    pub async fn assess(
        &self,
        source: &Post,
        candidates: &[MergeCandidate],
    ) -> Result<Vec<Assessment>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = build_user_prompt(source, candidates, self.params);
        let raw = with_retry(self.retry, "duplicate verification", || {
            self.model.chat_complete(SYSTEM_PROMPT, &prompt)
        })
        .await?;

        let verdicts = match parse_verdicts(&raw) {
            Ok(v) => v,
            Err(failure) => {
                let err = DedupError::from(failure);
                warn!(post_id = %source.id, error = %err, "Discarding verifier response");
                return Ok(Vec::new());
            }
        };

        let assessments = confirmed_assessments(verdicts, candidates, self.params);
        debug!(
            post_id = %source.id,
            candidates = candidates.len(),
            confirmed = assessments.len(),
            "Verification complete"
        );
        Ok(assessments)
    }
}
