//! Detection tuning parameters, decoupled from application config.
//!
//! Every pipeline stage takes a [`DetectionParams`] by reference instead of
//! reading global constants, so tests can vary one threshold at a time.

use serde::Deserialize;

/// Thresholds and limits shared by candidate search and verification.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Maximum number of candidates handed to the verifier.
    pub candidate_limit: usize,
    /// Minimum cosine similarity for a vector neighbor.
    pub vector_threshold: f64,
    /// Minimum fused score for a candidate to survive.
    pub hybrid_threshold: f64,
    /// Weight of the lexical score when it boosts the vector score.
    pub fts_weight: f64,
    /// Minimum model confidence for a duplicate verdict to count.
    pub llm_confidence_threshold: f64,
    /// Characters of post content included per post in the verifier prompt.
    pub max_content_chars: usize,
    /// Saturation constant that maps unbounded BM25 relevance into `[0, 1)`.
    pub lexical_saturation: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            candidate_limit: 5,
            vector_threshold: 0.35,
            hybrid_threshold: 0.4,
            fts_weight: 0.3,
            llm_confidence_threshold: 0.75,
            max_content_chars: 2000,
            lexical_saturation: 10.0,
        }
    }
}

impl DetectionParams {
    /// Rows fetched from each of the two neighbor searches.
    pub fn per_search_limit(&self) -> usize {
        self.candidate_limit * 2
    }

    /// Check that every threshold lies in its valid range.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.candidate_limit == 0 {
            anyhow::bail!("detection.candidate_limit must be >= 1");
        }
        for (name, value) in [
            ("vector_threshold", self.vector_threshold),
            ("hybrid_threshold", self.hybrid_threshold),
            ("fts_weight", self.fts_weight),
            ("llm_confidence_threshold", self.llm_confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("detection.{} must be in [0.0, 1.0]", name);
            }
        }
        if self.max_content_chars == 0 {
            anyhow::bail!("detection.max_content_chars must be > 0");
        }
        if self.lexical_saturation <= 0.0 {
            anyhow::bail!("detection.lexical_saturation must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let params = DetectionParams::default();
        params.validate().unwrap();
        assert_eq!(params.per_search_limit(), 10);
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let params = DetectionParams {
            hybrid_threshold: 1.5,
            ..Default::default()
        };
        let err = params.validate().unwrap_err().to_string();
        assert!(err.contains("hybrid_threshold"));
    }

    #[test]
    fn zero_candidate_limit_rejected() {
        let params = DetectionParams {
            candidate_limit: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
