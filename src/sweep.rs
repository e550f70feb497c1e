//! Per-post merge checks and the batch sweep that drives them.
//!
//! A check runs one post through the whole pipeline:
//!
//! ```text
//! embedding ─▶ hybrid candidates ─▶ verifier ─▶ best match ─▶ direction ─▶ insert
//!                                                                         └▶ stamp
//! ```
//!
//! The sweep walks eligible posts in `(created_at, id)` order with a keyset
//! cursor, checks them one at a time and counts outcomes. A failing post is
//! logged and counted; it is neither stamped nor allowed to stop the run.
//! Dry runs do everything except the two writes and skip the pacing delay.

use anyhow::{bail, Result};
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use feedback_dedup_core::candidates::find_merge_candidates;
use feedback_dedup_core::models::{MergeSuggestion, Post};
use feedback_dedup_core::params::DetectionParams;
use feedback_dedup_core::selection::{best_match, build_suggestion};
use feedback_dedup_core::store::{EligibilityCursor, EligibilityQuery, PostStore};

use crate::config::{Config, SweepConfig};
use crate::db;
use crate::llm::{create_chat_model, ChatModel};
use crate::progress::{ProgressMode, SweepProgressEvent, SweepProgressReporter};
use crate::retry::RetryPolicy;
use crate::sqlite_store::SqliteStore;
use crate::verifier::DuplicateVerifier;

#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    /// Run the pipeline but write nothing.
    pub dry_run: bool,
    /// Ignore the cooldown.
    pub force: bool,
    /// Process at most this many posts.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub eligible: u64,
    pub processed: u64,
    pub suggestions_created: u64,
    /// A confirmed pair that already had a suggestion.
    pub already_suggested: u64,
    /// Dry-run only: suggestions that would have been written.
    pub would_suggest: u64,
    pub no_match: u64,
    pub failed: u64,
}

/// Result of checking one post.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    NoMatch,
    Suggested {
        suggestion: MergeSuggestion,
        /// `false` in dry runs and when the pair was already suggested.
        inserted: bool,
    },
}

impl CheckOutcome {
    fn label(&self, dry_run: bool) -> &'static str {
        match self {
            CheckOutcome::NoMatch => "no-match",
            CheckOutcome::Suggested { .. } if dry_run => "would-suggest",
            CheckOutcome::Suggested { inserted: true, .. } => "suggested",
            CheckOutcome::Suggested { inserted: false, .. } => "already-suggested",
        }
    }
}

pub struct Detector<'a> {
    store: &'a dyn PostStore,
    chat: &'a dyn ChatModel,
    params: &'a DetectionParams,
    retry: &'a RetryPolicy,
    embedding_model: Option<&'a str>,
}

impl<'a> Detector<'a> {
    pub fn new(
        store: &'a dyn PostStore,
        chat: &'a dyn ChatModel,
        params: &'a DetectionParams,
        retry: &'a RetryPolicy,
        embedding_model: Option<&'a str>,
    ) -> Self {
        Self {
            store,
            chat,
            params,
            retry,
            embedding_model,
        }
    }

    /// Run one post through candidate search, verification and persistence.
    ///
    /// Outside dry runs the post is stamped once the pass completes, whether
    /// or not a duplicate was found. Errors leave the post unstamped, except
    /// that a failed stamp after a written suggestion is only logged: the
    /// suggestion exists, so the post is reported as suggested.
    pub async fn check_post(&self, post: &Post, dry_run: bool) -> Result<CheckOutcome> {
        let candidates =
            find_merge_candidates(self.store, post, self.embedding_model, self.params).await?;

        let verifier = DuplicateVerifier::new(self.chat, self.params, self.retry);
        let assessments = verifier.assess(post, &candidates).await?;

        let now = Utc::now();
        let outcome = match best_match(&assessments, &candidates) {
            None => CheckOutcome::NoMatch,
            Some((assessment, candidate)) => {
                let suggestion =
                    build_suggestion(post, assessment, candidate, verifier.model_name(), now);
                let inserted = if dry_run {
                    false
                } else {
                    self.store.insert_merge_suggestion(&suggestion).await?
                };
                info!(
                    source = %suggestion.source_post_id,
                    target = %suggestion.target_post_id,
                    confidence = suggestion.llm_confidence,
                    hybrid_score = suggestion.hybrid_score,
                    inserted,
                    dry_run,
                    "Duplicate confirmed"
                );
                CheckOutcome::Suggested {
                    suggestion,
                    inserted,
                }
            }
        };

        if !dry_run {
            if let Err(e) = self.store.stamp_merge_checked(&post.id, now).await {
                match &outcome {
                    CheckOutcome::Suggested { inserted: true, .. } => {
                        warn!(post_id = %post.id, error = %e, "Suggestion saved but stamp failed");
                    }
                    _ => return Err(e),
                }
            }
        }
        Ok(outcome)
    }

    /// Check every eligible post, oldest first.
    pub async fn run_sweep(
        &self,
        settings: &SweepConfig,
        options: &SweepOptions,
        progress: &dyn SweepProgressReporter,
    ) -> Result<SweepSummary> {
        let mut query = EligibilityQuery::new(options.force, settings.cooldown_hours);
        if let Some(model) = self.embedding_model {
            query = query.with_embedding_model(model);
        }

        let eligible = self.store.count_eligible(&query).await?;
        let planned = options
            .limit
            .map(|l| (l as u64).min(eligible))
            .unwrap_or(eligible);

        info!(
            eligible,
            planned,
            dry_run = options.dry_run,
            force = options.force,
            "Starting merge sweep"
        );
        progress.report(SweepProgressEvent::Started {
            eligible,
            planned,
            dry_run: options.dry_run,
        });

        let delay = Duration::from_millis(settings.delay_ms);
        let mut summary = SweepSummary {
            eligible,
            ..Default::default()
        };
        let mut cursor: Option<EligibilityCursor> = None;

        while summary.processed < planned {
            let remaining = (planned - summary.processed) as usize;
            let batch_limit = settings.batch_size.min(remaining);
            let batch = self
                .store
                .posts_eligible_for_check(&query, cursor.as_ref(), batch_limit)
                .await?;
            if batch.is_empty() {
                break;
            }

            for post in &batch {
                if !options.dry_run && summary.processed > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                let label = match self.check_post(post, options.dry_run).await {
                    Ok(outcome) => {
                        match &outcome {
                            CheckOutcome::NoMatch => summary.no_match += 1,
                            CheckOutcome::Suggested { .. } if options.dry_run => {
                                summary.would_suggest += 1
                            }
                            CheckOutcome::Suggested { inserted: true, .. } => {
                                summary.suggestions_created += 1
                            }
                            CheckOutcome::Suggested { inserted: false, .. } => {
                                summary.already_suggested += 1
                            }
                        }
                        outcome.label(options.dry_run)
                    }
                    Err(e) => {
                        warn!(post_id = %post.id, error = %e, "Merge check failed");
                        summary.failed += 1;
                        "failed"
                    }
                };

                summary.processed += 1;
                progress.report(SweepProgressEvent::Checked {
                    n: summary.processed,
                    total: planned,
                    post_id: post.id.clone(),
                    outcome: label,
                });
            }

            cursor = batch.last().map(EligibilityCursor::after);
        }

        info!(
            processed = summary.processed,
            created = summary.suggestions_created,
            failed = summary.failed,
            "Merge sweep finished"
        );
        Ok(summary)
    }
}

/// `dedup sweep`: check all eligible posts and print a summary.
pub async fn run_sweep_command(
    config: &Config,
    options: SweepOptions,
    progress: ProgressMode,
) -> Result<()> {
    let chat = create_chat_model(&config.llm)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone())
        .with_lexical_saturation(config.detection.lexical_saturation);
    let retry = RetryPolicy::from_config(&config.retry);
    let detector = Detector::new(
        &store,
        chat.as_ref(),
        &config.detection,
        &retry,
        config.embedding_model(),
    );

    let reporter = progress.reporter();
    let summary = detector
        .run_sweep(&config.sweep, &options, reporter.as_ref())
        .await?;

    if options.dry_run {
        println!("sweep (dry-run)");
    } else {
        println!("sweep");
    }
    println!("  eligible: {}", summary.eligible);
    println!("  processed: {}", summary.processed);
    if options.dry_run {
        println!("  would suggest: {}", summary.would_suggest);
    } else {
        println!("  suggestions created: {}", summary.suggestions_created);
        println!("  already suggested: {}", summary.already_suggested);
    }
    println!("  no match: {}", summary.no_match);
    println!("  failed: {}", summary.failed);

    pool.close().await;
    Ok(())
}

/// `dedup check <post-id>`: run a single post through the pipeline.
pub async fn run_check_command(config: &Config, post_id: &str, dry_run: bool) -> Result<()> {
    let chat = create_chat_model(&config.llm)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone())
        .with_lexical_saturation(config.detection.lexical_saturation);

    let Some(post) = store.get_post(post_id).await? else {
        bail!("post not found: {}", post_id);
    };
    if post.is_merged() {
        println!("check {}", post.id);
        println!("  already merged into {}", post.canonical_post_id.as_deref().unwrap_or("?"));
        pool.close().await;
        return Ok(());
    }

    let retry = RetryPolicy::from_config(&config.retry);
    let detector = Detector::new(
        &store,
        chat.as_ref(),
        &config.detection,
        &retry,
        config.embedding_model(),
    );
    let outcome = detector.check_post(&post, dry_run).await?;

    println!("check {}{}", post.id, if dry_run { " (dry-run)" } else { "" });
    match &outcome {
        CheckOutcome::NoMatch => println!("  no duplicate found"),
        CheckOutcome::Suggested {
            suggestion,
            inserted,
        } => {
            println!(
                "  duplicate: merge {} into {}",
                suggestion.source_post_id, suggestion.target_post_id
            );
            println!(
                "  confidence {:.2}, hybrid score {:.2}",
                suggestion.llm_confidence, suggestion.hybrid_score
            );
            println!("  reasoning: {}", suggestion.llm_reasoning);
            if !dry_run && !inserted {
                println!("  (suggestion already recorded)");
            }
        }
    }

    pool.close().await;
    Ok(())
}
