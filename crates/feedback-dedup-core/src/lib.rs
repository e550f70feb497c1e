//! # Feedback Dedup Core
//!
//! Runtime-agnostic logic for duplicate-feedback detection: data models,
//! detection parameters, the post store trait, hybrid candidate search,
//! verifier prompt/response handling, merge direction and best-match
//! selection.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! Providers and storage backends are plugged in by the `feedback-dedup`
//! application crate.

pub mod candidates;
pub mod direction;
pub mod embedding;
pub mod models;
pub mod params;
pub mod selection;
pub mod store;
pub mod verdict;
