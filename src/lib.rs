//! # Feedback dedup
//!
//! Duplicate-feedback detection for a product feedback board.
//!
//! Each post is compared against the rest of the board with a hybrid search
//! (vector similarity plus full-text relevance). The strongest candidates go
//! to a language model in one batched prompt, and a confirmed duplicate
//! becomes a merge suggestion that names which post should survive. Nothing
//! is ever merged automatically.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ import/embed │──▶│   SQLite     │◀──│    sweep     │
//! │  (posts in)  │   │ FTS5 + BLOBs │   │ check_post…  │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │
//!                            ┌─────────────────┤
//!                            ▼                 ▼
//!                     ┌────────────┐    ┌─────────────┐
//!                     │ embeddings │    │  chat model │
//!                     │ OpenAI/    │    │  (verifier) │
//!                     │ Ollama     │    └─────────────┘
//!                     └────────────┘
//! ```
//!
//! Pure logic (models, fusion, verdict parsing, direction) lives in the
//! `feedback-dedup-core` crate; this crate adds configuration, SQLite,
//! HTTP providers, retries and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | `PostStore` over SQLite |
//! | [`embedding`] | OpenAI and Ollama embedding providers |
//! | [`llm`] | Chat-completion client |
//! | [`retry`] | Linear-backoff retry for provider calls |
//! | [`verifier`] | Batched duplicate verification |
//! | [`sweep`] | Per-post checks and the batch sweep |
//! | [`progress`] | Sweep progress on stderr |
//! | [`import`] | JSON Lines post import |
//! | [`embed_cmd`] | Embedding backfill |
//! | [`suggestions`] | Suggestion listing |

pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod import;
pub mod llm;
pub mod migrate;
pub mod progress;
pub mod retry;
pub mod sqlite_store;
pub mod suggestions;
pub mod sweep;
pub mod verifier;
