//! # Feedback dedup CLI (`dedup`)
//!
//! Finds feedback posts that ask for the same thing and records merge
//! suggestions for a human to review.
//!
//! ## Usage
//!
//! ```bash
//! dedup --config ./config/dedup.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dedup init` | Create the SQLite database and run schema migrations |
//! | `dedup import <file>` | Upsert posts from a JSON Lines file |
//! | `dedup embed pending` | Embed posts that are missing an embedding |
//! | `dedup check <post-id>` | Run one post through duplicate detection |
//! | `dedup sweep` | Check every eligible post |
//! | `dedup suggestions` | List the newest merge suggestions |
//!
//! ## Examples
//!
//! ```bash
//! dedup init
//! dedup import posts.jsonl
//! dedup embed pending
//! dedup sweep --dry-run --limit 20
//! dedup sweep
//! dedup suggestions --limit 10
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use feedback_dedup::progress::ProgressMode;
use feedback_dedup::sweep::SweepOptions;
use feedback_dedup::{config, embed_cmd, import, migrate, suggestions, sweep};

/// Duplicate-feedback detection: hybrid search, model verification, and a
/// review queue of merge suggestions.
#[derive(Parser)]
#[command(name = "dedup", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/dedup.toml`. `DATABASE_URL` overrides `[db].url`.
    #[arg(long, global = true, default_value = "./config/dedup.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent.
    Init,

    /// Upsert posts from a JSON Lines file (one post per line).
    Import {
        /// Path to the `.jsonl` file.
        path: PathBuf,
    },

    /// Manage post embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Check a single post for duplicates.
    Check {
        /// Post id.
        post_id: String,

        /// Report what would be suggested without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Check every eligible post for duplicates.
    ///
    /// A post is eligible when it is embedded, not merged, and was not
    /// checked within the cooldown window.
    Sweep {
        /// Run detection but write no suggestions and no check stamps.
        #[arg(long)]
        dry_run: bool,

        /// Ignore the cooldown and re-check every embedded, unmerged post.
        #[arg(long)]
        force: bool,

        /// Maximum number of posts to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress output on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// List the newest merge suggestions.
    Suggestions {
        /// Maximum number of suggestions to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed posts with no embedding, or one from a different model.
    Pending {
        /// Maximum number of posts to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("feedback_dedup=info,feedback_dedup_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { path } => {
            import::run_import(&cfg, &path).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, dry_run } => {
                embed_cmd::run_embed_pending(&cfg, limit, dry_run).await?;
            }
        },
        Commands::Check { post_id, dry_run } => {
            sweep::run_check_command(&cfg, &post_id, dry_run).await?;
        }
        Commands::Sweep {
            dry_run,
            force,
            limit,
            progress,
        } => {
            let options = SweepOptions {
                dry_run,
                force,
                limit,
            };
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            sweep::run_sweep_command(&cfg, options, mode).await?;
        }
        Commands::Suggestions { limit, json } => {
            suggestions::run_list(&cfg, limit, json).await?;
        }
    }

    Ok(())
}
