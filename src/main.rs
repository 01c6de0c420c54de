//! # PaperIgnition Ops CLI (`pio`)
//!
//! One binary for the PaperIgnition operational chores: schema migrations,
//! loading recommendations through the backend, log cleanup, image upload,
//! paper embedding backfill, and the LLM question proxy.
//!
//! ## Usage
//!
//! ```bash
//! pio --config ./config/pio.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pio migrate list\|status\|up\|down` | Schema migrations |
//! | `pio recommend add\|batch` | Insert recommendations via the backend API |
//! | `pio log-clean` | Drop noisy log lines, expire old log files |
//! | `pio upload <dir>` | Upload images to object storage |
//! | `pio embed pending\|rebuild` | Generate paper embeddings |
//! | `pio ask "<question>"` | Ask the configured LLM once |
//! | `pio serve` | Start the LLM proxy HTTP server |
//! | `pio doctor [check ...]` | Run smoke checks against every dependency |
//! | `pio completions <shell>` | Print shell completions |

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paperignition_ops::models::RecommendationRecord;
use paperignition_ops::recommend_cmd::Targets;
use paperignition_ops::{
    checks, config, embed_cmd, llm, log_clean, migrate, recommend_cmd, server, upload_cmd,
};

/// PaperIgnition Ops: operational tooling for the PaperIgnition service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. `DATABASE_URL` and `BACKEND_URL` (also read from `.env`) override
/// the file.
#[derive(Parser)]
#[command(
    name = "pio",
    about = "PaperIgnition Ops: migrations, recommendation loading, log cleanup, uploads, embeddings, and an LLM proxy",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pio.toml")]
    config: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the database schema.
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Add recommendation records through the backend API.
    Recommend {
        #[command(subcommand)]
        action: RecommendAction,
    },

    /// Remove noisy lines from log files and delete expired logs.
    LogClean {
        /// Log directory (defaults to `[logs].dir`).
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Drop lines matching this regex. Repeatable; replaces the configured patterns.
        #[arg(long = "pattern")]
        patterns: Vec<String>,

        /// Delete log files not modified within this many days.
        #[arg(long)]
        retention_days: Option<u64>,

        /// Report what would change without touching any file.
        #[arg(long)]
        dry_run: bool,
    },

    /// Upload image files from a directory to object storage.
    Upload {
        /// Directory to scan for images.
        dir: PathBuf,

        /// Key prefix (defaults to `[storage].prefix`).
        #[arg(long)]
        prefix: Option<String>,

        /// List files and keys without uploading.
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate paper embeddings into the `papers.embedding` column.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Ask the configured LLM a single question.
    Ask {
        question: String,
    },

    /// Start the LLM proxy HTTP server.
    Serve,

    /// Run smoke checks against the configured dependencies.
    Doctor {
        /// Checks to run (`config`, `database`, `backend`, `llm`, `storage`). All when omitted.
        names: Vec<String>,

        /// List available checks and exit.
        #[arg(long)]
        list: bool,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Print the migration catalog (no database needed).
    List,
    /// Show which migrations are applied.
    Status,
    /// Apply pending migrations.
    Up {
        /// Stop after this version.
        #[arg(long)]
        to: Option<i64>,
    },
    /// Revert the most recently applied migrations.
    Down {
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },
}

#[derive(Subcommand)]
enum RecommendAction {
    /// Add one recommendation for one user.
    Add {
        #[arg(long)]
        user: String,
        #[arg(long)]
        paper_id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        authors: Option<String>,
        #[arg(long = "abstract")]
        abstract_text: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        score: Option<f64>,
        #[arg(long)]
        blog: Option<String>,
    },
    /// Add every record in a JSON / JSON Lines file for the selected users.
    Batch {
        /// Records file.
        file: PathBuf,

        /// Target user. Repeatable.
        #[arg(long = "user", required_unless_present = "all_users")]
        users: Vec<String>,

        /// Target every user returned by `/api/users/all`.
        #[arg(long, conflicts_with = "users")]
        all_users: bool,

        /// Show what would be sent without calling the backend.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed papers that are missing or have stale embeddings.
    Pending {
        /// Maximum number of papers to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear and regenerate all paper embeddings.
    Rebuild {
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "paperignition_ops=debug,pio=debug,tower_http=debug"
    } else {
        "paperignition_ops=info,pio=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load the config file if it exists, otherwise run on defaults.
fn load_or_minimal(path: &Path) -> Result<config::Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        let mut cfg = config::Config::minimal();
        cfg.apply_env_overrides();
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that work without a config file
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "pio", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Migrate {
            action: MigrateAction::List,
        } => {
            migrate::list_migrations();
            return Ok(());
        }
        Commands::Doctor { list: true, .. } => {
            checks::list_checks();
            return Ok(());
        }
        Commands::LogClean {
            dir,
            patterns,
            retention_days,
            dry_run,
        } => {
            let cfg = load_or_minimal(&cli.config)?;
            let opts = log_clean::CleanOptions::from_config(
                &cfg.logs,
                dir.clone(),
                patterns.clone(),
                *retention_days,
                *dry_run,
            );
            log_clean::run_log_clean(&opts)?;
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Migrate { action } => match action {
            MigrateAction::Status => migrate::run_status(&cfg).await?,
            MigrateAction::Up { to } => migrate::run_up(&cfg, to).await?,
            MigrateAction::Down { steps } => migrate::run_down(&cfg, steps).await?,
            MigrateAction::List => unreachable!(),
        },
        Commands::Recommend { action } => match action {
            RecommendAction::Add {
                user,
                paper_id,
                title,
                authors,
                abstract_text,
                url,
                reason,
                score,
                blog,
            } => {
                let record = RecommendationRecord {
                    paper_id,
                    title,
                    authors,
                    abstract_text,
                    url,
                    content: None,
                    blog,
                    recommendation_reason: reason,
                    relevance_score: score,
                };
                recommend_cmd::run_add(&cfg, &user, record).await?;
            }
            RecommendAction::Batch {
                file,
                users,
                all_users,
                dry_run,
            } => {
                let targets = if all_users {
                    Targets::AllUsers
                } else {
                    Targets::Users(users)
                };
                recommend_cmd::run_batch(&cfg, &file, targets, dry_run).await?;
            }
        },
        Commands::Upload {
            dir,
            prefix,
            dry_run,
        } => {
            upload_cmd::run_upload(&cfg, &dir, prefix, dry_run).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Ask { question } => {
            llm::run_ask(&cfg.llm, &question).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Doctor { names, .. } => {
            checks::run_doctor(&cfg, &names).await?;
        }
        Commands::Completions { .. } | Commands::LogClean { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
