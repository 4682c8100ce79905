//! # Training Feedback CLI (`tfb`)
//!
//! The `tfb` binary drives the feedback loop: it stores and moderates
//! corrections, runs the nightly pattern and calibration jobs, maintains
//! the embedding index and exports training data.
//!
//! ## Usage
//!
//! ```bash
//! tfb --config ./config/tfb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tfb init` | Create the SQLite database and run schema migrations |
//! | `tfb contribute <file>` | Anonymize and store corrections from a JSON file |
//! | `tfb pending` | List contributions awaiting moderation |
//! | `tfb moderate <id> approve\|reject` | Moderate a pending contribution |
//! | `tfb analyze` | Mine correction patterns |
//! | `tfb patterns` | List discovered patterns |
//! | `tfb calibrate <trade>\|--all` | Recalibrate confidence thresholds |
//! | `tfb thresholds <trade>` | Show thresholds for a trade |
//! | `tfb embed pending` | Index approved contributions |
//! | `tfb retrieve "<query>" --trade <trade>` | Find similar past corrections |
//! | `tfb nightly` | Run the analyzer and calibrator over every trade |
//! | `tfb export --format jsonl\|raw` | Export approved contributions |
//! | `tfb stats` | Database overview |

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use training_feedback::contribute::{self, Decision};
use training_feedback::export::{self, ExportFormat};
use training_feedback::models::CorrectionKind;
use training_feedback::{
    calibrate, config, indexer, migrate, nightly, patterns, retriever, stats,
};

/// Training feedback loop for AI-assisted bid line-item extraction.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "tfb",
    about = "Training feedback loop for AI-assisted bid line-item extraction",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tfb.toml")]
    config: PathBuf,

    /// Log debug output to stderr. `RUST_LOG` takes precedence.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Anonymize and store corrections as pending contributions.
    ///
    /// The file holds one correction object or an array of them.
    Contribute {
        /// Path to a JSON file of corrections.
        file: PathBuf,
    },

    /// List contributions awaiting moderation.
    Pending {
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Approve or reject a pending contribution.
    Moderate {
        /// Contribution id.
        id: String,
        decision: DecisionArg,
    },

    /// Mine approved contributions for recurring correction patterns.
    Analyze {
        /// Restrict to one trade category.
        #[arg(long)]
        trade: Option<String>,
    },

    /// List discovered patterns.
    Patterns {
        #[arg(long)]
        trade: Option<String>,

        /// Only show active (promoted) patterns.
        #[arg(long)]
        active: bool,
    },

    /// Recalibrate confidence thresholds.
    Calibrate {
        /// Trade category to calibrate.
        trade: Option<String>,

        /// Calibrate every trade category.
        #[arg(long, conflicts_with = "trade")]
        all: bool,

        /// Write new thresholds even below the sample floor.
        #[arg(long)]
        force: bool,
    },

    /// Show the thresholds in effect for a trade category.
    Thresholds { trade: String },

    /// Manage the embedding index.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Retrieve past corrections similar to a query.
    Retrieve {
        query: String,

        #[arg(long)]
        trade: String,

        /// Correction kind about to be made, e.g. `description`.
        #[arg(long)]
        kind: Option<CorrectionKind>,

        /// Number of results (defaults to `[retrieval] k`).
        #[arg(long)]
        k: Option<usize>,

        /// Only return high-quality examples.
        #[arg(long)]
        high_quality: bool,
    },

    /// Run pattern analysis and calibration over every trade category.
    Nightly,

    /// Export approved contributions as training data.
    Export {
        #[arg(long, value_enum, default_value = "jsonl")]
        format: FormatArg,

        /// Output file; stdout if omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show database statistics.
    Stats,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed approved contributions that are not yet indexed.
    Pending {
        /// Override `[indexer] batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Keep running batches until the backlog is empty.
        #[arg(long)]
        drain: bool,

        /// Upper bound on batches when draining.
        #[arg(long, default_value = "1000")]
        max_batches: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DecisionArg {
    Approve,
    Reject,
}

impl From<DecisionArg> for Decision {
    fn from(arg: DecisionArg) -> Self {
        match arg {
            DecisionArg::Approve => Decision::Approve,
            DecisionArg::Reject => Decision::Reject,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Jsonl,
    Raw,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Jsonl => ExportFormat::Jsonl,
            FormatArg::Raw => ExportFormat::Raw,
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("training_feedback={}", level)));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Contribute { file } => {
            contribute::run_contribute(&cfg, &file).await?;
        }
        Commands::Pending { limit } => {
            contribute::run_pending(&cfg, limit).await?;
        }
        Commands::Moderate { id, decision } => {
            contribute::run_moderate(&cfg, &id, decision.into()).await?;
        }
        Commands::Analyze { trade } => {
            patterns::run_analyze(&cfg, trade.as_deref()).await?;
        }
        Commands::Patterns { trade, active } => {
            patterns::run_patterns(&cfg, trade.as_deref(), active).await?;
        }
        Commands::Calibrate { trade, all, force } => {
            calibrate::run_calibrate(&cfg, trade.as_deref(), all, force).await?;
        }
        Commands::Thresholds { trade } => {
            calibrate::run_thresholds(&cfg, &trade).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                batch_size,
                drain,
                max_batches,
            } => {
                indexer::run_embed_pending(&cfg, batch_size, drain, max_batches).await?;
            }
        },
        Commands::Retrieve {
            query,
            trade,
            kind,
            k,
            high_quality,
        } => {
            retriever::run_retrieve(&cfg, &trade, kind, &query, k, high_quality).await?;
        }
        Commands::Nightly => {
            nightly::run_nightly(&cfg).await?;
        }
        Commands::Export { format, output } => {
            export::run_export(&cfg, format.into(), output.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
