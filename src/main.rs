//! # quote-ingest CLI (`qi`)
//!
//! Drives the ingestion pipeline from the command line.
//!
//! ## Usage
//!
//! ```bash
//! qi --config ./config/quote-ingest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qi init` | Create the SQLite database and run schema migrations |
//! | `qi ingest <file\|url>` | Ingest a PDF or EPUB for a user |
//! | `qi status <id>` | Print a document's upload status |
//! | `qi list` | List a user's documents |
//! | `qi delete <id>` | Delete a document and its vector namespace |
//! | `qi chunk <file>` | Preview units, chunks and the plan decision |
//! | `qi plans` | Show plan ceilings |

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use quote_ingest::commands::{self, IngestArgs};
use quote_ingest::config::{self, Config};
use quote_ingest::logging;
use quote_ingest::migrate;
use quote_ingest::models::{DocumentFormat, PlanTier};

/// quote-ingest: turn uploaded PDFs and EPUBs into citable, embedded chunks.
#[derive(Parser)]
#[command(name = "qi", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/quote-ingest.toml")]
    config: PathBuf,

    /// Log filter (e.g. `debug`, `quote_ingest=trace`). Overrides `RUST_LOG`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest a document.
    ///
    /// TARGET is a local path or an http(s) URL. Without TARGET the file is
    /// fetched from the uploads base URL using --key and --name.
    Ingest {
        target: Option<String>,

        /// Owning user id.
        #[arg(long)]
        user: String,

        /// Subscription plan: `free` or `pro`.
        #[arg(long, default_value = "free")]
        plan: PlanTier,

        /// Mark the document private.
        #[arg(long)]
        private: bool,

        /// Storage key. Defaults to a hash of the file (or URL).
        #[arg(long)]
        key: Option<String>,

        /// File name, used to pick the format. Defaults to the target's name.
        #[arg(long)]
        name: Option<String>,
    },

    /// Print the upload status of a document.
    Status {
        id: String,
        #[arg(long)]
        user: String,
    },

    /// List a user's documents, newest first.
    List {
        #[arg(long)]
        user: String,
    },

    /// Delete a document and everything indexed for it.
    Delete {
        id: String,
        #[arg(long)]
        user: String,
    },

    /// Dry run: load and chunk a local file, then report the plan decision.
    Chunk {
        path: PathBuf,

        /// Force the format instead of using the file extension.
        #[arg(long)]
        format: Option<DocumentFormat>,

        #[arg(long, default_value = "free")]
        plan: PlanTier,

        /// Number of chunk previews to print.
        #[arg(long, default_value_t = 5)]
        show: usize,
    },

    /// Show the configured plan ceilings.
    Plans,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref(), false)?;

    // Commands that work without a config file
    match &cli.command {
        Commands::Chunk {
            path,
            format,
            plan,
            show,
        } => {
            let cfg = load_or_default(&cli.config)?;
            return commands::run_chunk(&cfg, path, *format, *plan, *show).await;
        }
        Commands::Plans => {
            let cfg = load_or_default(&cli.config)?;
            return commands::run_plans(&cfg);
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            target,
            user,
            plan,
            private,
            key,
            name,
        } => {
            commands::run_ingest(
                &cfg,
                IngestArgs {
                    target,
                    user_id: user,
                    plan,
                    private,
                    key,
                    name,
                },
            )
            .await?;
        }
        Commands::Status { id, user } => {
            commands::run_status(&cfg, &id, &user).await?;
        }
        Commands::List { user } => {
            commands::run_list(&cfg, &user).await?;
        }
        Commands::Delete { id, user } => {
            commands::run_delete(&cfg, &id, &user).await?;
        }
        Commands::Chunk { .. } | Commands::Plans => {}
    }

    Ok(())
}

/// The config file if it exists, defaults otherwise.
fn load_or_default(path: &std::path::Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::minimal())
    }
}
