//! # skillpack CLI
//!
//! The `skillpack` binary drives incremental skill-package updates.
//!
//! ## Usage
//!
//! ```bash
//! skillpack --config ./skillpack.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `skillpack packages` | List configured packages, their health and stored version |
//! | `skillpack status <package>` | Show what an update would change, without writing |
//! | `skillpack update <package>` | Hash, diff, bump and write the next package version |
//! | `skillpack chunk <file>` | Print the chunks a file would be split into |
//! | `skillpack manifest <package>` | Print the stored manifest |
//! | `skillpack completions <shell>` | Generate shell completions |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use skillpack::config::{self, Config};
use skillpack::progress::ProgressMode;
use skillpack::{status, update};
use skillpack_core::{BoundaryMode, Document, StreamingChunker};

/// skillpack: incremental updates for documentation skill packages.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `skillpack.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "skillpack",
    about = "Incremental, versioned skill packages from documentation trees",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./skillpack.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured packages.
    ///
    /// Shows each package root, whether it exists, and the version and
    /// document count of the last committed update.
    Packages,

    /// Show what an update would change, without writing anything.
    Status {
        package: String,

        /// Plan a full rebuild instead of a delta.
        #[arg(long)]
        full: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Update a package.
    ///
    /// Hashes every document, compares with the stored manifest, decides the
    /// version bump and writes a full package (major) or a delta
    /// (minor/patch). Writes nothing when nothing changed.
    Update {
        package: String,

        /// Ignore stored digests and rebuild the whole package.
        #[arg(long)]
        full: bool,

        /// Show the change set and bump without writing.
        #[arg(long)]
        dry_run: bool,

        /// Abort on the first unreadable document.
        #[arg(long)]
        strict: bool,

        /// Override `[chunking] chunk_size`.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override `[chunking] overlap`.
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the chunks a file would be split into.
    ///
    /// Uses `[chunking]` from the config file when one exists.
    Chunk {
        file: PathBuf,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        chunk_overlap: Option<usize>,

        #[arg(long, value_enum)]
        boundary: Option<BoundaryArg>,

        /// One JSON object per chunk.
        #[arg(long)]
        json: bool,
    },

    /// Print the stored manifest of a package.
    Manifest { package: String },

    /// Generate shell completions on stdout.
    Completions { shell: clap_complete::Shell },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BoundaryArg {
    None,
    Paragraph,
    Markdown,
}

impl From<BoundaryArg> for BoundaryMode {
    fn from(arg: BoundaryArg) -> Self {
        match arg {
            BoundaryArg::None => BoundaryMode::None,
            BoundaryArg::Paragraph => BoundaryMode::Paragraph,
            BoundaryArg::Markdown => BoundaryMode::Markdown,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "skillpack",
                &mut std::io::stdout(),
            );
            return Ok(());
        }
        Commands::Chunk {
            file,
            chunk_size,
            chunk_overlap,
            boundary,
            json,
        } => {
            let cfg = if cli.config.exists() {
                config::load_config(&cli.config)?
            } else {
                Config::minimal()
            };
            let mut chunking = cfg.chunking;
            if let Some(size) = chunk_size {
                chunking.chunk_size = *size;
            }
            if let Some(overlap) = chunk_overlap {
                chunking.overlap = *overlap;
            }
            if let Some(boundary) = boundary {
                chunking.boundary = (*boundary).into();
            }
            return run_chunk(file, StreamingChunker::new(chunking)?, *json);
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Packages => {
            let rows = status::list_packages(&cfg)?;
            status::print_packages(&rows);
        }
        Commands::Status {
            package,
            full,
            json,
        } => {
            let report = status::package_status(&cfg, &package, full)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                status::print_status(&report);
            }
        }
        Commands::Update {
            package,
            full,
            dry_run,
            strict,
            chunk_size,
            chunk_overlap,
            progress,
            json,
        } => {
            let options = update::UpdateOptions {
                full,
                dry_run,
                strict,
                chunk_size,
                chunk_overlap,
            };
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let report = update::run_update(&cfg, &package, &options, reporter.as_ref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                update::print_report(&report);
            }
        }
        Commands::Manifest { package } => {
            println!("{}", status::manifest_json(&cfg, &package)?);
        }
        Commands::Completions { .. } | Commands::Chunk { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}

fn run_chunk(file: &Path, chunker: StreamingChunker, json: bool) -> anyhow::Result<()> {
    let name = file.display().to_string();
    let document = Document::from_file(name.clone(), file);
    let mut count = 0usize;
    for chunk in chunker.chunk(&document)? {
        let chunk = chunk.with_context(|| format!("Failed to chunk {}", name))?;
        if json {
            println!("{}", serde_json::to_string(&chunk)?);
        } else {
            let preview: String = chunk
                .text
                .chars()
                .take(60)
                .map(|c| if c.is_control() { ' ' } else { c })
                .collect();
            println!(
                "#{:<4} [{}..{}) overlap={}{}  {}",
                chunk.index,
                chunk.start_offset,
                chunk.end_offset,
                chunk.overlap_with_previous,
                if chunk.unsafe_cut { " unsafe-cut" } else { "" },
                preview
            );
        }
        count += 1;
    }
    if !json {
        println!("{} chunks", count);
    }
    Ok(())
}
