//! rngtrace CLI - Generator-State Consistency Scenarios
//!
//! This is the operational entry point for the rngtrace libraries.
//!
//! # Commands
//!
//! - `rngtrace scenarios` - List the scenario catalogue
//! - `rngtrace run <name>` / `rngtrace run --all` - Run scenarios eagerly and compiled
//! - `rngtrace inspect --seed <s> --draws <n>` - Show generator seed and offset around draws
//! - `rngtrace validate --log <file>` - Validate a JSON effect log
//! - `rngtrace sweep --scenario <name> --seeds <n>` - Run one scenario over many seeds in parallel
//!
//! # Architecture
//!
//! As part of the **S**ervice layer, this crate wires configuration and
//! logging around the engine in `rngtrace_compile`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rngtrace_compile::config::ArtifactReuse;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod error;

pub use error::{CliError, Result};

use commands::OutputFormat;
use config::{build_config, CliArgs};

/// rngtrace generator-state consistency CLI
#[derive(Parser)]
#[command(name = "rngtrace")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path (defaults to ./rngtrace.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seed override
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Checkpointed iterations override
    #[arg(long, global = true)]
    iterations: Option<usize>,

    /// Artifact reuse model (single-use, reusable)
    #[arg(long, global = true)]
    reuse: Option<ArtifactReuse>,

    /// Log every captured graph
    #[arg(long, global = true)]
    print_graph: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the scenario catalogue
    Scenarios,

    /// Run scenarios eagerly and compiled and compare
    Run {
        /// Scenario name
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        name: Option<String>,

        /// Run every scenario
        #[arg(long)]
        all: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Print generator seed and offset before and after a number of draws
    Inspect {
        /// Number of uniform draws
        #[arg(short, long, default_value = "4")]
        draws: usize,

        /// Draw standard normals instead of uniforms
        #[arg(long)]
        normal: bool,
    },

    /// Validate an effect log (JSON, one pass or an array of passes)
    Validate {
        /// Path to the effect log
        #[arg(short, long)]
        log: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Run one scenario from many seeds in parallel
    Sweep {
        /// Scenario name
        #[arg(short = 'n', long)]
        scenario: String,

        /// Number of consecutive seeds, starting at the configured seed
        #[arg(short = 'k', long, default_value = "32")]
        seeds: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config_file: cli.config.clone(),
        seed: cli.seed,
        iterations: cli.iterations,
        reuse: cli.reuse,
        print_graph: cli.print_graph,
        verbose: cli.verbose,
    };
    let config = build_config(&args)?;

    // Initialise tracing; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    if cli.verbose {
        info!("Verbose mode enabled");
    }
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Scenarios => commands::scenarios::run(),
        Commands::Run { name, all, format } => {
            commands::run::run(name.as_deref(), all, &config, format)
        }
        Commands::Inspect { draws, normal } => commands::inspect::run(config.seed, draws, normal),
        Commands::Validate { log, format } => commands::validate::run(&log, &config, format),
        Commands::Sweep { scenario, seeds } => commands::sweep::run(&scenario, seeds, &config),
    }
}
