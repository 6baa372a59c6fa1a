//! cairn: publish versioned builds to IPFS.
//!
//! # Usage
//!
//! ```text
//! cairn stage <version> [--dir <path>]
//! cairn publish [--purge] [--collapse single|transitive]
//! cairn aggregate [--purge] [--collapse single|transitive]
//! cairn run <version> [--dir <path>] [--purge]
//! cairn rollback raw|production
//! cairn status [--resolve] [--json]
//! ```
//!
//! # Exit codes
//!
//! `0` something was published, `3` nothing changed, `1` failure.

mod commands;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use cairn_publish::CollapseMode;
use commands::{
    aggregate::AggregateArgs, publish::PublishArgs, rollback::RollbackArgs, run::RunArgs,
    stage::StageArgs, status::StatusArgs,
};

/// Exit status for a run that found nothing to publish.
pub const EXIT_UNCHANGED: u8 = 3;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "cairn",
    version,
    about = "Publish versioned builds into content-addressed raw and production trees",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Config file (default: ./cairn.yaml, then the user config dir).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Build descriptor to read and checkpoint, overriding the config.
    #[arg(long, global = true)]
    pub descriptor: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a build directory and write a fresh build descriptor.
    Stage(StageArgs),

    /// Publish the staged build to the raw tree, then re-aggregate production.
    Publish(PublishArgs),

    /// Re-aggregate and publish the production tree only.
    Aggregate(AggregateArgs),

    /// Stage and publish in one step.
    Run(RunArgs),

    /// Point a key back at the root it last replaced.
    Rollback(RollbackArgs),

    /// Show the checkpointed roots from the build descriptor.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Shared CollapseMode argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `CollapseMode` from CLI args.
#[derive(Debug, Clone, Copy)]
pub struct CollapseArg(pub CollapseMode);

impl FromStr for CollapseArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self(CollapseMode::Single)),
            "transitive" => Ok(Self(CollapseMode::Transitive)),
            other => Err(format!(
                "unknown collapse mode '{other}'; expected: single, transitive"
            )),
        }
    }
}

impl fmt::Display for CollapseArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            CollapseMode::Single => write!(f, "single"),
            CollapseMode::Transitive => write!(f, "transitive"),
        }
    }
}

impl From<CollapseArg> for CollapseMode {
    fn from(c: CollapseArg) -> Self {
        c.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(global: &GlobalArgs) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if global.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if global.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    let global = cli.global;
    match cli.command {
        Commands::Stage(args) => args.run(&global),
        Commands::Publish(args) => args.run(&global),
        Commands::Aggregate(args) => args.run(&global),
        Commands::Run(args) => args.run(&global),
        Commands::Rollback(args) => args.run(&global),
        Commands::Status(args) => args.run(&global),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.global);
    match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
