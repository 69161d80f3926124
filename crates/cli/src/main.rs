//! Darc CLI - darc command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

mod cmd;
mod config;
mod util;

/// Darc - deduplicating archive repository
#[derive(Parser)]
#[command(name = "darc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Repository path (default: search upward from the current directory)
    #[arg(short, long, global = true)]
    repo: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty repository
    Init {
        /// Directory to create the repository in
        path: PathBuf,
    },
    /// List archives, newest first
    List {
        /// Only archives whose name starts with this prefix
        #[arg(short = 'P', long)]
        prefix: Option<String>,
    },
    /// Delete archives not selected by the retention rules
    Prune(cmd::prune::PruneArgs),
    /// Reclaim space of chunks no archive references anymore
    Compact,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init { path } => cmd::init::run(&path),
        Commands::List { prefix } => cmd::list::run(cli.repo, prefix.as_deref()),
        Commands::Prune(args) => cmd::prune::run(cli.repo, args),
        Commands::Compact => cmd::compact::run(cli.repo),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
