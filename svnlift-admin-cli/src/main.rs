//! svnlift administration CLI
//!
//! Replays a Subversion dump file and inspects the reconstructed history.

mod replay;
mod report;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use svnlift_core::{BranchConfig, Verification};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "svnlift-admin")]
#[command(author = "svnlift Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Reconstruct and inspect history recorded in SVN dump files")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Branch layout configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summary of a dump: revisions, blobs, branches
    Info { dump: PathBuf },

    /// Revision log, read without replaying
    Log { dump: PathBuf },

    /// Live and deleted branches and tags
    Branches {
        dump: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// List a directory as of a revision
    Ls {
        dump: PathBuf,
        revision: u64,
        #[arg(default_value = "")]
        path: String,
    },

    /// Print a file as of a revision
    Cat {
        dump: PathBuf,
        revision: u64,
        path: String,
        /// Check the content against its SHA1 while streaming
        #[arg(long)]
        verify: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();

    let config = match &cli.config {
        Some(path) => BranchConfig::from_file(path)?,
        None => BranchConfig::default(),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Info { dump } => {
            let repo = replay::replay_dump(dump, config).await?;
            report::print_info(&repo, &mut out)?;
        }

        Commands::Log { dump } => {
            report::print_log(&dump, &mut out)?;
        }

        Commands::Branches { dump, json } => {
            let repo = replay::replay_dump(dump, config).await?;
            report::print_branches(&repo, json, &mut out)?;
        }

        Commands::Ls { dump, revision, path } => {
            let repo = replay::replay_dump(dump, config).await?;
            report::print_listing(&repo, revision, &path, &mut out)?;
        }

        Commands::Cat { dump, revision, path, verify } => {
            let mut repo = replay::replay_dump(dump, config).await?;
            let verification = if verify {
                Verification::Verify
            } else {
                Verification::Trust
            };
            report::cat(&mut repo, revision, &path, verification, &mut out)?;
        }
    }

    out.flush()?;
    Ok(())
}
