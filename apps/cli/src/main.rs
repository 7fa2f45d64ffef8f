//! Leakscan CLI — secrets-leak monitoring for public code hosting.
//!
//! Scans GitHub code search and gists for configured keywords, extracts
//! reviewable fragments, and exposes the triage workflow.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
