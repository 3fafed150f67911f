//! redline CLI: review PDF document sets with struck-through text excluded.
//!
//! Builds a corpus from the PDFs in a directory, marking voided
//! (struck-through) paragraphs, then runs the analysis stages over it.

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
