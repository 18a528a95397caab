//! roster - operator CLI for roster reconciliation
//!
//! Pulls completed surveys from the LMS, assigns an owner to each new one and
//! records it in the spreadsheet ledger.

use anyhow::Result;
use clap::Parser;

mod canvas;
mod client;
mod commands;
mod config;
mod error;
mod output;
mod sheets;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(error::exit_code(&e));
    }

    Ok(())
}
