//! Cross-platform consistency harness.
//!
//! Samples indicator codes from a metadata snapshot, fetches each one through
//! the Stata, R and Python clients and reports where they disagree.
//!
//! # Guarantees
//! - Every sampled indicator appears in the report, failures included
//! - A seed selects the same sample on every machine
//! - The JSON report is schema-validated before it is written

use anyhow::{Context, Result};
use clap::Parser;
use crossval::{Cli, execute};
use crossval_core::logging::init_logging;
use crossval_core::report::initialize_report_validator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet, cli.global.log_json)?;

    // Compile the embedded report schema up front
    initialize_report_validator().context("Failed to initialize report validator")?;

    let output = execute(&cli).await?;
    if !output.is_empty() {
        println!("{}", output.trim_end());
    }
    Ok(())
}
