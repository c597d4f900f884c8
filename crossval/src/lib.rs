//! Command-line front end for the crossval harness.
//!
//! Argument types live here so integration tests can parse and execute
//! commands without spawning the binary. Each command returns the text it
//! prints on stdout; logs go to stderr through `tracing`.

pub mod inspect;
pub mod output;
pub mod run;

use clap::{Args, Parser, Subcommand, ValueEnum};
use crossval_core::{HarnessConfig, Platform, Result, StratifyBy};
use std::path::PathBuf;

/// CLI argument structure
#[derive(Parser, Debug)]
#[command(name = "crossval")]
#[command(about = "Cross-platform consistency harness for SDMX indicator clients")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "
crossval draws a reproducible stratified sample of indicator codes, fetches
each one through the Stata, R and Python clients, and reports where the
platforms disagree on row counts or column sets.

Fetched tables are cached per indicator and platform, so an interrupted run
resumes where it stopped.

EXAMPLES:
  crossval run --metadata indicators.yaml --target-n 30 --seed 42
  crossval run --metadata indicators.yaml --platforms r,python --parallel
  crossval sample --metadata indicators.yaml --stratify dataflow
  crossval classify CME_MRY0T4 EDUCATION
  crossval cache clear --platform stata
  crossval summarize --report crossval-output/report.json
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sample, fetch, compare and write a report
    Run(RunArgs),
    /// Print the stratified sample without fetching anything
    Sample(SampleArgs),
    /// Classify indicator codes as valid or placeholder
    Classify(ClassifyArgs),
    /// Inspect or clear the fetch cache
    Cache(CacheArgs),
    /// Re-render the Markdown summary of a saved report
    Summarize(SummarizeArgs),
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all logs except errors")]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, help = "Write logs as one JSON object per line")]
    pub log_json: bool,

    /// Configuration file
    #[arg(
        long,
        global = true,
        env = "CROSSVAL_CONFIG",
        value_name = "FILE",
        help = "TOML configuration file (built-in defaults when omitted)"
    )]
    pub config: Option<PathBuf>,

    /// Cache directory override
    #[arg(
        long,
        global = true,
        env = "CROSSVAL_CACHE_DIR",
        value_name = "DIR",
        help = "Cache directory (overrides the configuration file)"
    )]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Metadata snapshot listing candidate indicators
    #[arg(short, long, value_name = "FILE")]
    pub metadata: PathBuf,

    /// Target sample size
    #[arg(short = 'n', long, default_value = "30")]
    pub target_n: usize,

    /// Sampling seed
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Platforms to fetch, in report order
    #[arg(long, value_delimiter = ',', default_value = "stata,r,python")]
    pub platforms: Vec<Platform>,

    /// Output directory for the report files
    #[arg(short, long, value_name = "DIR", default_value = "crossval-output")]
    pub output: PathBuf,

    /// Cache freshness window in hours
    #[arg(long, value_name = "HOURS", help = "Reuse cached tables younger than this (default 168)")]
    pub max_cache_age: Option<u64>,

    /// Fetch each indicator's platforms concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Stratification key
    #[arg(long, value_enum, default_value_t = StratifyArg::Prefix)]
    pub stratify: StratifyArg,
}

#[derive(Args, Debug)]
pub struct SampleArgs {
    /// Metadata snapshot listing candidate indicators
    #[arg(short, long, value_name = "FILE")]
    pub metadata: PathBuf,

    /// Target sample size
    #[arg(short = 'n', long, default_value = "30")]
    pub target_n: usize,

    /// Sampling seed
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Stratification key
    #[arg(long, value_enum, default_value_t = StratifyArg::Prefix)]
    pub stratify: StratifyArg,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Indicator codes to classify
    #[arg(required = true, value_name = "CODE")]
    pub codes: Vec<String>,

    /// Accept any prefix of plausible length
    #[arg(long)]
    pub allow_unknown_prefixes: bool,
}

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Show entry counts and disk usage
    Stats,
    /// Remove cached tables
    Clear {
        /// Only this indicator
        #[arg(long, value_name = "CODE")]
        indicator: Option<String>,

        /// Only this platform
        #[arg(long)]
        platform: Option<Platform>,
    },
}

#[derive(Args, Debug)]
pub struct SummarizeArgs {
    /// Saved report.json
    #[arg(short, long, value_name = "FILE")]
    pub report: PathBuf,

    /// Write the summary here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// CLI spelling of [`StratifyBy`].
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StratifyArg {
    /// Substring before the first underscore
    Prefix,
    /// First dataflow listed in the metadata
    Dataflow,
}

impl From<StratifyArg> for StratifyBy {
    fn from(arg: StratifyArg) -> Self {
        match arg {
            StratifyArg::Prefix => StratifyBy::Prefix,
            StratifyArg::Dataflow => StratifyBy::Dataflow,
        }
    }
}

/// Loads the configuration file (or defaults) and applies global overrides.
///
/// # Errors
/// Returns `HarnessError::Io` when the file cannot be read and
/// `HarnessError::Configuration` when it does not parse or validate.
pub fn load_config(global: &GlobalArgs) -> Result<HarnessConfig> {
    let mut config = match &global.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(dir) = &global.cache_dir {
        config = config.with_cache_dir(dir);
    }
    Ok(config)
}

/// Executes a parsed command and returns the text to print.
///
/// # Errors
/// Propagates configuration, input-contract and I/O errors. Fetch failures
/// never surface here; they are part of the report.
pub async fn execute(cli: &Cli) -> Result<String> {
    let config = load_config(&cli.global)?;

    match &cli.command {
        Command::Run(args) => run::run_validation(args, config).await.map(|o| o.describe()),
        Command::Sample(args) => inspect::sample_command(args, &config).await,
        Command::Classify(args) => Ok(inspect::classify_command(args, &config)),
        Command::Cache(args) => inspect::cache_command(&args.command, &config).await,
        Command::Summarize(args) => inspect::summarize_command(args).await,
    }
}
