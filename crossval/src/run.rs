//! The `run` command: sample, fetch, compare and save.

use crossval_core::{
    CacheManager, DivergenceClass, HarnessConfig, Result, RunParams, ValidationOrchestrator,
    ValidationReport, YamlMetadataSource,
};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::RunArgs;
use crate::output::{self, OutputPaths};

/// A finished run and where it was saved.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: ValidationReport,
    pub paths: OutputPaths,
}

impl RunOutcome {
    /// Short console digest of the run.
    pub fn describe(&self) -> String {
        let summary = &self.report.summary;
        let mut out = String::new();
        let _ = writeln!(out, "Validation run {} completed", self.report.run_id);
        let _ = writeln!(
            out,
            "Indicators tested: {} (sample of {} from a valid pool of {})",
            summary.total_tested, self.report.sample.total, self.report.pool.valid
        );
        let _ = writeln!(out, "Comparable across platforms: {}", summary.comparable);
        let divergent: Vec<String> = [DivergenceClass::Minor, DivergenceClass::Major, DivergenceClass::Critical]
            .into_iter()
            .map(|class| format!("{} {}", summary.divergence_count(class), class))
            .collect();
        let _ = writeln!(out, "Row divergence: {}", divergent.join(", "));
        let _ = writeln!(out, "Failures: {}", self.report.failures.len());
        let _ = write!(out, "Output: {}", self.paths.report.display());
        out
    }
}

/// Applies `run` flags on top of the loaded configuration.
pub fn apply_overrides(args: &RunArgs, config: HarnessConfig) -> HarnessConfig {
    let mut config = config;
    if let Some(hours) = args.max_cache_age {
        config = config.with_max_cache_age(Duration::from_secs(hours.saturating_mul(3600)));
    }
    if args.parallel {
        config = config.with_parallel_platforms(true);
    }
    config
}

/// Runs a full validation and writes the report files.
///
/// # Errors
/// Returns an error for invalid run parameters, an unreadable metadata
/// snapshot, an invalid platform command or an output write failure.
pub async fn run_validation(args: &RunArgs, config: HarnessConfig) -> Result<RunOutcome> {
    let config = apply_overrides(args, config);

    info!("Starting validation run...");
    info!("Metadata: {}", args.metadata.display());
    info!("Cache: {}", config.cache_dir.display());
    info!("Output: {}", args.output.display());

    let cache = Arc::new(CacheManager::new(config.cache_dir.clone()));
    let orchestrator = ValidationOrchestrator::from_config(&config, cache)?;
    let source = YamlMetadataSource::new(&args.metadata);
    let params = RunParams::new(args.target_n, args.seed, args.platforms.clone())
        .with_max_cache_age(config.max_cache_age())
        .with_stratify_by(args.stratify.into());

    let report = orchestrator.run(&source, &params).await?;

    for failure in &report.failures {
        tracing::warn!(
            "{} on {}: {} ({})",
            failure.indicator_code,
            failure.platform,
            failure.status,
            failure.detail.as_deref().unwrap_or("no detail")
        );
    }

    let paths = output::save_report(&report, &args.output).await?;
    Ok(RunOutcome { report, paths })
}
