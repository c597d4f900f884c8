//! Commands that inspect inputs, the cache or saved reports without
//! fetching anything.

use crossval_core::report::{read_report, render_summary};
use crossval_core::{
    CacheManager, CrossPlatformComparator, DrawnSample, HarnessConfig, Platform, Result,
    RunParams, ValidationOrchestrator, YamlMetadataSource, classify,
};
use std::fmt::Write as _;

use crate::output::save_text;
use crate::{CacheCommand, ClassifyArgs, SampleArgs, SummarizeArgs};

/// Draws the sample a `run` with the same arguments would fetch.
///
/// # Errors
/// Returns `InvalidInput` for a zero target and `Metadata` when the
/// snapshot cannot be loaded.
pub async fn sample_command(args: &SampleArgs, config: &HarnessConfig) -> Result<String> {
    let orchestrator = ValidationOrchestrator::new(config.validator.clone(), CrossPlatformComparator::default());
    let params = RunParams::new(args.target_n, args.seed, Platform::ALL.to_vec())
        .with_stratify_by(args.stratify.into());
    let drawn = orchestrator
        .draw_sample(&YamlMetadataSource::new(&args.metadata), &params)
        .await?;

    if args.json {
        let codes: Vec<&str> = drawn.outcome.records.iter().map(|r| r.code.as_str()).collect();
        let value = serde_json::json!({
            "seed": args.seed,
            "target_n": args.target_n,
            "pool": drawn.pool,
            "allocations": drawn.outcome.allocations,
            "codes": codes,
        });
        return serde_json::to_string_pretty(&value)
            .map_err(|e| crossval_core::HarnessError::serialization("Sample serialization", e));
    }

    Ok(render_sample(&drawn, args.target_n))
}

fn render_sample(drawn: &DrawnSample, target_n: usize) -> String {
    let mut out = String::new();
    let rejected: usize = drawn.pool.rejected.values().sum();
    let _ = writeln!(
        out,
        "Pool: {} loaded, {} valid, {} rejected",
        drawn.pool.loaded, drawn.pool.valid, rejected
    );

    let width = drawn
        .outcome
        .allocations
        .iter()
        .map(|a| a.stratum_prefix.len())
        .max()
        .unwrap_or(0);
    let _ = writeln!(out, "Strata: {}", drawn.outcome.allocations.len());
    for allocation in &drawn.outcome.allocations {
        let _ = writeln!(
            out,
            "  {:<width$}  {} of {}",
            allocation.stratum_prefix, allocation.requested_count, allocation.available_count
        );
    }

    let total = drawn.outcome.records.len();
    if drawn.outcome.exceeds(target_n) {
        let _ = writeln!(out, "Sample: {} indicators (target {}, every stratum kept)", total, target_n);
    } else {
        let _ = writeln!(out, "Sample: {} indicators (target {})", total, target_n);
    }
    for record in &drawn.outcome.records {
        let _ = writeln!(out, "  {}", record.code);
    }
    out
}

/// Classifies each code against the configured validator.
pub fn classify_command(args: &ClassifyArgs, config: &HarnessConfig) -> String {
    let mut validator = config.validator.clone();
    if args.allow_unknown_prefixes {
        validator = validator.with_allow_unknown_prefixes(true);
    }

    let width = args.codes.iter().map(String::len).max().unwrap_or(0);
    let mut out = String::new();
    for code in &args.codes {
        let verdict = classify(code, &validator);
        if verdict.is_valid {
            let _ = writeln!(out, "{:<width$}  valid", code);
        } else {
            let _ = writeln!(out, "{:<width$}  rejected: {}", code, verdict.reason);
        }
    }
    out
}

/// Runs a `cache` subcommand.
///
/// # Errors
/// Returns `InvalidInput` for an unsafe indicator code and `Io` when the
/// cache directory cannot be read or cleared.
pub async fn cache_command(command: &CacheCommand, config: &HarnessConfig) -> Result<String> {
    let cache = CacheManager::new(config.cache_dir.clone());

    match command {
        CacheCommand::Stats => {
            let stats = cache.stats().await?;
            let mut out = String::new();
            let _ = writeln!(out, "Cache: {}", cache.root().display());
            let _ = writeln!(out, "Entries: {}", stats.total_entries);
            let _ = writeln!(out, "Size: {} bytes", stats.size_bytes);
            for platform in Platform::ALL {
                let count = stats.per_platform_counts.get(&platform).copied().unwrap_or(0);
                let _ = writeln!(out, "  {}: {}", platform, count);
            }
            Ok(out)
        }
        CacheCommand::Clear {
            indicator,
            platform,
        } => {
            let removed = cache.clear(indicator.as_deref(), *platform).await?;
            Ok(format!("Removed {} cache entries from {}", removed, cache.root().display()))
        }
    }
}

/// Renders the Markdown summary of a saved report.
///
/// # Errors
/// Returns an error when the report cannot be read, fails schema
/// validation, or the summary cannot be written.
pub async fn summarize_command(args: &SummarizeArgs) -> Result<String> {
    let report = read_report(&args.report).await?;
    let summary = render_summary(&report);

    match &args.output {
        Some(path) => {
            save_text(&summary, path).await?;
            Ok(format!("Summary written to {}", path.display()))
        }
        None => Ok(summary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_command_lists_every_code() {
        let args = ClassifyArgs {
            codes: vec!["CME_MRY0T4".into(), "EDUCATION".into(), "ZZZ_X".into()],
            allow_unknown_prefixes: false,
        };
        let out = classify_command(&args, &HarnessConfig::default());
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("CME_MRY0T4"));
        assert!(lines[0].ends_with("valid"));
        assert!(lines[1].contains("rejected"));
        assert!(lines[2].contains("rejected"));
    }

    #[test]
    fn test_classify_command_unknown_prefixes() {
        let args = ClassifyArgs {
            codes: vec!["ZZZ_X".into()],
            allow_unknown_prefixes: true,
        };
        let out = classify_command(&args, &HarnessConfig::default());
        assert!(out.trim_end().ends_with("valid"));
        assert!(!out.contains("rejected"));
    }
}
