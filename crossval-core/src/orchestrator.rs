//! End-to-end validation run.
//!
//! load → validate → sample → fetch every platform → compare → report.
//!
//! Only input-contract violations abort a run, and they are detected before
//! any fetch starts. Per-indicator failures of any kind become data in the
//! report.

use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::Result;
use crate::cache::CacheManager;
use crate::comparison::CrossPlatformComparator;
use crate::config::{DEFAULT_MAX_CACHE_AGE_SECS, HarnessConfig};
use crate::error::HarnessError;
use crate::metadata::MetadataSource;
use crate::models::{FetchResult, IndicatorRecord, Platform};
use crate::report::{
    FailureRecord, PoolStats, REPORT_FORMAT_VERSION, RunParameters, RunSummary, SampleStats,
    ValidationReport,
};
use crate::runner::PlatformRunner;
use crate::sampling::{SampleOutcome, StratifyBy, sample_with_plan};
use crate::validator::{ValidatorConfig, filter_valid};

/// Per-run inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunParams {
    pub target_n: usize,
    pub seed: u64,
    /// Platforms to fetch, in report order
    pub platforms: Vec<Platform>,
    pub max_cache_age: Duration,
    pub stratify_by: StratifyBy,
}

impl RunParams {
    /// Creates parameters with the default cache age and prefix strata.
    pub fn new(target_n: usize, seed: u64, platforms: Vec<Platform>) -> Self {
        Self {
            target_n,
            seed,
            platforms,
            max_cache_age: Duration::from_secs(DEFAULT_MAX_CACHE_AGE_SECS),
            stratify_by: StratifyBy::default(),
        }
    }

    /// Builder method to set the cache freshness window.
    pub fn with_max_cache_age(mut self, max_age: Duration) -> Self {
        self.max_cache_age = max_age;
        self
    }

    /// Builder method to set the stratification key.
    pub fn with_stratify_by(mut self, stratify_by: StratifyBy) -> Self {
        self.stratify_by = stratify_by;
        self
    }
}

/// Pool statistics and the sample drawn from it.
#[derive(Debug, Clone)]
pub struct DrawnSample {
    pub pool: PoolStats,
    pub outcome: SampleOutcome,
}

/// Coordinates a validation run across platform runners.
#[derive(Debug)]
pub struct ValidationOrchestrator {
    runners: BTreeMap<Platform, PlatformRunner>,
    validator: ValidatorConfig,
    comparator: CrossPlatformComparator,
    parallel_platforms: bool,
}

impl Default for ValidationOrchestrator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default(), CrossPlatformComparator::default())
    }
}

impl ValidationOrchestrator {
    /// Creates an orchestrator without runners.
    pub fn new(validator: ValidatorConfig, comparator: CrossPlatformComparator) -> Self {
        Self {
            runners: BTreeMap::new(),
            validator,
            comparator,
            parallel_platforms: false,
        }
    }

    /// Creates an orchestrator with a command runner for every platform.
    ///
    /// # Errors
    /// Returns `HarnessError::Configuration` for an invalid platform command.
    pub fn from_config(config: &HarnessConfig, cache: Arc<CacheManager>) -> Result<Self> {
        let mut orchestrator = Self::new(
            config.validator.clone(),
            CrossPlatformComparator::new(config.core_columns.iter().cloned()),
        )
        .with_parallel_platforms(config.parallel_platforms);

        for platform in Platform::ALL {
            orchestrator = orchestrator.with_runner(PlatformRunner::from_config(platform, config, cache.clone())?);
        }
        Ok(orchestrator)
    }

    /// Builder method to register (or replace) a platform's runner.
    pub fn with_runner(mut self, runner: PlatformRunner) -> Self {
        self.runners.insert(runner.platform(), runner);
        self
    }

    /// Builder method to fetch one indicator's platforms concurrently.
    ///
    /// Indicators are still processed one at a time, so each platform
    /// never runs two fetches at once.
    pub fn with_parallel_platforms(mut self, parallel: bool) -> Self {
        self.parallel_platforms = parallel;
        self
    }

    /// Runs the full pipeline and returns the report.
    ///
    /// # Errors
    /// - `InvalidInput` for a zero `target_n`, an empty or duplicated
    ///   platform list, or a platform without a runner
    /// - `Metadata` when the source cannot be loaded
    pub async fn run(&self, source: &dyn MetadataSource, params: &RunParams) -> Result<ValidationReport> {
        self.check_params(params)?;

        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4();
        tracing::info!(
            "Starting validation run {} (target {}, seed {}, platforms {:?})",
            run_id,
            params.target_n,
            params.seed,
            params.platforms
        );

        let DrawnSample { pool, outcome } = self.draw_sample(source, params).await?;
        let sample_stats = SampleStats {
            allocations: outcome.allocations.clone(),
            total: outcome.records.len(),
            oversampled: outcome.exceeds(params.target_n),
        };

        let mut results = Vec::with_capacity(outcome.records.len().saturating_mul(params.platforms.len()));
        let mut verdicts = Vec::with_capacity(outcome.records.len());
        let total = outcome.records.len();

        for (index, record) in outcome.records.iter().enumerate() {
            tracing::info!("[{}/{}] {}", index.saturating_add(1), total, record.code);
            let by_platform = self
                .fetch_indicator(&record.code, &params.platforms, params.max_cache_age)
                .await;

            verdicts.push(self.comparator.compare(&record.code, &by_platform));
            results.extend(by_platform.into_values());
        }

        results.sort_by(|a, b| {
            a.indicator_code
                .cmp(&b.indicator_code)
                .then(a.platform.cmp(&b.platform))
        });
        verdicts.sort_by(|a, b| a.indicator_code.cmp(&b.indicator_code));

        let summary = RunSummary::tally(&params.platforms, &results, &verdicts);
        let failures = FailureRecord::collect(&results);
        tracing::info!(
            "Validation run {} finished: {} indicators, {} failures",
            run_id,
            summary.total_tested,
            failures.len()
        );

        Ok(ValidationReport {
            format_version: REPORT_FORMAT_VERSION.to_string(),
            run_id,
            parameters: RunParameters {
                seed: params.seed,
                target_n: params.target_n,
                platforms: params.platforms.clone(),
                max_cache_age_secs: params.max_cache_age.as_secs(),
                started_at,
                metadata_source: source.describe(),
            },
            finished_at: Utc::now(),
            pool,
            sample: sample_stats,
            results,
            verdicts,
            summary,
            failures,
        })
    }

    /// Loads, validates, dedupes and samples the pool without fetching.
    ///
    /// `run` uses the same path, so for a given source and seed this is
    /// exactly the sample a run would fetch.
    ///
    /// # Errors
    /// - `InvalidInput` for a zero `target_n`
    /// - `Metadata` when the source cannot be loaded
    pub async fn draw_sample(&self, source: &dyn MetadataSource, params: &RunParams) -> Result<DrawnSample> {
        let records = source.load().await?;
        let loaded = records.len();
        let filtered = filter_valid(records, &self.validator);
        tracing::info!(
            "{} of {} indicators passed validation ({} rejected)",
            filtered.valid.len(),
            loaded,
            filtered.rejected_total()
        );

        let valid = dedupe(filtered.valid);
        let outcome = sample_with_plan(&valid, params.target_n, params.seed, |r| {
            params.stratify_by.key(r)
        })?;

        Ok(DrawnSample {
            pool: PoolStats {
                loaded,
                valid: valid.len(),
                rejected: filtered.rejected,
            },
            outcome,
        })
    }

    fn check_params(&self, params: &RunParams) -> Result<()> {
        if params.target_n == 0 {
            return Err(HarnessError::invalid_input("target_n must be at least 1"));
        }
        if params.platforms.is_empty() {
            return Err(HarnessError::invalid_input("at least one platform is required"));
        }

        let mut seen = BTreeSet::new();
        for platform in &params.platforms {
            if !seen.insert(*platform) {
                return Err(HarnessError::invalid_input(format!(
                    "platform {} is listed more than once",
                    platform
                )));
            }
            if !self.runners.contains_key(platform) {
                return Err(HarnessError::invalid_input(format!(
                    "no runner configured for platform {}",
                    platform
                )));
            }
        }
        Ok(())
    }

    async fn fetch_indicator(
        &self,
        indicator_code: &str,
        platforms: &[Platform],
        max_age: Duration,
    ) -> BTreeMap<Platform, FetchResult> {
        let runners = platforms.iter().filter_map(|p| self.runners.get(p));

        if self.parallel_platforms {
            join_all(runners.map(|runner| runner.fetch_with_max_age(indicator_code, max_age)))
                .await
                .into_iter()
                .map(|result| (result.platform, result))
                .collect()
        } else {
            let mut by_platform = BTreeMap::new();
            for runner in runners {
                let result = runner.fetch_with_max_age(indicator_code, max_age).await;
                by_platform.insert(result.platform, result);
            }
            by_platform
        }
    }
}

/// Drops repeated codes, keeping the first record.
fn dedupe(records: Vec<IndicatorRecord>) -> Vec<IndicatorRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| {
            let first = seen.insert(record.code.clone());
            if !first {
                tracing::warn!("Ignoring duplicate indicator code {}", record.code);
            }
            first
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::StaticMetadataSource;
    use crate::runner::{DataFetcher, FetchOutcome};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct NeverCalled;

    #[async_trait]
    impl DataFetcher for NeverCalled {
        async fn fetch(&self, indicator_code: &str) -> FetchOutcome {
            panic!("fetch called for {indicator_code}");
        }
    }

    fn orchestrator(platforms: &[Platform]) -> (tempfile::TempDir, ValidationOrchestrator) {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = Arc::new(CacheManager::new(dir.path()));
        let orchestrator = platforms.iter().fold(ValidationOrchestrator::default(), |o, p| {
            o.with_runner(PlatformRunner::new(*p, Arc::new(NeverCalled), cache.clone()))
        });
        (dir, orchestrator)
    }

    #[tokio::test]
    async fn test_input_contract_violations_fail_before_fetching() {
        let (_dir, orchestrator) = orchestrator(&[Platform::Stata, Platform::R]);
        let source = StaticMetadataSource::from_codes(["CME_A", "NT_B"]);

        let cases = [
            RunParams::new(0, 1, vec![Platform::Stata]),
            RunParams::new(3, 1, vec![]),
            RunParams::new(3, 1, vec![Platform::R, Platform::R]),
            RunParams::new(3, 1, vec![Platform::Python]),
        ];
        for params in cases {
            let err = orchestrator.run(&source, &params).await.unwrap_err();
            assert!(matches!(err, HarnessError::InvalidInput { .. }), "{params:?}: {err}");
        }
    }

    #[tokio::test]
    async fn test_empty_valid_pool_yields_empty_report() {
        let (_dir, orchestrator) = orchestrator(&[Platform::Stata]);
        let source = StaticMetadataSource::from_codes(["EDUCATION", "GENDER", "NOPREFIX"]);

        let report = orchestrator
            .run(&source, &RunParams::new(5, 1, vec![Platform::Stata]))
            .await
            .unwrap();

        assert_eq!(report.pool.loaded, 3);
        assert_eq!(report.pool.valid, 0);
        assert!(report.verdicts.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(report.summary.total_tested, 0);
    }

    #[test]
    fn test_dedupe_keeps_first() {
        let records = vec![
            IndicatorRecord::new("CME_A"),
            IndicatorRecord::new("CME_A").with_metadata("dataflows", serde_yaml::Value::String("X".into())),
            IndicatorRecord::new("NT_B"),
        ];
        let unique = dedupe(records);
        assert_eq!(unique.len(), 2);
        assert!(unique[0].metadata.is_empty());
    }
}
