//! Per-platform fetching with cache read-through and bounded retries.
//!
//! A [`PlatformRunner`] owns one platform's [`DataFetcher`] and shares the
//! [`CacheManager`] with the other runners. `fetch` never fails: every
//! outcome, including exhausted retries, comes back as a [`FetchResult`]
//! whose status the comparator and the report treat as data.

mod classify;
mod fetcher;

pub use classify::{FailureClassifier, FailureKind};
pub use fetcher::{CommandFetcher, DataFetcher, FetchOutcome};

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::Result;
use crate::cache::CacheManager;
use crate::config::{DEFAULT_MAX_CACHE_AGE_SECS, HarnessConfig, RunnerConfig};
use crate::models::{FetchResult, FetchStatus, Platform};

/// Fetches indicators for one platform.
#[derive(Debug, Clone)]
pub struct PlatformRunner {
    platform: Platform,
    fetcher: Arc<dyn DataFetcher>,
    cache: Arc<CacheManager>,
    max_cache_age: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl PlatformRunner {
    /// Creates a runner with the default retry policy and freshness window.
    pub fn new(platform: Platform, fetcher: Arc<dyn DataFetcher>, cache: Arc<CacheManager>) -> Self {
        let policy = RunnerConfig::default();
        Self {
            platform,
            fetcher,
            cache,
            max_cache_age: Duration::from_secs(DEFAULT_MAX_CACHE_AGE_SECS),
            max_attempts: policy.max_attempts,
            retry_backoff: policy.retry_backoff(),
        }
    }

    /// Creates a runner that shells out to the configured platform command.
    ///
    /// # Errors
    /// Returns `HarnessError::Configuration` when the command's signal
    /// patterns are invalid.
    pub fn from_config(platform: Platform, config: &HarnessConfig, cache: Arc<CacheManager>) -> Result<Self> {
        let fetcher = CommandFetcher::new(
            platform,
            config.platform_command(platform),
            config.runner.timeout(),
            config.scratch_dir(),
        )?;
        Ok(Self::new(platform, Arc::new(fetcher), cache)
            .with_policy(&config.runner)
            .with_max_cache_age(config.max_cache_age()))
    }

    /// Builder method to apply a retry policy.
    pub fn with_policy(mut self, policy: &RunnerConfig) -> Self {
        self.max_attempts = policy.max_attempts.max(1);
        self.retry_backoff = policy.retry_backoff();
        self
    }

    /// Builder method to set the default freshness window.
    pub fn with_max_cache_age(mut self, max_age: Duration) -> Self {
        self.max_cache_age = max_age;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Fetches one indicator using the runner's freshness window.
    pub async fn fetch(&self, indicator_code: &str) -> FetchResult {
        self.fetch_with_max_age(indicator_code, self.max_cache_age)
            .await
    }

    /// Fetches one indicator, accepting cache entries up to `max_age` old.
    pub async fn fetch_with_max_age(&self, indicator_code: &str, max_age: Duration) -> FetchResult {
        let started = Instant::now();

        if let Some(entry) = self
            .cache
            .fresh_entry(indicator_code, self.platform, max_age)
            .await
        {
            tracing::debug!("{}: {} served from cache", self.platform, indicator_code);
            return FetchResult::with_data(
                FetchStatus::Cached,
                indicator_code,
                self.platform,
                entry.row_count,
                entry.column_names,
            )
            .with_elapsed(started.elapsed());
        }

        let mut attempts = 0u32;
        let result = loop {
            attempts = attempts.saturating_add(1);
            let outcome = self.fetcher.fetch(indicator_code).await;

            match outcome {
                FetchOutcome::Network(detail) if attempts < self.max_attempts => {
                    tracing::warn!(
                        "{}: network failure fetching {} (attempt {}/{}): {}",
                        self.platform,
                        indicator_code,
                        attempts,
                        self.max_attempts,
                        detail
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                outcome => break self.settle(indicator_code, outcome).await,
            }
        };

        let result = result
            .with_attempts(attempts)
            .with_elapsed(started.elapsed());
        tracing::debug!(
            "{}: {} -> {} in {:.2}s",
            self.platform,
            indicator_code,
            result.status,
            result.elapsed_seconds
        );
        result
    }

    /// Turns a final outcome into a result, writing successes through to the cache.
    async fn settle(&self, indicator_code: &str, outcome: FetchOutcome) -> FetchResult {
        match outcome {
            FetchOutcome::Table(payload) => match parse_table(&payload) {
                Ok((row_count, column_names)) => {
                    if let Err(e) = self
                        .cache
                        .put(indicator_code, self.platform, row_count, column_names.clone(), &payload)
                        .await
                    {
                        tracing::warn!(
                            "{}: could not cache {}: {}",
                            self.platform,
                            indicator_code,
                            e
                        );
                    }
                    FetchResult::with_data(
                        FetchStatus::Success,
                        indicator_code,
                        self.platform,
                        row_count,
                        column_names,
                    )
                }
                Err(detail) => FetchResult::without_data(
                    FetchStatus::Failed,
                    indicator_code,
                    self.platform,
                    Some(detail),
                ),
            },
            FetchOutcome::NotFound(detail) => FetchResult::without_data(
                FetchStatus::NotFound,
                indicator_code,
                self.platform,
                non_empty(detail),
            ),
            FetchOutcome::Network(detail) => {
                tracing::warn!(
                    "{}: giving up on {} after {} attempts: {}",
                    self.platform,
                    indicator_code,
                    self.max_attempts,
                    detail
                );
                FetchResult::without_data(
                    FetchStatus::NetworkError,
                    indicator_code,
                    self.platform,
                    non_empty(detail),
                )
            }
            FetchOutcome::Failed(detail) => FetchResult::without_data(
                FetchStatus::Failed,
                indicator_code,
                self.platform,
                Some(if detail.is_empty() { "unknown failure".to_string() } else { detail }),
            ),
        }
    }
}

/// Reads the header and counts the rows of a CSV payload.
///
/// A payload without a header row is malformed; a header with zero rows is
/// a valid empty table.
pub fn parse_table(payload: &[u8]) -> std::result::Result<(u64, Vec<String>), String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(payload);

    let columns: Vec<String> = reader
        .byte_headers()
        .map_err(|e| format!("unreadable output header: {}", e))?
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let name = String::from_utf8_lossy(field);
            let name: &str = if i == 0 { name.trim_start_matches('\u{feff}') } else { &name };
            name.trim().to_string()
        })
        .collect();

    if columns.is_empty() || columns.iter().all(String::is_empty) {
        return Err("output has no header row".to_string());
    }

    let mut rows = 0u64;
    for record in reader.byte_records() {
        record.map_err(|e| format!("malformed output row: {}", e))?;
        rows = rows.saturating_add(1);
    }

    Ok((rows, columns))
}

fn non_empty(detail: String) -> Option<String> {
    if detail.is_empty() { None } else { Some(detail) }
}
