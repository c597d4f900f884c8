//! Validation report structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::comparison::{ComparisonVerdict, DivergenceClass};
use crate::models::{FetchResult, FetchStatus, Platform, SampleAllocation};
use crate::validator::RejectionReason;

/// Current report format version.
pub const REPORT_FORMAT_VERSION: &str = "1.0";

/// Inputs of the run, echoed so a report can be reproduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub seed: u64,
    pub target_n: usize,
    pub platforms: Vec<Platform>,
    pub max_cache_age_secs: u64,
    pub started_at: DateTime<Utc>,
    /// Where the indicator pool came from
    pub metadata_source: String,
}

/// Size of the candidate pool before and after validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub loaded: usize,
    pub valid: usize,
    pub rejected: BTreeMap<RejectionReason, usize>,
}

/// How the sample was drawn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleStats {
    pub allocations: Vec<SampleAllocation>,
    pub total: usize,
    /// The minimum-one-per-stratum rule pushed the sample above `target_n`
    pub oversampled: bool,
}

/// Aggregate counts over the whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Indicators in the sample
    pub total_tested: usize,
    /// Status counts per platform; every status appears, zeros included
    pub status_counts: BTreeMap<Platform, BTreeMap<FetchStatus, usize>>,
    /// Indicator count per divergence class; every class appears
    pub divergence_counts: BTreeMap<DivergenceClass, usize>,
    /// Indicators with at least two platforms returning data
    pub comparable: usize,
    /// Indicators where some platform lacked a core column
    pub core_column_gaps: usize,
}

impl RunSummary {
    /// Tallies results and verdicts for the given platforms.
    pub fn tally(
        platforms: &[Platform],
        results: &[FetchResult],
        verdicts: &[ComparisonVerdict],
    ) -> Self {
        let mut status_counts: BTreeMap<Platform, BTreeMap<FetchStatus, usize>> = platforms
            .iter()
            .map(|p| (*p, FetchStatus::ALL.iter().map(|s| (*s, 0)).collect()))
            .collect();
        for result in results {
            let count = status_counts
                .entry(result.platform)
                .or_default()
                .entry(result.status)
                .or_default();
            *count = count.saturating_add(1);
        }

        let mut divergence_counts: BTreeMap<DivergenceClass, usize> =
            DivergenceClass::ALL.iter().map(|c| (*c, 0)).collect();
        for verdict in verdicts {
            let count = divergence_counts
                .entry(verdict.row_divergence_class)
                .or_default();
            *count = count.saturating_add(1);
        }

        Self {
            total_tested: verdicts.len(),
            status_counts,
            divergence_counts,
            comparable: verdicts.iter().filter(|v| v.is_comparable()).count(),
            core_column_gaps: verdicts.iter().filter(|v| v.has_core_column_gap()).count(),
        }
    }

    /// Count of one status on one platform.
    pub fn status_count(&self, platform: Platform, status: FetchStatus) -> usize {
        self.status_counts
            .get(&platform)
            .and_then(|counts| counts.get(&status))
            .copied()
            .unwrap_or(0)
    }

    /// Count of one divergence class.
    pub fn divergence_count(&self, class: DivergenceClass) -> usize {
        self.divergence_counts.get(&class).copied().unwrap_or(0)
    }
}

/// One non-success outcome, named by indicator and platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub indicator_code: String,
    pub platform: Platform,
    pub status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FailureRecord {
    /// Lists every result without data, in result order.
    pub fn collect(results: &[FetchResult]) -> Vec<Self> {
        results
            .iter()
            .filter(|r| !r.status.has_data())
            .map(|r| Self {
                indicator_code: r.indicator_code.clone(),
                platform: r.platform,
                status: r.status,
                detail: r.error_detail.clone(),
            })
            .collect()
    }
}

/// Complete outcome of one validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub format_version: String,
    pub run_id: Uuid,
    pub parameters: RunParameters,
    pub finished_at: DateTime<Utc>,
    pub pool: PoolStats,
    pub sample: SampleStats,
    /// Every fetch result, sorted by indicator code then platform
    pub results: Vec<FetchResult>,
    /// One verdict per sampled indicator, sorted by indicator code
    pub verdicts: Vec<ComparisonVerdict>,
    pub summary: RunSummary,
    pub failures: Vec<FailureRecord>,
}

impl ValidationReport {
    /// Run duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.finished_at
            .signed_duration_since(self.parameters.started_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64()
    }

    /// Verdicts at or above a divergence class.
    pub fn verdicts_at_least(&self, class: DivergenceClass) -> impl Iterator<Item = &ComparisonVerdict> {
        self.verdicts
            .iter()
            .filter(move |v| v.row_divergence_class >= class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(code: &str, platform: Platform, status: FetchStatus) -> FetchResult {
        if status.has_data() {
            FetchResult::with_data(status, code, platform, 10, vec!["value".into()])
        } else {
            FetchResult::without_data(status, code, platform, Some("boom".into()))
        }
    }

    #[test]
    fn test_tally_includes_zero_counts() {
        let results = vec![
            result("CME_A", Platform::Stata, FetchStatus::Success),
            result("CME_A", Platform::R, FetchStatus::NotFound),
            result("CME_B", Platform::Stata, FetchStatus::Cached),
            result("CME_B", Platform::R, FetchStatus::Cached),
        ];
        let summary = RunSummary::tally(&[Platform::Stata, Platform::R], &results, &[]);

        assert_eq!(summary.status_count(Platform::Stata, FetchStatus::Success), 1);
        assert_eq!(summary.status_count(Platform::Stata, FetchStatus::Cached), 1);
        assert_eq!(summary.status_count(Platform::R, FetchStatus::NotFound), 1);
        assert_eq!(summary.status_count(Platform::R, FetchStatus::Failed), 0);
        assert_eq!(summary.status_counts[&Platform::R].len(), FetchStatus::ALL.len());
        assert_eq!(summary.divergence_counts.len(), DivergenceClass::ALL.len());
        assert_eq!(summary.status_count(Platform::Python, FetchStatus::Success), 0);
    }

    #[test]
    fn test_failures_name_every_non_success() {
        let results = vec![
            result("CME_A", Platform::Stata, FetchStatus::Success),
            result("CME_A", Platform::R, FetchStatus::NetworkError),
            result("CME_B", Platform::Python, FetchStatus::Failed),
            result("CME_B", Platform::R, FetchStatus::Cached),
        ];
        let failures = FailureRecord::collect(&results);

        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].indicator_code, "CME_A");
        assert_eq!(failures[0].platform, Platform::R);
        assert_eq!(failures[0].status, FetchStatus::NetworkError);
        assert_eq!(failures[1].detail.as_deref(), Some("boom"));
    }
}
