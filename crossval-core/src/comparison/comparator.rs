//! Row-count and schema comparison across platforms.

use std::collections::{BTreeMap, BTreeSet};

use super::models::{ComparisonVerdict, DivergenceClass};
use crate::config::DEFAULT_CORE_COLUMNS;
use crate::models::{FetchResult, Platform};

/// Buckets a max/min row-count pair.
///
/// Boundaries are evaluated in integer arithmetic:
/// `10 * max < 11 * min` is minor, `max < 2 * min` is major.
pub fn classify_divergence(max_rows: u64, min_rows: u64) -> DivergenceClass {
    let (max_rows, min_rows) = if max_rows >= min_rows {
        (u128::from(max_rows), u128::from(min_rows))
    } else {
        (u128::from(min_rows), u128::from(max_rows))
    };

    if max_rows == min_rows {
        DivergenceClass::Match
    } else if min_rows == 0 {
        DivergenceClass::Critical
    } else if max_rows.saturating_mul(10) < min_rows.saturating_mul(11) {
        DivergenceClass::Minor
    } else if max_rows < min_rows.saturating_mul(2) {
        DivergenceClass::Major
    } else {
        DivergenceClass::Critical
    }
}

/// Compares the per-platform results of one indicator.
#[derive(Debug, Clone)]
pub struct CrossPlatformComparator {
    core_columns: BTreeSet<String>,
}

impl Default for CrossPlatformComparator {
    fn default() -> Self {
        Self::new(DEFAULT_CORE_COLUMNS.iter().copied())
    }
}

impl CrossPlatformComparator {
    /// Creates a comparator checking the given core columns.
    pub fn new<I, S>(core_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            core_columns: core_columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn core_columns(&self) -> &BTreeSet<String> {
        &self.core_columns
    }

    /// Builds the verdict for one indicator.
    ///
    /// Platforms whose status carries no data are listed as missing and
    /// excluded from every other field.
    pub fn compare(
        &self,
        indicator_code: &str,
        results_by_platform: &BTreeMap<Platform, FetchResult>,
    ) -> ComparisonVerdict {
        let mut row_count_by_platform = BTreeMap::new();
        let mut column_set_by_platform: BTreeMap<Platform, BTreeSet<String>> = BTreeMap::new();
        let mut missing_platforms = BTreeSet::new();

        for (platform, result) in results_by_platform {
            if result.status.has_data() {
                row_count_by_platform.insert(*platform, result.row_count);
                column_set_by_platform.insert(*platform, result.column_names.iter().cloned().collect());
            } else {
                missing_platforms.insert(*platform);
            }
        }

        let core_columns_present = column_set_by_platform
            .iter()
            .map(|(platform, columns)| (*platform, self.core_columns.is_subset(columns)))
            .collect();

        let mut verdict = ComparisonVerdict {
            indicator_code: indicator_code.to_string(),
            row_count_by_platform,
            column_set_by_platform,
            row_divergence_class: DivergenceClass::Match,
            row_ratio: None,
            missing_platforms,
            core_columns_present,
            common_columns: BTreeSet::new(),
            platform_only_columns: BTreeMap::new(),
        };

        if !verdict.is_comparable() {
            return verdict;
        }

        let counts = verdict.row_count_by_platform.values().copied();
        let max_rows = counts.clone().max().unwrap_or(0);
        let min_rows = counts.min().unwrap_or(0);

        verdict.row_divergence_class = classify_divergence(max_rows, min_rows);
        if min_rows > 0 {
            verdict.row_ratio = Some(max_rows as f64 / min_rows as f64);
        }

        let mut sets = verdict.column_set_by_platform.values();
        let mut common = sets.next().cloned().unwrap_or_default();
        for set in sets {
            common.retain(|column| set.contains(column));
        }

        verdict.platform_only_columns = verdict
            .column_set_by_platform
            .iter()
            .filter_map(|(platform, columns)| {
                let extra: BTreeSet<String> = columns.difference(&common).cloned().collect();
                (!extra.is_empty()).then_some((*platform, extra))
            })
            .collect();
        verdict.common_columns = common;

        if verdict.row_divergence_class != DivergenceClass::Match {
            tracing::debug!(
                "{}: {} row divergence ({} vs {})",
                indicator_code,
                verdict.row_divergence_class,
                max_rows,
                min_rows
            );
        }

        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FetchStatus;

    fn ok(platform: Platform, rows: u64, columns: &[&str]) -> (Platform, FetchResult) {
        (
            platform,
            FetchResult::with_data(
                FetchStatus::Success,
                "CME_MRY0T4",
                platform,
                rows,
                columns.iter().map(|c| c.to_string()).collect(),
            ),
        )
    }

    fn missing(platform: Platform, status: FetchStatus) -> (Platform, FetchResult) {
        (
            platform,
            FetchResult::without_data(status, "CME_MRY0T4", platform, None),
        )
    }

    const CORE: &[&str] = &["indicator", "country_code", "period", "value"];

    #[test]
    fn test_divergence_boundaries() {
        let cases = [
            ((100, 100), DivergenceClass::Match),
            ((100, 109), DivergenceClass::Minor),
            ((100, 110), DivergenceClass::Major),
            ((100, 199), DivergenceClass::Major),
            ((100, 200), DivergenceClass::Critical),
            ((0, 0), DivergenceClass::Match),
            ((0, 5), DivergenceClass::Critical),
        ];
        for ((a, b), expected) in cases {
            assert_eq!(classify_divergence(b, a), expected, "{{{a}, {b}}}");
            assert_eq!(classify_divergence(a, b), expected, "argument order {{{b}, {a}}}");
        }
    }

    #[test]
    fn test_divergence_large_counts_do_not_overflow() {
        assert_eq!(classify_divergence(u64::MAX, u64::MAX - 1), DivergenceClass::Minor);
        assert_eq!(classify_divergence(u64::MAX, u64::MAX / 2), DivergenceClass::Critical);
    }

    #[test]
    fn test_compare_three_platforms() {
        let comparator = CrossPlatformComparator::default();
        let results: BTreeMap<_, _> = [
            ok(Platform::Stata, 100, &["indicator", "country_code", "period", "value", "unit"]),
            ok(Platform::R, 105, CORE),
            ok(Platform::Python, 100, &["indicator", "country_code", "period", "obs_value"]),
        ]
        .into_iter()
        .collect();

        let verdict = comparator.compare("CME_MRY0T4", &results);

        assert_eq!(verdict.row_divergence_class, DivergenceClass::Minor);
        assert_eq!(verdict.row_ratio, Some(1.05));
        assert!(verdict.missing_platforms.is_empty());
        assert!(verdict.core_columns_present[&Platform::Stata]);
        assert!(verdict.core_columns_present[&Platform::R]);
        assert!(!verdict.core_columns_present[&Platform::Python]);
        assert!(verdict.has_core_column_gap());

        let common: Vec<&str> = verdict.common_columns.iter().map(String::as_str).collect();
        assert_eq!(common, vec!["country_code", "indicator", "period"]);
        assert_eq!(
            verdict.platform_only_columns[&Platform::Stata],
            ["unit", "value"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(
            verdict.platform_only_columns[&Platform::Python],
            ["obs_value".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn test_missing_platforms_are_excluded() {
        let comparator = CrossPlatformComparator::default();
        let results: BTreeMap<_, _> = [
            ok(Platform::Stata, 100, CORE),
            missing(Platform::R, FetchStatus::NotFound),
            ok(Platform::Python, 300, CORE),
        ]
        .into_iter()
        .collect();

        let verdict = comparator.compare("CME_MRY0T4", &results);
        assert_eq!(verdict.row_divergence_class, DivergenceClass::Critical);
        assert_eq!(verdict.missing_platforms, [Platform::R].into_iter().collect());
        assert!(!verdict.row_count_by_platform.contains_key(&Platform::R));
        assert!(verdict.platform_only_columns.is_empty());
    }

    #[test]
    fn test_fewer_than_two_present_is_vacuous_match() {
        let comparator = CrossPlatformComparator::default();
        let results: BTreeMap<_, _> = [
            ok(Platform::Stata, 100, &["value"]),
            missing(Platform::R, FetchStatus::Failed),
            missing(Platform::Python, FetchStatus::NetworkError),
        ]
        .into_iter()
        .collect();

        let verdict = comparator.compare("CME_MRY0T4", &results);
        assert_eq!(verdict.row_divergence_class, DivergenceClass::Match);
        assert_eq!(verdict.row_ratio, None);
        assert!(verdict.common_columns.is_empty());
        assert_eq!(verdict.missing_platforms.len(), 2);
        assert!(!verdict.core_columns_present[&Platform::Stata]);

        let none: BTreeMap<Platform, FetchResult> = [missing(Platform::R, FetchStatus::Failed)].into_iter().collect();
        let verdict = comparator.compare("CME_MRY0T4", &none);
        assert_eq!(verdict.row_divergence_class, DivergenceClass::Match);
        assert_eq!(verdict.present_count(), 0);
    }

    #[test]
    fn test_cached_counts_as_present() {
        let comparator = CrossPlatformComparator::new(["value"]);
        let mut cached = ok(Platform::R, 0, &["value"]);
        cached.1.status = FetchStatus::Cached;
        let results: BTreeMap<_, _> = [ok(Platform::Stata, 0, &["value"]), cached].into_iter().collect();

        let verdict = comparator.compare("CME_MRY0T4", &results);
        assert!(verdict.is_comparable());
        assert_eq!(verdict.row_divergence_class, DivergenceClass::Match);
        assert_eq!(verdict.row_ratio, None);
        assert!(verdict.core_columns_present.values().all(|p| *p));
    }
}
