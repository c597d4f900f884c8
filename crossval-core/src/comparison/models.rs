//! Comparison result types.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::Platform;

/// Row-count divergence bucket.
///
/// Ordered by severity, so `max()` over verdicts gives the worst class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DivergenceClass {
    /// Identical row counts
    Match,
    /// Less than 10% apart
    Minor,
    /// 10% up to (excluding) 100% apart
    Major,
    /// At least twice as many rows, or rows on one side only
    Critical,
}

impl DivergenceClass {
    pub const ALL: [DivergenceClass; 4] = [
        DivergenceClass::Match,
        DivergenceClass::Minor,
        DivergenceClass::Major,
        DivergenceClass::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DivergenceClass::Match => "match",
            DivergenceClass::Minor => "minor",
            DivergenceClass::Major => "major",
            DivergenceClass::Critical => "critical",
        }
    }
}

impl std::fmt::Display for DivergenceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agreement of one indicator's results across platforms.
///
/// Derived purely from the run's fetch results; never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonVerdict {
    pub indicator_code: String,
    /// Row counts of platforms that returned data
    pub row_count_by_platform: BTreeMap<Platform, u64>,
    /// Column names of platforms that returned data, unreconciled
    pub column_set_by_platform: BTreeMap<Platform, BTreeSet<String>>,
    pub row_divergence_class: DivergenceClass,
    /// `max / min` over present platforms; absent with fewer than two
    /// present platforms or a zero minimum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_ratio: Option<f64>,
    /// Platforms that were asked but returned no data
    pub missing_platforms: BTreeSet<Platform>,
    /// Whether each present platform returned every core column
    pub core_columns_present: BTreeMap<Platform, bool>,
    /// Columns shared by all present platforms (empty below two platforms)
    pub common_columns: BTreeSet<String>,
    /// Columns only some present platforms returned
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub platform_only_columns: BTreeMap<Platform, BTreeSet<String>>,
}

impl ComparisonVerdict {
    /// Number of platforms that returned data.
    pub fn present_count(&self) -> usize {
        self.row_count_by_platform.len()
    }

    /// Whether at least two platforms were actually compared.
    pub fn is_comparable(&self) -> bool {
        self.present_count() >= 2
    }

    /// Whether any present platform is missing a core column.
    pub fn has_core_column_gap(&self) -> bool {
        self.core_columns_present.values().any(|present| !present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergence_class_order_and_serde() {
        assert!(DivergenceClass::Match < DivergenceClass::Minor);
        assert!(DivergenceClass::Major < DivergenceClass::Critical);
        assert_eq!(
            serde_json::to_string(&DivergenceClass::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(DivergenceClass::Minor.to_string(), "minor");
    }
}
