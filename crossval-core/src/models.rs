//! Core data models for indicator sampling, fetching and caching.
//!
//! These structures flow between the validator, sampler, runners and
//! comparator. All of them serialize so they can be embedded in the
//! validation report as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Target runtime whose data-fetch command is cross-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Stata,
    R,
    Python,
}

impl Platform {
    /// All platforms in canonical order.
    pub const ALL: [Platform; 3] = [Platform::Stata, Platform::R, Platform::Python];

    /// Lowercase identifier used in cache paths and CLI arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Stata => "stata",
            Platform::R => "r",
            Platform::Python => "python",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Stata => write!(f, "Stata"),
            Platform::R => write!(f, "R"),
            Platform::Python => write!(f, "Python"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stata" => Ok(Platform::Stata),
            "r" => Ok(Platform::R),
            "python" | "py" => Ok(Platform::Python),
            other => Err(format!(
                "unknown platform '{}' (expected stata, r or python)",
                other
            )),
        }
    }
}

/// One candidate indicator entry from an upstream metadata snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRecord {
    pub code: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_yaml::Value>,
}

impl IndicatorRecord {
    /// Creates a record with no metadata.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builder method to attach a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_yaml::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Dataflow prefix: the code up to (excluding) the first underscore.
    ///
    /// Codes without an underscore are their own prefix.
    pub fn prefix(&self) -> &str {
        dataflow_prefix(&self.code)
    }

    /// Dataflow hints from metadata, accepting either a scalar or a list.
    pub fn dataflows(&self) -> Vec<String> {
        match self.metadata.get("dataflows") {
            Some(serde_yaml::Value::String(s)) => vec![s.clone()],
            Some(serde_yaml::Value::Sequence(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Returns the substring before the first underscore, or the whole code.
pub fn dataflow_prefix(code: &str) -> &str {
    code.split_once('_').map_or(code, |(prefix, _)| prefix)
}

/// Per-stratum sample size decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleAllocation {
    pub stratum_prefix: String,
    pub requested_count: usize,
    pub available_count: usize,
}

/// Outcome class of a single platform fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// Fresh data from the external command
    Success,
    /// Served from a fresh cache entry
    Cached,
    /// The platform reported that no data exists for the code
    NotFound,
    /// Transport failure after the retry budget was spent
    NetworkError,
    /// Any other failure
    Failed,
}

impl FetchStatus {
    /// All statuses in report order.
    pub const ALL: [FetchStatus; 5] = [
        FetchStatus::Success,
        FetchStatus::Cached,
        FetchStatus::NotFound,
        FetchStatus::NetworkError,
        FetchStatus::Failed,
    ];

    /// Whether the platform produced a dataset (fresh or cached).
    pub fn has_data(&self) -> bool {
        matches!(self, FetchStatus::Success | FetchStatus::Cached)
    }

    /// Snake-case label used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Cached => "cached",
            FetchStatus::NotFound => "not_found",
            FetchStatus::NetworkError => "network_error",
            FetchStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one `PlatformRunner::fetch` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub status: FetchStatus,
    pub indicator_code: String,
    pub platform: Platform,
    pub row_count: u64,
    pub column_names: Vec<String>,
    pub elapsed_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Number of external command invocations (0 for cache hits)
    pub attempts: u32,
}

impl FetchResult {
    /// Creates a result with data (`Success` or `Cached`).
    pub fn with_data(
        status: FetchStatus,
        indicator_code: impl Into<String>,
        platform: Platform,
        row_count: u64,
        column_names: Vec<String>,
    ) -> Self {
        Self {
            status,
            indicator_code: indicator_code.into(),
            platform,
            row_count,
            column_names,
            elapsed_seconds: 0.0,
            error_detail: None,
            attempts: 0,
        }
    }

    /// Creates a result without data (`NotFound`, `NetworkError`, `Failed`).
    pub fn without_data(
        status: FetchStatus,
        indicator_code: impl Into<String>,
        platform: Platform,
        error_detail: Option<String>,
    ) -> Self {
        Self {
            status,
            indicator_code: indicator_code.into(),
            platform,
            row_count: 0,
            column_names: Vec::new(),
            elapsed_seconds: 0.0,
            error_detail,
            attempts: 0,
        }
    }

    /// Sets the elapsed time.
    pub fn with_elapsed(mut self, elapsed: std::time::Duration) -> Self {
        self.elapsed_seconds = elapsed.as_secs_f64();
        self
    }

    /// Sets the number of command invocations.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// A previously fetched dataset for one (indicator, platform) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub indicator_code: String,
    pub platform: Platform,
    pub fetched_at: DateTime<Utc>,
    pub row_count: u64,
    pub column_names: Vec<String>,
    pub payload_location: PathBuf,
}

impl CacheEntry {
    /// Age of the entry relative to `now`; negative ages clamp to zero.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        now.signed_duration_since(self.fetched_at)
            .to_std()
            .unwrap_or_default()
    }
}
