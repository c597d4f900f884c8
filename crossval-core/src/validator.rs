//! Indicator code validation.
//!
//! The upstream metadata feed mixes genuine leaf indicators (`CME_MRY0T4`)
//! with dataflow and category names (`EDUCATION`, `GLOBAL_DATAFLOW`) that
//! leak in as placeholders. `classify` separates the two with five ordered
//! rules; the first failing rule decides the verdict.
//!
//! Matching is case-sensitive throughout.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::IndicatorRecord;

/// Dataflow prefixes published by the UNICEF SDMX warehouse.
const DEFAULT_VALID_PREFIXES: &[&str] = &[
    "CME", "COD", "DM", "ECD", "ECON", "ED", "FD", "GN", "HVA", "IM", "MG", "MNCH", "NT", "PT",
    "PV", "SPP", "WS", "WT",
];

/// Dataflow and category names known to appear in indicator lists.
const DEFAULT_INVALID_NAMES: &[&str] = &[
    "CHILD_MORTALITY",
    "CHILD_RELATED_SDG",
    "CHLD_PVTY",
    "EDUCATION",
    "FUNCTIONAL_DIFF",
    "GENDER",
    "GLOBAL_DATAFLOW",
    "HIV_AIDS",
    "IMMUNISATION",
    "NUTRITION",
    "PT_CM",
    "PT_FGM",
    "SOC_PROTECTION",
    "WASH_HEALTHCARE_FACILITY",
    "WASH_HOUSEHOLDS",
    "WASH_SCHOOLS",
];

/// Plausible dataflow-prefix length when unknown prefixes are allowed.
const MIN_PREFIX_LEN: usize = 2;
const MAX_PREFIX_LEN: usize = 6;

/// Why a code was rejected (or `Valid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Valid,
    KnownInvalidName,
    NoUnderscore,
    UnknownPrefix,
    ImplausiblePrefixLength,
    MissingCodeAfterPrefix,
}

impl RejectionReason {
    /// Human-readable reason string.
    pub fn describe(&self) -> &'static str {
        match self {
            RejectionReason::Valid => "valid",
            RejectionReason::KnownInvalidName => "known invalid name",
            RejectionReason::NoUnderscore => "no underscore",
            RejectionReason::UnknownPrefix => "unknown prefix",
            RejectionReason::ImplausiblePrefixLength => "implausible prefix length",
            RejectionReason::MissingCodeAfterPrefix => "missing code after prefix",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// Result of classifying one indicator code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub reason: RejectionReason,
}

impl ValidationVerdict {
    fn valid() -> Self {
        Self {
            is_valid: true,
            reason: RejectionReason::Valid,
        }
    }

    fn reject(reason: RejectionReason) -> Self {
        Self {
            is_valid: false,
            reason,
        }
    }
}

/// Validator configuration.
///
/// Built once at startup and passed by reference; there is no module-level
/// registry behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Prefixes accepted when `allow_unknown_prefixes` is false
    pub known_valid_prefixes: BTreeSet<String>,
    /// Exact codes that are always rejected
    pub known_invalid_names: BTreeSet<String>,
    /// Accept any prefix of plausible length instead of the known set
    pub allow_unknown_prefixes: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            known_valid_prefixes: DEFAULT_VALID_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            known_invalid_names: DEFAULT_INVALID_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allow_unknown_prefixes: false,
        }
    }
}

impl ValidatorConfig {
    /// Creates a new validator config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to replace the known prefix set.
    pub fn with_known_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_valid_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to replace the blocklist.
    pub fn with_invalid_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_invalid_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to allow prefixes outside the known set.
    pub fn with_allow_unknown_prefixes(mut self, allow: bool) -> Self {
        self.allow_unknown_prefixes = allow;
        self
    }
}

/// Classifies a single indicator code.
///
/// Total over all strings, deterministic and free of side effects.
pub fn classify(code: &str, config: &ValidatorConfig) -> ValidationVerdict {
    if config.known_invalid_names.contains(code) {
        return ValidationVerdict::reject(RejectionReason::KnownInvalidName);
    }

    let Some((prefix, rest)) = code.split_once('_') else {
        return ValidationVerdict::reject(RejectionReason::NoUnderscore);
    };

    if config.allow_unknown_prefixes {
        let len = prefix.chars().count();
        if !(MIN_PREFIX_LEN..=MAX_PREFIX_LEN).contains(&len) {
            return ValidationVerdict::reject(RejectionReason::ImplausiblePrefixLength);
        }
    } else if !config.known_valid_prefixes.contains(prefix) {
        return ValidationVerdict::reject(RejectionReason::UnknownPrefix);
    }

    if rest.is_empty() {
        return ValidationVerdict::reject(RejectionReason::MissingCodeAfterPrefix);
    }

    ValidationVerdict::valid()
}

/// Valid records plus a tally of rejections by reason.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub valid: Vec<IndicatorRecord>,
    pub rejected: BTreeMap<RejectionReason, usize>,
}

impl FilterOutcome {
    /// Total number of rejected records.
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Keeps the records whose code classifies as valid, preserving order.
pub fn filter_valid(records: Vec<IndicatorRecord>, config: &ValidatorConfig) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();

    for record in records {
        let verdict = classify(&record.code, config);
        if verdict.is_valid {
            outcome.valid.push(record);
        } else {
            tracing::trace!("Rejected indicator '{}': {}", record.code, verdict.reason);
            let count = outcome.rejected.entry(verdict.reason).or_insert(0);
            *count = count.saturating_add(1);
        }
    }

    tracing::debug!(
        "Indicator validation kept {} records, rejected {}",
        outcome.valid.len(),
        outcome.rejected_total()
    );

    outcome
}
