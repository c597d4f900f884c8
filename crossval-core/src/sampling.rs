//! Reproducible proportional stratified sampling of indicator codes.
//!
//! The valid pool is partitioned into strata (dataflow prefix by default).
//! Each stratum receives `max(1, round(target_n * len / total))` draws,
//! clamped to its size, so every non-empty stratum is represented. The
//! minimum-one rule means the sample can be larger than `target_n` when there
//! are many small strata; callers get the allocations back and are expected
//! to report the overshoot rather than truncate.
//!
//! # Reproducibility
//! A single `ChaCha8Rng` seeded from `seed` is threaded through the strata in
//! lexicographic key order. Each stratum is drawn with a partial Fisher-Yates
//! shuffle fed by raw 64-bit words from the generator. Only the ChaCha8
//! stream is involved, not `rand`'s sampling helpers, so a seed selects the
//! same sample across builds, `rand` releases and platforms.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::HarnessError;
use crate::models::{IndicatorRecord, SampleAllocation, dataflow_prefix};
use crate::Result;

/// A non-empty partition of the pool sharing one stratification key.
#[derive(Debug, Clone, PartialEq)]
pub struct Stratum {
    pub prefix: String,
    /// Members in discovery order
    pub members: Vec<IndicatorRecord>,
}

/// Built-in stratification keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StratifyBy {
    /// Substring before the first underscore of the code
    #[default]
    Prefix,
    /// First `dataflows` hint from metadata, falling back to the prefix
    Dataflow,
}

impl StratifyBy {
    /// Computes the stratum key for a record.
    pub fn key(&self, record: &IndicatorRecord) -> String {
        match self {
            StratifyBy::Prefix => dataflow_prefix(&record.code).to_string(),
            StratifyBy::Dataflow => record
                .dataflows()
                .into_iter()
                .next()
                .unwrap_or_else(|| dataflow_prefix(&record.code).to_string()),
        }
    }
}

/// Sampled records together with the allocation that produced them.
#[derive(Debug, Clone, Default)]
pub struct SampleOutcome {
    pub records: Vec<IndicatorRecord>,
    pub allocations: Vec<SampleAllocation>,
}

impl SampleOutcome {
    /// Whether the minimum-one rule pushed the sample above `target_n`.
    pub fn exceeds(&self, target_n: usize) -> bool {
        self.records.len() > target_n
    }
}

/// Partitions the pool into strata, ordered lexicographically by key.
pub fn partition<F>(pool: &[IndicatorRecord], stratify_by: F) -> Vec<Stratum>
where
    F: Fn(&IndicatorRecord) -> String,
{
    let mut strata: BTreeMap<String, Vec<IndicatorRecord>> = BTreeMap::new();
    for record in pool {
        strata
            .entry(stratify_by(record))
            .or_default()
            .push(record.clone());
    }

    strata
        .into_iter()
        .map(|(prefix, members)| Stratum { prefix, members })
        .collect()
}

/// Per-stratum draw count: proportional share, at least one, at most `available`.
///
/// Rounding is half-to-even.
pub fn allocation_count(target_n: usize, available: usize, total: usize) -> usize {
    if available == 0 || total == 0 {
        return 0;
    }
    let share = target_n.saturating_mul(available) as f64 / total as f64;
    let rounded = share.round_ties_even() as usize;
    rounded.max(1).min(available)
}

/// Computes the allocation for every stratum without drawing.
pub fn plan(strata: &[Stratum], target_n: usize) -> Vec<SampleAllocation> {
    let total: usize = strata.iter().map(|s| s.members.len()).sum();

    strata
        .iter()
        .map(|stratum| SampleAllocation {
            stratum_prefix: stratum.prefix.clone(),
            requested_count: allocation_count(target_n, stratum.members.len(), total),
            available_count: stratum.members.len(),
        })
        .collect()
}

/// Draws a stratified sample and returns it with its allocations.
///
/// # Errors
/// Returns `HarnessError::InvalidInput` when `target_n` is zero. An empty
/// pool is not an error and yields an empty outcome.
pub fn sample_with_plan<F>(
    pool: &[IndicatorRecord],
    target_n: usize,
    seed: u64,
    stratify_by: F,
) -> Result<SampleOutcome>
where
    F: Fn(&IndicatorRecord) -> String,
{
    if target_n == 0 {
        return Err(HarnessError::invalid_input(
            "target_n must be at least 1",
        ));
    }

    if pool.is_empty() {
        return Ok(SampleOutcome::default());
    }

    let strata = partition(pool, stratify_by);
    let allocations = plan(&strata, target_n);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut records = Vec::with_capacity(allocations.iter().map(|a| a.requested_count).sum());

    for (stratum, allocation) in strata.iter().zip(&allocations) {
        let picks = draw_indices(&mut rng, stratum.members.len(), allocation.requested_count);
        records.extend(picks.into_iter().map(|i| stratum.members[i].clone()));
    }

    let outcome = SampleOutcome {
        records,
        allocations,
    };

    if outcome.exceeds(target_n) {
        tracing::info!(
            "Sample holds {} indicators for a target of {} ({} strata each keep at least one)",
            outcome.records.len(),
            target_n,
            strata.len()
        );
    }

    Ok(outcome)
}

/// Picks `count` distinct indices from `0..len` in draw order.
fn draw_indices(rng: &mut ChaCha8Rng, len: usize, count: usize) -> Vec<usize> {
    let count = count.min(len);
    let mut indices: Vec<usize> = (0..len).collect();
    for i in 0..count {
        let remaining = len.saturating_sub(i) as u64;
        let offset = uniform_below(rng, remaining) as usize;
        indices.swap(i, i.saturating_add(offset));
    }
    indices.truncate(count);
    indices
}

/// Unbiased value in `0..bound` by rejection; `bound` must be non-zero.
fn uniform_below(rng: &mut ChaCha8Rng, bound: u64) -> u64 {
    // Words below `2^64 mod bound` would favour the low residues
    let threshold = bound.wrapping_neg().wrapping_rem(bound);
    loop {
        let word = rng.next_u64();
        if word >= threshold {
            return word.wrapping_rem(bound);
        }
    }
}

/// Draws a stratified sample.
///
/// Identical `(pool, target_n, seed, stratify_by)` always produce an
/// identical sequence. See [`sample_with_plan`] for the allocations.
pub fn sample<F>(
    pool: &[IndicatorRecord],
    target_n: usize,
    seed: u64,
    stratify_by: F,
) -> Result<Vec<IndicatorRecord>>
where
    F: Fn(&IndicatorRecord) -> String,
{
    sample_with_plan(pool, target_n, seed, stratify_by).map(|outcome| outcome.records)
}
