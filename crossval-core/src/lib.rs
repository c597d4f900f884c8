//! Core engine of the crossval harness.
//!
//! crossval checks that the Stata, R and Python clients of an SDMX data
//! service return consistent tables for the same indicator. This crate
//! holds everything except the command line:
//!
//! - [`validator`] drops dataflow placeholders from the metadata feed
//! - [`sampling`] draws a reproducible stratified sample
//! - [`runner`] fetches one indicator from one platform, via [`cache`]
//! - [`comparison`] scores row-count and schema agreement
//! - [`orchestrator`] runs the pipeline and builds a [`report`]
//!
//! # Failure model
//! Only input-contract violations surface as [`HarnessError`]. Fetch
//! failures are recorded as [`FetchStatus`] values and reported per
//! indicator and platform.

pub mod cache;
pub mod clock;
pub mod comparison;
pub mod config;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod models;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod sampling;
pub mod validator;

// Re-export commonly used types
pub use cache::{CacheManager, CacheStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use comparison::{ComparisonVerdict, CrossPlatformComparator, DivergenceClass};
pub use config::{ConfigValidationError, HarnessConfig, PlatformCommand, RunnerConfig};
pub use error::{HarnessError, Result};
pub use metadata::{MetadataSource, StaticMetadataSource, YamlMetadataSource};
pub use models::{CacheEntry, FetchResult, FetchStatus, IndicatorRecord, Platform, SampleAllocation};
pub use orchestrator::{DrawnSample, RunParams, ValidationOrchestrator};
pub use report::{ValidationReport, render_summary};
pub use runner::{CommandFetcher, DataFetcher, FetchOutcome, PlatformRunner};
pub use sampling::{SampleOutcome, StratifyBy, sample, sample_with_plan};
pub use validator::{RejectionReason, ValidationVerdict, ValidatorConfig, classify};
