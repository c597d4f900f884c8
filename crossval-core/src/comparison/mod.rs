//! Cross-platform agreement checks for one indicator.
//!
//! - **Row divergence**: max/min row-count ratio across platforms that
//!   returned data, bucketed into match/minor/major/critical
//! - **Schema**: column sets per platform as returned, plus core-column
//!   presence and the common/platform-only split
//!
//! # Example
//! ```rust,ignore
//! use crossval_core::comparison::CrossPlatformComparator;
//!
//! let comparator = CrossPlatformComparator::default();
//! let verdict = comparator.compare("CME_MRY0T4", &results_by_platform);
//! println!("{}: {}", verdict.indicator_code, verdict.row_divergence_class);
//! ```

mod comparator;
mod models;

pub use comparator::{CrossPlatformComparator, classify_divergence};
pub use models::{ComparisonVerdict, DivergenceClass};
