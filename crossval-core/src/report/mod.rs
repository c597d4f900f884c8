//! Validation report: data model, schema validation and writers.
//!
//! A run produces one [`ValidationReport`]. It can be written as
//! - a schema-validated JSON document (`write_json`)
//! - one verdict per line (`write_jsonl`)
//! - a failure table for triage (`write_failures_csv`)
//! - a Markdown summary (`render_summary`)

mod models;
mod output;
mod render;
mod schema;

pub use models::{
    FailureRecord, PoolStats, REPORT_FORMAT_VERSION, RunParameters, RunSummary, SampleStats,
    ValidationReport,
};
pub use output::{read_report, write_failures_csv, write_json, write_jsonl};
pub use render::render_summary;
pub use schema::{ReportValidationError, initialize_report_validator, validate_report};
