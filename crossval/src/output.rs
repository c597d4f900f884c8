//! File output for validation runs.
//!
//! Every run directory gets the same four files. The JSON report is
//! validated against its schema before anything is written.

use crossval_core::report::{self, render_summary};
use crossval_core::{HarnessError, Result, ValidationReport};
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "report.json";
pub const VERDICTS_FILE: &str = "verdicts.jsonl";
pub const SUMMARY_FILE: &str = "summary.md";
pub const FAILURES_FILE: &str = "failures.csv";

/// Paths of the files written for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub report: PathBuf,
    pub verdicts: PathBuf,
    pub summary: PathBuf,
    pub failures: PathBuf,
}

impl OutputPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            report: dir.join(REPORT_FILE),
            verdicts: dir.join(VERDICTS_FILE),
            summary: dir.join(SUMMARY_FILE),
            failures: dir.join(FAILURES_FILE),
        }
    }
}

/// Writes the report, verdict lines, Markdown summary and failure table.
pub async fn save_report(report: &ValidationReport, dir: &Path) -> Result<OutputPaths> {
    let paths = OutputPaths::in_dir(dir);

    report::write_json(report, &paths.report).await?;
    tracing::info!("Output validation passed");
    report::write_jsonl(report, &paths.verdicts).await?;
    save_text(&render_summary(report), &paths.summary).await?;
    report::write_failures_csv(report, &paths.failures).await?;

    tracing::info!("Report saved to {}", dir.display());
    Ok(paths)
}

/// Saves text to a file, creating parent directories.
pub async fn save_text(text: &str, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| HarnessError::io(format!("Failed to create {}", parent.display()), e))?;
    }
    tokio::fs::write(output_path, text)
        .await
        .map_err(|e| HarnessError::io(format!("Failed to write to {}", output_path.display()), e))
}
