//! Report serialization to disk.

use std::path::Path;

use super::models::ValidationReport;
use super::schema::validate_report;
use crate::Result;
use crate::error::HarnessError;

/// Writes the full report as pretty JSON after schema validation.
pub async fn write_json(report: &ValidationReport, path: &Path) -> Result<()> {
    let value = serde_json::to_value(report)
        .map_err(|e| HarnessError::serialization("Report serialization", e))?;
    validate_report(&value)?;

    let json = serde_json::to_string_pretty(&value)
        .map_err(|e| HarnessError::serialization("Report serialization", e))?;
    write_file(path, json.as_bytes()).await
}

/// Reads and validates a report written by [`write_json`].
pub async fn read_report(path: &Path) -> Result<ValidationReport> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| HarnessError::io(format!("Failed to read report {}", path.display()), e))?;
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
        HarnessError::serialization(format!("Report {} is not valid JSON", path.display()), e)
    })?;
    validate_report(&value)?;

    serde_json::from_value(value).map_err(|e| {
        HarnessError::serialization(format!("Report {} has unexpected content", path.display()), e)
    })
}

/// Writes one verdict per line.
pub async fn write_jsonl(report: &ValidationReport, path: &Path) -> Result<()> {
    let mut buffer = Vec::new();
    for verdict in &report.verdicts {
        serde_json::to_writer(&mut buffer, verdict)
            .map_err(|e| HarnessError::serialization("Verdict serialization", e))?;
        buffer.push(b'\n');
    }
    write_file(path, &buffer).await
}

/// Writes the failure list as CSV for triage.
pub async fn write_failures_csv(report: &ValidationReport, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["indicator_code", "platform", "status", "detail"])
        .map_err(|e| HarnessError::serialization("Failure table", e))?;
    for failure in &report.failures {
        writer
            .write_record([
                failure.indicator_code.as_str(),
                failure.platform.as_str(),
                failure.status.as_str(),
                failure.detail.as_deref().unwrap_or(""),
            ])
            .map_err(|e| HarnessError::serialization("Failure table", e))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| HarnessError::serialization("Failure table", e.into_error()))?;
    write_file(path, &bytes).await
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            HarnessError::io(format!("Failed to create directory {}", parent.display()), e)
        })?;
    }

    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| HarnessError::io(format!("Failed to write {}", path.display()), e))?;
    tracing::debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
