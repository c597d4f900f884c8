//! JSON Schema validation for the report document.
//!
//! The schema is embedded and compiled once. `write_json` validates every
//! report before it reaches disk, and `read_report` validates before
//! deserializing, so a report on disk always matches a supported format.

use jsonschema::Validator;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

/// Report validation errors.
#[derive(Debug, Error)]
pub enum ReportValidationError {
    /// The embedded schema failed to compile
    #[error("JSON Schema compilation failed: {message}")]
    SchemaCompilation { message: String },

    /// The document does not match the schema
    #[error("Report does not match schema ({error_count} errors): {}", .errors.join("; "))]
    ValidationFailed {
        error_count: usize,
        errors: Vec<String>,
    },

    #[error("Unsupported report format version '{version}'. Supported versions: {supported:?}")]
    UnsupportedVersion {
        version: String,
        supported: Vec<String>,
    },
}

const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// Upper bound on schema errors carried in one validation error.
const MAX_REPORTED_ERRORS: usize = 20;

const REPORT_SCHEMA_V1_0: &str = r##"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "title": "crossval validation report v1.0",
  "type": "object",
  "required": ["format_version", "run_id", "parameters", "finished_at", "pool", "sample",
               "results", "verdicts", "summary", "failures"],
  "$defs": {
    "platform": { "enum": ["stata", "r", "python"] },
    "status": { "enum": ["success", "cached", "not_found", "network_error", "failed"] },
    "class": { "enum": ["match", "minor", "major", "critical"] },
    "count": { "type": "integer", "minimum": 0 },
    "columns": { "type": "array", "items": { "type": "string" } }
  },
  "properties": {
    "format_version": { "type": "string", "pattern": "^1\\.0$" },
    "run_id": { "type": "string", "minLength": 1 },
    "finished_at": { "type": "string", "format": "date-time" },
    "parameters": {
      "type": "object",
      "required": ["seed", "target_n", "platforms", "max_cache_age_secs", "started_at"],
      "properties": {
        "seed": { "$ref": "#/$defs/count" },
        "target_n": { "type": "integer", "minimum": 1 },
        "platforms": {
          "type": "array",
          "minItems": 1,
          "uniqueItems": true,
          "items": { "$ref": "#/$defs/platform" }
        },
        "max_cache_age_secs": { "$ref": "#/$defs/count" },
        "started_at": { "type": "string", "format": "date-time" },
        "metadata_source": { "type": "string" }
      }
    },
    "pool": {
      "type": "object",
      "required": ["loaded", "valid", "rejected"],
      "properties": {
        "loaded": { "$ref": "#/$defs/count" },
        "valid": { "$ref": "#/$defs/count" },
        "rejected": { "type": "object", "additionalProperties": { "$ref": "#/$defs/count" } }
      }
    },
    "sample": {
      "type": "object",
      "required": ["allocations", "total", "oversampled"],
      "properties": {
        "allocations": {
          "type": "array",
          "items": {
            "type": "object",
            "required": ["stratum_prefix", "requested_count", "available_count"],
            "properties": {
              "stratum_prefix": { "type": "string" },
              "requested_count": { "type": "integer", "minimum": 1 },
              "available_count": { "type": "integer", "minimum": 1 }
            }
          }
        },
        "total": { "$ref": "#/$defs/count" },
        "oversampled": { "type": "boolean" }
      }
    },
    "results": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["status", "indicator_code", "platform", "row_count", "column_names",
                     "elapsed_seconds", "attempts"],
        "properties": {
          "status": { "$ref": "#/$defs/status" },
          "indicator_code": { "type": "string", "minLength": 1 },
          "platform": { "$ref": "#/$defs/platform" },
          "row_count": { "$ref": "#/$defs/count" },
          "column_names": { "$ref": "#/$defs/columns" },
          "elapsed_seconds": { "type": "number", "minimum": 0 },
          "error_detail": { "type": "string" },
          "attempts": { "$ref": "#/$defs/count" }
        }
      }
    },
    "verdicts": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["indicator_code", "row_count_by_platform", "column_set_by_platform",
                     "row_divergence_class", "missing_platforms", "core_columns_present",
                     "common_columns"],
        "properties": {
          "indicator_code": { "type": "string", "minLength": 1 },
          "row_count_by_platform": {
            "type": "object",
            "propertyNames": { "$ref": "#/$defs/platform" },
            "additionalProperties": { "$ref": "#/$defs/count" }
          },
          "column_set_by_platform": {
            "type": "object",
            "propertyNames": { "$ref": "#/$defs/platform" },
            "additionalProperties": { "$ref": "#/$defs/columns" }
          },
          "row_divergence_class": { "$ref": "#/$defs/class" },
          "row_ratio": { "type": "number", "minimum": 1 },
          "missing_platforms": { "type": "array", "items": { "$ref": "#/$defs/platform" } },
          "core_columns_present": {
            "type": "object",
            "propertyNames": { "$ref": "#/$defs/platform" },
            "additionalProperties": { "type": "boolean" }
          },
          "common_columns": { "$ref": "#/$defs/columns" },
          "platform_only_columns": {
            "type": "object",
            "propertyNames": { "$ref": "#/$defs/platform" },
            "additionalProperties": { "$ref": "#/$defs/columns" }
          }
        }
      }
    },
    "summary": {
      "type": "object",
      "required": ["total_tested", "status_counts", "divergence_counts"],
      "properties": {
        "total_tested": { "$ref": "#/$defs/count" },
        "status_counts": {
          "type": "object",
          "propertyNames": { "$ref": "#/$defs/platform" },
          "additionalProperties": {
            "type": "object",
            "propertyNames": { "$ref": "#/$defs/status" },
            "additionalProperties": { "$ref": "#/$defs/count" }
          }
        },
        "divergence_counts": {
          "type": "object",
          "propertyNames": { "$ref": "#/$defs/class" },
          "additionalProperties": { "$ref": "#/$defs/count" }
        },
        "comparable": { "$ref": "#/$defs/count" },
        "core_column_gaps": { "$ref": "#/$defs/count" }
      }
    },
    "failures": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["indicator_code", "platform", "status"],
        "properties": {
          "indicator_code": { "type": "string", "minLength": 1 },
          "platform": { "$ref": "#/$defs/platform" },
          "status": { "enum": ["not_found", "network_error", "failed"] },
          "detail": { "type": "string" }
        }
      }
    }
  }
}"##;

static COMPILED_SCHEMA: OnceLock<Validator> = OnceLock::new();

/// Compiles the embedded report schema.
///
/// Called lazily by [`validate_report`]; calling it again is a no-op.
///
/// # Errors
/// Returns `ReportValidationError::SchemaCompilation` if the embedded schema
/// is invalid.
pub fn initialize_report_validator() -> Result<(), ReportValidationError> {
    if COMPILED_SCHEMA.get().is_some() {
        return Ok(());
    }

    let schema_json: Value = serde_json::from_str(REPORT_SCHEMA_V1_0).map_err(|e| {
        ReportValidationError::SchemaCompilation {
            message: format!("Failed to parse embedded schema: {}", e),
        }
    })?;

    let compiled = jsonschema::validator_for(&schema_json).map_err(|e| {
        ReportValidationError::SchemaCompilation {
            message: format!("Schema compilation error: {}", e),
        }
    })?;

    // Another thread may have won the race; both compiled the same schema
    let _ = COMPILED_SCHEMA.set(compiled);
    Ok(())
}

/// Validates a report document against the embedded schema.
///
/// # Errors
/// Returns `UnsupportedVersion` for an unknown `format_version`, otherwise
/// `ValidationFailed` with up to 20 schema errors.
pub fn validate_report(json_value: &Value) -> Result<(), ReportValidationError> {
    initialize_report_validator()?;
    let schema = COMPILED_SCHEMA
        .get()
        .ok_or_else(|| ReportValidationError::SchemaCompilation {
            message: "Report schema validator not initialized".to_string(),
        })?;

    validate_format_version(json_value)?;

    let errors: Vec<String> = schema
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(ReportValidationError::ValidationFailed {
            error_count: errors.len(),
            errors: errors.into_iter().take(MAX_REPORTED_ERRORS).collect(),
        });
    }

    Ok(())
}

fn validate_format_version(json_value: &Value) -> Result<(), ReportValidationError> {
    let version = json_value
        .get("format_version")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ReportValidationError::ValidationFailed {
            error_count: 1,
            errors: vec!["Missing required field 'format_version'".to_string()],
        })?;

    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(ReportValidationError::UnsupportedVersion {
            version: version.to_string(),
            supported: SUPPORTED_VERSIONS.iter().map(|s| s.to_string()).collect(),
        });
    }

    Ok(())
}
