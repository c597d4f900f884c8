//! Indicator metadata sources.
//!
//! The harness reads only codes and the optional `dataflows` hint; every
//! other field of a record is carried through untouched.
//!
//! Accepted YAML shapes:
//!
//! ```yaml
//! # metadata file layout
//! metadata: {version: "2.0"}
//! indicators:
//!   CME_MRY0T4: {name: Under-five mortality rate, dataflows: [CME]}
//!   ED_CR_L1: {name: Completion rate, primary}
//! ```
//!
//! a bare `code: record` mapping, or a list of codes / records with a
//! `code` field.

use async_trait::async_trait;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::Result;
use crate::error::HarnessError;
use crate::models::IndicatorRecord;

/// Provides the candidate indicator pool.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Loads every candidate record.
    ///
    /// # Errors
    /// Returns `HarnessError::Metadata` when the source is unreadable or
    /// has an unexpected shape.
    async fn load(&self) -> Result<Vec<IndicatorRecord>>;

    /// Short description for logs and reports.
    fn describe(&self) -> String;
}

/// Reads a YAML metadata snapshot from disk.
#[derive(Debug, Clone)]
pub struct YamlMetadataSource {
    path: PathBuf,
}

impl YamlMetadataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetadataSource for YamlMetadataSource {
    async fn load(&self) -> Result<Vec<IndicatorRecord>> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            HarnessError::metadata_failed(format!("Failed to read {}", self.path.display()), e)
        })?;

        let records = parse_metadata_yaml(&text).map_err(|e| match e {
            HarnessError::Metadata { context, source } => HarnessError::Metadata {
                context: format!("{}: {}", self.path.display(), context),
                source,
            },
            other => other,
        })?;

        tracing::info!(
            "Loaded {} indicator records from {}",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory pool.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataSource {
    records: Vec<IndicatorRecord>,
}

impl StaticMetadataSource {
    pub fn new(records: Vec<IndicatorRecord>) -> Self {
        Self { records }
    }

    /// Pool of records with no metadata.
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(codes.into_iter().map(IndicatorRecord::new).collect())
    }
}

#[async_trait]
impl MetadataSource for StaticMetadataSource {
    async fn load(&self) -> Result<Vec<IndicatorRecord>> {
        Ok(self.records.clone())
    }

    fn describe(&self) -> String {
        format!("static pool of {} records", self.records.len())
    }
}

/// Parses a metadata document into records in document order.
pub fn parse_metadata_yaml(text: &str) -> Result<Vec<IndicatorRecord>> {
    let document: Value = serde_yaml::from_str(text)
        .map_err(|e| HarnessError::metadata_failed("Invalid YAML", e))?;

    let body = match &document {
        Value::Mapping(map) => match map.get("indicators") {
            Some(indicators) => indicators,
            None => &document,
        },
        Value::Null => return Err(HarnessError::metadata("Metadata document is empty")),
        _ => &document,
    };

    match body {
        Value::Mapping(map) => records_from_mapping(map),
        Value::Sequence(items) => records_from_sequence(items),
        Value::Null => Ok(Vec::new()),
        other => Err(HarnessError::metadata(format!(
            "Expected a mapping or list of indicators, found {}",
            value_kind(other)
        ))),
    }
}

fn records_from_mapping(map: &Mapping) -> Result<Vec<IndicatorRecord>> {
    map.iter()
        .map(|(key, value)| {
            let code = key.as_str().ok_or_else(|| {
                HarnessError::metadata(format!(
                    "Indicator keys must be strings, found {}",
                    value_kind(key)
                ))
            })?;
            Ok(IndicatorRecord {
                code: code.to_string(),
                metadata: metadata_fields(code, value)?,
            })
        })
        .collect()
}

fn records_from_sequence(items: &[Value]) -> Result<Vec<IndicatorRecord>> {
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let record = match item {
            Value::String(code) => IndicatorRecord::new(code.as_str()),
            Value::Mapping(map) => {
                let code = map.get("code").and_then(Value::as_str).ok_or_else(|| {
                    HarnessError::metadata(format!("List item {} has no string 'code' field", index))
                })?;
                let mut metadata = metadata_fields(code, item)?;
                metadata.remove("code");
                IndicatorRecord {
                    code: code.to_string(),
                    metadata,
                }
            }
            other => {
                return Err(HarnessError::metadata(format!(
                    "List item {} is a {}, expected a code or a record",
                    index,
                    value_kind(other)
                )));
            }
        };

        if seen.insert(record.code.clone()) {
            records.push(record);
        } else {
            tracing::warn!("Ignoring duplicate indicator code {}", record.code);
        }
    }

    Ok(records)
}

fn metadata_fields(code: &str, value: &Value) -> Result<BTreeMap<String, Value>> {
    match value {
        Value::Null => Ok(BTreeMap::new()),
        Value::Mapping(map) => Ok(map
            .iter()
            .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v.clone())))
            .collect()),
        other => Err(HarnessError::metadata(format!(
            "Record for {} is a {}, expected a mapping",
            code,
            value_kind(other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(records: &[IndicatorRecord]) -> Vec<&str> {
        records.iter().map(|r| r.code.as_str()).collect()
    }

    #[test]
    fn test_indicators_section() {
        let yaml = r#"
metadata:
  version: "2.0"
indicators:
  CME_MRY0T4:
    name: Under-five mortality rate
    dataflows: [CME, GLOBAL_DATAFLOW]
  ED_CR_L1:
    name: Completion rate
    dataflows: EDUCATION
  NT_ANT_HAZ_NE2: ~
"#;
        let records = parse_metadata_yaml(yaml).unwrap();
        assert_eq!(codes(&records), vec!["CME_MRY0T4", "ED_CR_L1", "NT_ANT_HAZ_NE2"]);
        assert_eq!(records[0].dataflows(), vec!["CME", "GLOBAL_DATAFLOW"]);
        assert_eq!(records[1].dataflows(), vec!["EDUCATION"]);
        assert!(records[2].metadata.is_empty());
    }

    #[test]
    fn test_bare_mapping() {
        let records = parse_metadata_yaml("CME_A: {}\nEDUCATION: {name: placeholder}\n").unwrap();
        assert_eq!(codes(&records), vec!["CME_A", "EDUCATION"]);
    }

    #[test]
    fn test_list_of_codes_and_records() {
        let yaml = "- CME_A\n- {code: NT_B, dataflows: NUTRITION}\n- CME_A\n";
        let records = parse_metadata_yaml(yaml).unwrap();
        assert_eq!(codes(&records), vec!["CME_A", "NT_B"]);
        assert_eq!(records[1].dataflows(), vec!["NUTRITION"]);
        assert!(!records[1].metadata.contains_key("code"));
    }

    #[test]
    fn test_malformed_documents() {
        for yaml in ["", "42", "indicators: 7", "- 3", "CME_A: [1, 2]", "- {name: x}", "1: {}", "a: [b"] {
            let err = parse_metadata_yaml(yaml).unwrap_err();
            assert!(matches!(err, HarnessError::Metadata { .. }), "{yaml:?}: {err}");
        }
    }

    #[test]
    fn test_empty_indicator_section_is_empty_pool() {
        assert!(parse_metadata_yaml("indicators:\n").unwrap().is_empty());
        assert!(parse_metadata_yaml("indicators: {}\n").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_yaml_source_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("indicators.yaml");
        std::fs::write(&path, "indicators:\n  CME_A: {}\n  WS_B: {}\n").unwrap();

        let source = YamlMetadataSource::new(&path);
        let records = source.load().await.unwrap();
        assert_eq!(codes(&records), vec!["CME_A", "WS_B"]);

        let missing = YamlMetadataSource::new(dir.path().join("missing.yaml"));
        let err = missing.load().await.unwrap_err();
        assert!(matches!(err, HarnessError::Metadata { source: Some(_), .. }));
        assert!(err.to_string().contains("missing.yaml"));
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticMetadataSource::from_codes(["CME_A", "NT_B"]);
        assert_eq!(source.load().await.unwrap().len(), 2);
        assert_eq!(source.describe(), "static pool of 2 records");
    }
}
