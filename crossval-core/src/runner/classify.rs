//! Mapping of command exit codes and output text to failure classes.

use regex::Regex;

use crate::Result;
use crate::config::PlatformCommand;
use crate::error::HarnessError;

/// Failure class of an external command that produced no dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The platform says the indicator has no data
    NotFound,
    /// Transport or connectivity failure, worth retrying
    Network,
    /// Anything else
    Other,
}

/// Classifies failed invocations from exit codes and output patterns.
///
/// Exit codes are checked before patterns, and not-found signals win over
/// network signals at each level.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    not_found: Vec<Regex>,
    network: Vec<Regex>,
    not_found_exit_codes: Vec<i32>,
    network_exit_codes: Vec<i32>,
}

impl FailureClassifier {
    /// Compiles the command's signal patterns.
    ///
    /// # Errors
    /// Returns `HarnessError::Configuration` for an invalid regex.
    pub fn from_command(command: &PlatformCommand) -> Result<Self> {
        Ok(Self {
            not_found: compile(&command.not_found_patterns)?,
            network: compile(&command.network_patterns)?,
            not_found_exit_codes: command.not_found_exit_codes.clone(),
            network_exit_codes: command.network_exit_codes.clone(),
        })
    }

    /// Classifies an invocation from its exit code (`None` when killed by a
    /// signal) and its combined stdout/stderr.
    pub fn classify(&self, exit_code: Option<i32>, output: &str) -> FailureKind {
        if let Some(code) = exit_code {
            if self.not_found_exit_codes.contains(&code) {
                return FailureKind::NotFound;
            }
            if self.network_exit_codes.contains(&code) {
                return FailureKind::Network;
            }
        }

        if self.not_found.iter().any(|re| re.is_match(output)) {
            FailureKind::NotFound
        } else if self.network.iter().any(|re| re.is_match(output)) {
            FailureKind::Network
        } else {
            FailureKind::Other
        }
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                HarnessError::configuration(format!("Invalid signal pattern '{}': {}", p, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;

    fn classifier() -> FailureClassifier {
        let command = PlatformCommand::default_for(Platform::Stata)
            .with_not_found_exit_codes(vec![3])
            .with_network_exit_codes(vec![4]);
        FailureClassifier::from_command(&command).unwrap()
    }

    #[test]
    fn test_exit_codes_take_precedence() {
        let c = classifier();
        assert_eq!(c.classify(Some(3), "could not resolve host"), FailureKind::NotFound);
        assert_eq!(c.classify(Some(4), "no data found"), FailureKind::Network);
    }

    #[test]
    fn test_patterns() {
        let c = classifier();
        assert_eq!(
            c.classify(Some(1), "Error: No data found for indicator CME_XYZ"),
            FailureKind::NotFound
        );
        assert_eq!(
            c.classify(Some(1), "curl: (6) Could not resolve host: sdmx.data.unicef.org"),
            FailureKind::Network
        );
        assert_eq!(c.classify(None, "operation timed out"), FailureKind::Network);
        assert_eq!(c.classify(Some(0), "end of do-file\nr(677);"), FailureKind::Network);
        assert_eq!(c.classify(Some(1), "HTTP 404"), FailureKind::NotFound);
        assert_eq!(c.classify(Some(1), "HTTP 503 Service Unavailable"), FailureKind::Network);
    }

    #[test]
    fn test_unrecognized_output_is_other() {
        let c = classifier();
        assert_eq!(
            c.classify(Some(1), "Error in read.csv: object 'x' not found"),
            FailureKind::Other
        );
        assert_eq!(c.classify(Some(2), ""), FailureKind::Other);
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let mut command = PlatformCommand::new("python");
        command.not_found_patterns = vec!["[".into()];
        let err = FailureClassifier::from_command(&command).unwrap_err();
        assert!(matches!(err, HarnessError::Configuration { .. }));
    }
}
