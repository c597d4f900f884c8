//! Harness configuration.
//!
//! Configuration is plain serde data with defaults for every field, so an
//! empty TOML file is a valid configuration. Platform commands that a file
//! does not mention fall back to the built-in wrapper invocations.
//!
//! ```toml
//! cache_dir = ".crossval-cache"
//! max_cache_age_secs = 86400
//! parallel_platforms = true
//!
//! [runner]
//! timeout_secs = 60
//!
//! [platforms.python]
//! program = "python3"
//! args = ["scripts/fetch.py", "{indicator}", "{output}"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::Result;
use crate::error::HarnessError;
use crate::models::Platform;
use crate::validator::ValidatorConfig;

/// Default freshness window for cache entries (7 days).
pub const DEFAULT_MAX_CACHE_AGE_SECS: u64 = 604_800;

/// Columns every platform is expected to return.
pub const DEFAULT_CORE_COLUMNS: &[&str] = &["indicator", "country_code", "period", "value"];

/// Placeholder replaced by the indicator code in command arguments.
pub const INDICATOR_PLACEHOLDER: &str = "{indicator}";

/// Placeholder replaced by the CSV output path in command arguments.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Retry and timeout policy for external fetch commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Upper bound for one command invocation
    pub timeout_secs: u64,
    /// Invocations allowed for transport failures, including the first
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub retry_backoff_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_attempts: 3,
            retry_backoff_secs: 5,
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    /// Builder method to set the per-call timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Builder method to set the attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Builder method to set the backoff between attempts.
    pub fn with_retry_backoff_secs(mut self, secs: u64) -> Self {
        self.retry_backoff_secs = secs;
        self
    }
}

/// How to invoke one platform's data-fetch command and read its signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCommand {
    pub program: String,
    /// Arguments; `{indicator}` and `{output}` are substituted per call
    #[serde(default)]
    pub args: Vec<String>,
    /// Regexes over stdout/stderr meaning "no data for this code"
    #[serde(default = "default_not_found_patterns")]
    pub not_found_patterns: Vec<String>,
    /// Regexes over stdout/stderr meaning a transport failure
    #[serde(default = "default_network_patterns")]
    pub network_patterns: Vec<String>,
    #[serde(default)]
    pub not_found_exit_codes: Vec<i32>,
    #[serde(default)]
    pub network_exit_codes: Vec<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Log the program writes instead of printing; relative to `working_dir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

fn default_not_found_patterns() -> Vec<String> {
    [
        r"(?i)no data (found|available|returned)",
        r"(?i)no observations",
        r"(?i)indicator\b.*\bnot found",
        r"\b404\b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_network_patterns() -> Vec<String> {
    [
        r"(?i)could not resolve host",
        r"(?i)name or service not known",
        r"(?i)timed? ?out",
        r"(?i)connection (refused|reset|aborted)",
        r"(?i)network is unreachable",
        r"(?i)\b(ssl|tls)\b.*(error|fail)",
        r"(?i)could not connect",
        r"\b50[234]\b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl PlatformCommand {
    /// Creates a command with the default signal patterns.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            not_found_patterns: default_not_found_patterns(),
            network_patterns: default_network_patterns(),
            not_found_exit_codes: Vec::new(),
            network_exit_codes: Vec::new(),
            working_dir: None,
            log_file: None,
        }
    }

    /// Built-in wrapper invocation for a platform.
    pub fn default_for(platform: Platform) -> Self {
        let placeholders = [INDICATOR_PLACEHOLDER, OUTPUT_PLACEHOLDER];
        let (program, script_args): (&str, Vec<&str>) = match platform {
            // Stata has no argv; the do-file reads its arguments with `args`
            Platform::Stata => ("stata-mp", vec!["-b", "do", "fetch_indicator.do"]),
            Platform::R => ("Rscript", vec!["fetch_indicator.R"]),
            Platform::Python => ("python", vec!["fetch_indicator.py"]),
        };

        let mut command = Self::new(program).with_args(script_args.iter().chain(placeholders.iter()));
        if platform == Platform::Stata {
            // Batch mode exits 0 and reports return codes only in the log
            command.log_file = Some(PathBuf::from("fetch_indicator.log"));
            command
                .not_found_patterns
                .push(r"r\(2000\)".to_string());
            command
                .network_patterns
                .extend([r"r\(631\)".to_string(), r"r\(677\)".to_string()]);
        }
        command
    }

    /// Builder method to set the arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        self
    }

    /// Builder method to set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Builder method to set the log file read for failure signals.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Log file location with a relative path resolved against `working_dir`.
    pub fn log_path(&self) -> Option<PathBuf> {
        let log = self.log_file.as_ref()?;
        Some(match &self.working_dir {
            Some(dir) if log.is_relative() => dir.join(log),
            _ => log.clone(),
        })
    }

    /// Builder method to set exit codes meaning "no data".
    pub fn with_not_found_exit_codes(mut self, codes: Vec<i32>) -> Self {
        self.not_found_exit_codes = codes;
        self
    }

    /// Builder method to set exit codes meaning a transport failure.
    pub fn with_network_exit_codes(mut self, codes: Vec<i32>) -> Self {
        self.network_exit_codes = codes;
        self
    }

    /// Arguments with placeholders substituted.
    pub fn render_args(&self, indicator_code: &str, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INDICATOR_PLACEHOLDER, indicator_code)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }
}

/// Top-level harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Root of the dataset cache
    pub cache_dir: PathBuf,
    /// Directory for command output files; the system temp dir when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    pub max_cache_age_secs: u64,
    /// Fetch one indicator's platforms concurrently
    pub parallel_platforms: bool,
    pub core_columns: Vec<String>,
    pub validator: ValidatorConfig,
    pub runner: RunnerConfig,
    pub platforms: BTreeMap<Platform, PlatformCommand>,
}

/// Validation errors for harness configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("cache_dir must not be empty")]
    EmptyCacheDir,
    #[error("runner.max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(u32),
    #[error("runner.timeout_secs must be at least 1, got {0}")]
    InvalidTimeout(u64),
    #[error("core_columns must not contain empty names")]
    EmptyCoreColumn,
    #[error("platforms.{}.program must not be empty", .0.as_str())]
    EmptyProgram(Platform),
    #[error("platforms.{}: invalid pattern '{pattern}': {reason}", .platform.as_str())]
    InvalidPattern {
        platform: Platform,
        pattern: String,
        reason: String,
    },
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".crossval-cache"),
            scratch_dir: None,
            max_cache_age_secs: DEFAULT_MAX_CACHE_AGE_SECS,
            parallel_platforms: false,
            core_columns: DEFAULT_CORE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            validator: ValidatorConfig::default(),
            runner: RunnerConfig::default(),
            platforms: Platform::ALL
                .into_iter()
                .map(|p| (p, PlatformCommand::default_for(p)))
                .collect(),
        }
    }
}

impl HarnessConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::io(format!("Failed to read config {}", path.display()), e)
        })?;
        let config = Self::from_toml(&text).map_err(|e| match e {
            HarnessError::Configuration { message } => {
                HarnessError::configuration(format!("{}: {}", path.display(), message))
            }
            other => other,
        })?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: Self =
            toml::from_str(text).map_err(|e| HarnessError::configuration(e.to_string()))?;
        for platform in Platform::ALL {
            config
                .platforms
                .entry(platform)
                .or_insert_with(|| PlatformCommand::default_for(platform));
        }
        config
            .validate()
            .map_err(|e| HarnessError::configuration(e.to_string()))?;
        Ok(config)
    }

    /// Builder method to set the cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Builder method to set the scratch directory.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Builder method to set the cache freshness window.
    pub fn with_max_cache_age(mut self, max_age: Duration) -> Self {
        self.max_cache_age_secs = max_age.as_secs();
        self
    }

    /// Builder method to enable concurrent platform fetches.
    pub fn with_parallel_platforms(mut self, parallel: bool) -> Self {
        self.parallel_platforms = parallel;
        self
    }

    /// Builder method to set the core columns.
    pub fn with_core_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.core_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set the runner policy.
    pub fn with_runner(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }

    /// Builder method to replace one platform's command.
    pub fn with_platform_command(mut self, platform: Platform, command: PlatformCommand) -> Self {
        self.platforms.insert(platform, command);
        self
    }

    pub fn max_cache_age(&self) -> Duration {
        Duration::from_secs(self.max_cache_age_secs)
    }

    /// Directory for command output files.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("crossval"))
    }

    /// Command for a platform, falling back to the built-in wrapper.
    pub fn platform_command(&self, platform: Platform) -> PlatformCommand {
        self.platforms
            .get(&platform)
            .cloned()
            .unwrap_or_else(|| PlatformCommand::default_for(platform))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigValidationError::EmptyCacheDir);
        }
        if self.runner.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidMaxAttempts(
                self.runner.max_attempts,
            ));
        }
        if self.runner.timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidTimeout(self.runner.timeout_secs));
        }
        if self.core_columns.iter().any(|c| c.trim().is_empty()) {
            return Err(ConfigValidationError::EmptyCoreColumn);
        }

        for (platform, command) in &self.platforms {
            if command.program.trim().is_empty() {
                return Err(ConfigValidationError::EmptyProgram(*platform));
            }
            for pattern in command
                .not_found_patterns
                .iter()
                .chain(&command.network_patterns)
            {
                if let Err(e) = regex::Regex::new(pattern) {
                    return Err(ConfigValidationError::InvalidPattern {
                        platform: *platform,
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_cache_age(), Duration::from_secs(604_800));
        assert_eq!(config.runner.max_attempts, 3);
        assert_eq!(config.platforms.len(), 3);
        assert_eq!(
            config.core_columns,
            vec!["indicator", "country_code", "period", "value"]
        );
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = HarnessConfig::from_toml("").unwrap();
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn test_partial_toml_merges_platforms() {
        let text = r#"
            max_cache_age_secs = 3600
            parallel_platforms = true

            [runner]
            max_attempts = 5

            [platforms.python]
            program = "python3"
            args = ["fetch.py", "{indicator}", "{output}"]
            not_found_exit_codes = [3]
        "#;
        let config = HarnessConfig::from_toml(text).unwrap();

        assert_eq!(config.max_cache_age_secs, 3600);
        assert!(config.parallel_platforms);
        assert_eq!(config.runner.max_attempts, 5);
        assert_eq!(config.runner.timeout_secs, 120);

        let python = config.platform_command(Platform::Python);
        assert_eq!(python.program, "python3");
        assert_eq!(python.not_found_exit_codes, vec![3]);
        assert!(!python.network_patterns.is_empty());

        assert_eq!(config.platform_command(Platform::R).program, "Rscript");
        assert_eq!(config.platform_command(Platform::Stata).program, "stata-mp");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_attempts = HarnessConfig::default().with_runner(RunnerConfig::default().with_max_attempts(0));
        assert_eq!(
            zero_attempts.validate(),
            Err(ConfigValidationError::InvalidMaxAttempts(0))
        );

        let zero_timeout = HarnessConfig::default().with_runner(RunnerConfig::default().with_timeout_secs(0));
        assert_eq!(zero_timeout.validate(), Err(ConfigValidationError::InvalidTimeout(0)));

        let blank_column = HarnessConfig::default().with_core_columns(["indicator", " "]);
        assert_eq!(blank_column.validate(), Err(ConfigValidationError::EmptyCoreColumn));

        let mut bad_pattern = PlatformCommand::new("Rscript");
        bad_pattern.network_patterns = vec!["(unclosed".into()];
        let config = HarnessConfig::default().with_platform_command(Platform::R, bad_pattern);
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidPattern { platform: Platform::R, .. })
        ));

        let empty_program = HarnessConfig::default().with_platform_command(Platform::Stata, PlatformCommand::new(""));
        assert_eq!(
            empty_program.validate(),
            Err(ConfigValidationError::EmptyProgram(Platform::Stata))
        );
    }

    #[test]
    fn test_from_toml_reports_validation_error() {
        let err = HarnessConfig::from_toml("[runner]\nmax_attempts = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_attempts"));

        let err = HarnessConfig::from_toml("max_cache_age_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, HarnessError::Configuration { .. }));
    }

    #[test]
    fn test_render_args_substitutes_placeholders() {
        let command = PlatformCommand::new("Rscript").with_args(["fetch.R", "--code={indicator}", "{output}"]);
        let args = command.render_args("CME_MRY0T4", Path::new("/tmp/out.csv"));
        assert_eq!(args, vec!["fetch.R", "--code=CME_MRY0T4", "/tmp/out.csv"]);
    }

    #[test]
    fn test_default_stata_command_shape() {
        let stata = PlatformCommand::default_for(Platform::Stata);
        assert_eq!(stata.args, vec!["-b", "do", "fetch_indicator.do", "{indicator}", "{output}"]);
        assert!(stata.network_patterns.iter().any(|p| p.contains("677")));
        assert_eq!(stata.log_file, Some(PathBuf::from("fetch_indicator.log")));
        assert_eq!(PlatformCommand::default_for(Platform::R).log_file, None);
    }

    #[test]
    fn test_log_path_resolves_against_working_dir() {
        let stata = PlatformCommand::default_for(Platform::Stata);
        assert_eq!(stata.log_path(), Some(PathBuf::from("fetch_indicator.log")));

        let stata = stata.with_working_dir("/opt/wrappers");
        assert_eq!(
            stata.log_path(),
            Some(PathBuf::from("/opt/wrappers/fetch_indicator.log"))
        );

        let absolute = stata.with_log_file("/var/log/stata.log");
        assert_eq!(absolute.log_path(), Some(PathBuf::from("/var/log/stata.log")));
        assert_eq!(PlatformCommand::new("Rscript").log_path(), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("crossval.toml");
        std::fs::write(&path, "cache_dir = \"/var/cache/crossval\"\n").unwrap();

        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/crossval"));

        let missing = HarnessConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, HarnessError::Io { .. }));
    }
}
