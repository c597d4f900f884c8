//! The seam between the harness and a platform's data-fetch command.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use super::classify::{FailureClassifier, FailureKind};
use crate::Result;
use crate::config::PlatformCommand;
use crate::error::HarnessError;
use crate::models::Platform;

/// Raw outcome of one fetch attempt, before CSV parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Delimited table as written by the command
    Table(Vec<u8>),
    NotFound(String),
    Network(String),
    Failed(String),
}

/// Produces a dataset for one indicator.
///
/// Implementations report every failure through [`FetchOutcome`]; there is
/// no error path.
#[async_trait]
pub trait DataFetcher: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, indicator_code: &str) -> FetchOutcome;
}

/// Fetches by running an external program that writes a CSV file.
///
/// The program receives the indicator code and an output path through the
/// `{indicator}` and `{output}` placeholders. It is killed when it exceeds
/// the timeout.
#[derive(Debug)]
pub struct CommandFetcher {
    platform: Platform,
    command: PlatformCommand,
    classifier: FailureClassifier,
    timeout: Duration,
    scratch_dir: PathBuf,
}

impl CommandFetcher {
    /// Creates a fetcher for one platform.
    ///
    /// # Errors
    /// Returns `HarnessError::Configuration` when a signal pattern does not
    /// compile.
    pub fn new(
        platform: Platform,
        command: PlatformCommand,
        timeout: Duration,
        scratch_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let classifier = FailureClassifier::from_command(&command)?;
        Ok(Self {
            platform,
            command,
            classifier,
            timeout,
            scratch_dir: scratch_dir.into(),
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    async fn run(&self, indicator_code: &str) -> Result<FetchOutcome> {
        tokio::fs::create_dir_all(&self.scratch_dir).await.map_err(|e| {
            HarnessError::io(
                format!("Failed to create scratch dir {}", self.scratch_dir.display()),
                e,
            )
        })?;

        let output_path = self.scratch_dir.join(format!(
            "{}-{}-{}.csv",
            self.platform.as_str(),
            sanitize(indicator_code),
            uuid::Uuid::new_v4()
        ));
        let args = self.command.render_args(indicator_code, &output_path);
        let log_path = self.command.log_path();
        if let Some(log) = &log_path {
            remove_quietly(log).await;
        }

        let mut command = tokio::process::Command::new(&self.command.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.command.working_dir {
            command.current_dir(dir);
        }

        tracing::debug!(
            "Running {} {} for {}",
            self.command.program,
            args.join(" "),
            indicator_code
        );

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Ok(FetchOutcome::Failed(format!(
                    "failed to start '{}': {}",
                    self.command.program, e
                )));
            }
            Err(_) => {
                remove_quietly(&output_path).await;
                if let Some(log) = &log_path {
                    remove_quietly(log).await;
                }
                return Ok(FetchOutcome::Network(format!(
                    "timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let table = match tokio::fs::read(&output_path).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                remove_quietly(&output_path).await;
                return Ok(FetchOutcome::Failed(format!(
                    "failed to read output {}: {}",
                    output_path.display(),
                    e
                )));
            }
        };
        remove_quietly(&output_path).await;
        let log_text = match &log_path {
            Some(log) => take_log(log).await,
            None => String::new(),
        };

        if output.status.success()
            && let Some(bytes) = table
            && !bytes.is_empty()
        {
            return Ok(FetchOutcome::Table(bytes));
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if !log_text.is_empty() {
            text.push('\n');
            text.push_str(&log_text);
        }
        let detail = describe_failure(output.status.code(), &text);

        Ok(match self.classifier.classify(output.status.code(), &text) {
            FailureKind::NotFound => FetchOutcome::NotFound(detail),
            FailureKind::Network => FetchOutcome::Network(detail),
            FailureKind::Other => FetchOutcome::Failed(detail),
        })
    }
}

#[async_trait]
impl DataFetcher for CommandFetcher {
    async fn fetch(&self, indicator_code: &str) -> FetchOutcome {
        match self.run(indicator_code).await {
            Ok(outcome) => outcome,
            Err(e) => FetchOutcome::Failed(e.to_string()),
        }
    }
}

/// Exit status plus the last non-empty output line.
fn describe_failure(exit_code: Option<i32>, text: &str) -> String {
    let status = match exit_code {
        Some(0) => "exited 0 without writing output".to_string(),
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    };
    match text.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) => format!("{}: {}", status, line),
        None => status,
    }
}

fn sanitize(indicator_code: &str) -> String {
    indicator_code
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Reads and removes a command's log file; a missing log reads as empty.
async fn take_log(path: &std::path::Path) -> String {
    let text = match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!("Could not read log {}: {}", path.display(), e);
            }
            String::new()
        }
    };
    remove_quietly(path).await;
    text
}

async fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!("Could not remove {}: {}", path.display(), e);
    }
}
