//! Test-suite runner invoked after mutating tool rounds in build mode.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::tools::shell::run_shell;

const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Result of one test run.
#[derive(Clone, Debug, PartialEq)]
pub struct TestReport {
    pub passed: bool,
    /// Combined output, bounded in length.
    pub output: String,
}

/// Runs the project's tests.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self) -> TestReport;
}

/// Runs a configured shell command; exit code 0 counts as a pass.
pub struct CommandTestRunner {
    command: String,
    cwd: PathBuf,
    timeout: Duration,
}

impl CommandTestRunner {
    pub fn new(command: impl Into<String>, cwd: PathBuf) -> Self {
        Self {
            command: command.into(),
            cwd,
            timeout: DEFAULT_TEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self) -> TestReport {
        debug!(command = %self.command, "running tests");
        match run_shell(&self.command, &self.cwd, self.timeout).await {
            Ok(out) => TestReport {
                passed: out.success(),
                output: out.render(),
            },
            Err(e) => {
                warn!(command = %self.command, error = %e, "test command did not complete");
                TestReport {
                    passed: false,
                    output: e.to_string(),
                }
            }
        }
    }
}
