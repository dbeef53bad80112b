//! Test runner execution
//!
//! Runs the generated test module under pytest with coverage enabled and
//! hands the captured stdout back for coverage scraping.

use crate::runner::{run_command, CommandSpec};
use crate::target::TargetDescriptor;
use std::path::{Path, PathBuf};

/// Result of running tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Only stdout is consumed; the coverage table lives there
    pub stdout: String,
    pub duration_ms: u64,
}

impl TestRun {
    pub fn success(stdout: String, duration_ms: u64) -> Self {
        Self {
            passed: true,
            exit_code: Some(0),
            timed_out: false,
            stdout,
            duration_ms,
        }
    }

    pub fn failure(stdout: String, exit_code: Option<i32>, duration_ms: u64) -> Self {
        Self {
            passed: false,
            exit_code,
            timed_out: false,
            stdout,
            duration_ms,
        }
    }
}

/// External process that executes a generated test file with coverage.
pub trait TestRunner {
    fn run(&self, target: &TargetDescriptor) -> Result<TestRun, String>;
}

#[derive(Debug, Clone)]
pub struct PytestRunner {
    pub python: String,
    pub root: PathBuf,
    pub timeout_secs: u64,
}

impl PytestRunner {
    pub fn new(python: impl Into<String>, root: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            python: python.into(),
            root: root.as_ref().to_path_buf(),
            timeout_secs,
        }
    }

    /// Build the pytest invocation for a target
    pub fn command(&self, target: &TargetDescriptor) -> CommandSpec {
        let test_path = target.test_path();
        CommandSpec::new("pytest", &self.root, &self.python)
            .args(&["-m", "pytest"])
            .arg(test_path.display().to_string())
            .arg(format!("--cov={}", target.module))
            .arg("--cov-report=term-missing")
            .arg("--cov-fail-under=100")
            .timeout_secs(self.timeout_secs)
            .with_env_overrides(&[(
                "PYTHONPATH".to_string(),
                python_path(&self.root, target),
            )])
    }
}

/// Both the project root and the implementation's directory must be importable.
fn python_path(root: &Path, target: &TargetDescriptor) -> String {
    let mut entries = vec![root.display().to_string()];
    if let Some(parent) = target.implementation_path.parent() {
        let dir = root.join(parent);
        entries.push(dir.display().to_string());
    }
    if let Ok(existing) = std::env::var("PYTHONPATH") {
        if !existing.is_empty() {
            entries.push(existing);
        }
    }
    entries.join(":")
}

impl TestRunner for PytestRunner {
    fn run(&self, target: &TargetDescriptor) -> Result<TestRun, String> {
        let spec = self.command(target);
        let outcome = run_command(&spec);

        if let Some(note) = outcome.note {
            return Err(format!("Failed to run {}: {}", outcome.command, note));
        }

        Ok(TestRun {
            passed: outcome.success,
            exit_code: outcome.exit_code,
            timed_out: outcome.timed_out,
            stdout: outcome.stdout_tail,
            duration_ms: outcome.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pytest_command_flags() {
        let target = TargetDescriptor::new("summarize", "stats", "src/stats.py");
        let runner = PytestRunner::new("python3", "/proj", 30);
        let spec = runner.command(&target);

        assert_eq!(spec.program, "python3");
        assert_eq!(
            spec.args,
            vec![
                "-m",
                "pytest",
                "tests/test_stats.py",
                "--cov=stats",
                "--cov-report=term-missing",
                "--cov-fail-under=100",
            ]
        );
        assert!(spec
            .env
            .iter()
            .any(|(k, v)| k == "PYTHONPATH" && v.starts_with("/proj:/proj/src")));
    }

    #[test]
    fn test_missing_interpreter_is_an_error() {
        let target = TargetDescriptor::new("summarize", "stats", "src/stats.py");
        let runner = PytestRunner::new("definitely-not-python-xyz", ".", 5);
        assert!(runner.run(&target).is_err());
    }
}
