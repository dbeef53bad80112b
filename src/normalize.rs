//! Source normalization
//!
//! Generated source goes through external formatters and import fixers
//! before it is executed. Only the contract lives here; the work is done by
//! whatever commands are configured.

use crate::error::{IterationError, UnresolvedImportError};
use crate::runner::{run_command, CommandSpec};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

pub const DEFAULT_NORMALIZER_COMMANDS: &[&str] = &["ruff check --fix --quiet", "ruff format --quiet"];
pub const DEFAULT_UNDEFINED_NAME_CHECK: &str = "ruff check --select F821 --output-format concise";

const NORMALIZE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    pub modified: bool,
}

/// Produces lint-clean, import-resolved source text.
pub trait SourceNormalizer {
    fn normalize(&self, source: &str) -> Result<Normalized, IterationError>;
}

/// Leaves source untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughNormalizer;

impl SourceNormalizer for PassthroughNormalizer {
    fn normalize(&self, source: &str) -> Result<Normalized, IterationError> {
        Ok(Normalized {
            text: source.to_string(),
            modified: false,
        })
    }
}

/// Runs a pipeline of commands over a temporary copy of the source.
///
/// Each command line is split on whitespace and gets the temporary file path
/// appended. Non-zero exits are tolerated since linters use them to report
/// findings; a command that cannot start or times out fails normalization.
#[derive(Debug, Clone)]
pub struct CommandNormalizer {
    commands: Vec<String>,
    undefined_name_check: Option<String>,
    timeout_secs: u64,
}

impl Default for CommandNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_NORMALIZER_COMMANDS.iter().map(|c| c.to_string()).collect())
    }
}

impl CommandNormalizer {
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            commands,
            undefined_name_check: Some(DEFAULT_UNDEFINED_NAME_CHECK.to_string()),
            timeout_secs: NORMALIZE_TIMEOUT_SECS,
        }
    }

    pub fn with_undefined_name_check(mut self, check: Option<String>) -> Self {
        self.undefined_name_check = check;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn spec(&self, command_line: &str, file: &Path) -> Option<CommandSpec> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        let args: Vec<&str> = parts.collect();
        let cwd = file.parent().unwrap_or_else(|| Path::new("."));
        Some(
            CommandSpec::new("normalize", cwd, program)
                .args(args.as_slice())
                .arg(file.display().to_string())
                .timeout_secs(self.timeout_secs),
        )
    }

    fn run_one(&self, command_line: &str, file: &Path) -> Result<String, IterationError> {
        let Some(spec) = self.spec(command_line, file) else {
            return Ok(String::new());
        };
        let outcome = run_command(&spec);
        if let Some(note) = outcome.note {
            return Err(IterationError::Normalize(format!(
                "{}: {}",
                outcome.command, note
            )));
        }
        if outcome.timed_out {
            return Err(IterationError::Normalize(format!(
                "{} timed out after {}s",
                outcome.command, self.timeout_secs
            )));
        }
        if !outcome.success {
            tracing::debug!(
                command = %outcome.command,
                exit_code = ?outcome.exit_code,
                "normalizer command reported findings"
            );
        }
        Ok(outcome.stdout_tail)
    }
}

impl SourceNormalizer for CommandNormalizer {
    fn normalize(&self, source: &str) -> Result<Normalized, IterationError> {
        let mut file = tempfile::Builder::new()
            .prefix("synthloop_")
            .suffix(".py")
            .tempfile()?;
        file.write_all(source.as_bytes())?;
        file.flush()?;
        let path = file.path().to_path_buf();

        for command_line in &self.commands {
            self.run_one(command_line, &path)?;
        }

        let text = fs::read_to_string(&path)?;

        if let Some(check) = &self.undefined_name_check {
            let report = self.run_one(check, &path)?;
            let symbols = undefined_names(&report);
            if !symbols.is_empty() {
                return Err(UnresolvedImportError { symbols }.into());
            }
        }

        Ok(Normalized {
            modified: text != source,
            text,
        })
    }
}

/// Undefined names from a concise lint report, first occurrence order.
pub fn undefined_names(report: &str) -> Vec<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = RE
        .get_or_init(|| Regex::new(r"F821 [Uu]ndefined name `([^`]+)`").ok())
        .as_ref()
    else {
        return Vec::new();
    };

    let mut names: Vec<String> = Vec::new();
    for caps in re.captures_iter(report) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
