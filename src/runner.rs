use crate::util::{run_command_with_timeout, tail_chars};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

const OUTPUT_TAIL_MAX_CHARS: usize = 16_000;

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, cwd: impl AsRef<Path>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout: Duration::from_secs(600),
            env: Vec::new(),
        }
    }

    pub fn args<S: AsRef<str>>(mut self, args: &[S]) -> Self {
        self.args = args.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_env_overrides(mut self, env: &[(String, String)]) -> Self {
        self.env.extend(env.iter().cloned());
        self
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub name: String,
    pub command: String,
    pub duration_ms: u64,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout_tail: String,
    pub stderr_tail: String,
    /// Set when the process could not be started at all
    pub note: Option<String>,
}

pub fn run_command(spec: &CommandSpec) -> CommandOutcome {
    let mut command = Command::new(&spec.program);
    command.current_dir(&spec.cwd).args(&spec.args);
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let start = Instant::now();
    let command_label = spec.label();

    match run_command_with_timeout(&mut command, spec.timeout) {
        Ok(result) => CommandOutcome {
            name: spec.name.clone(),
            command: command_label,
            duration_ms: start.elapsed().as_millis() as u64,
            success: result.success(),
            exit_code: result.status.and_then(|s| s.code()),
            timed_out: result.timed_out,
            stdout_tail: tail_chars(&result.stdout, OUTPUT_TAIL_MAX_CHARS),
            stderr_tail: tail_chars(&result.stderr, OUTPUT_TAIL_MAX_CHARS),
            note: None,
        },
        Err(error) => CommandOutcome {
            name: spec.name.clone(),
            command: command_label,
            duration_ms: start.elapsed().as_millis() as u64,
            success: false,
            exit_code: None,
            timed_out: false,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            note: Some(error),
        },
    }
}

pub fn run_commands(specs: &[CommandSpec]) -> Vec<CommandOutcome> {
    specs.iter().map(run_command).collect()
}
