//! Out-of-process execution of generated code
//!
//! Each harness run starts a fresh interpreter that loads the generated
//! module, calls the target and prints one JSON report line. A crash or hang
//! in generated code only takes down that child process.

use crate::target::RecordSet;
use crate::util::{run_command_with_input, truncate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Prefix of the single stdout line carrying the driver's report
pub const REPORT_MARKER: &str = "__SYNTHLOOP_REPORT__";

/// How one call argument is produced inside the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArgumentValue {
    /// The sample record set, rebuilt as a DataFrame
    RecordSet,
    /// A literal JSON value
    Literal(serde_json::Value),
    /// A source expression evaluated in the module namespace
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Argument {
    pub name: String,
    pub keyword: bool,
    #[serde(flatten)]
    pub value: ArgumentValue,
}

/// Everything the driver needs to load and call the target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverRequest {
    pub imports: Vec<String>,
    pub cached_imports: Vec<String>,
    pub body: String,
    pub filename: String,
    pub target: String,
    pub owner: String,
    pub arguments: Vec<Argument>,
    pub record_set: Option<RecordSet>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriverReport {
    Ok {
        result: serde_json::Value,
        #[serde(default)]
        context: BTreeMap<String, String>,
        #[serde(default)]
        imported: Vec<String>,
    },
    CallableNotFound {
        name: String,
        #[serde(default)]
        imported: Vec<String>,
    },
    Error {
        error: String,
        #[serde(default)]
        traceback: String,
        #[serde(default)]
        imported: Vec<String>,
    },
}

impl DriverReport {
    /// Import lines that executed without error, whatever the outcome.
    pub fn imported(&self) -> &[String] {
        match self {
            DriverReport::Ok { imported, .. }
            | DriverReport::CallableNotFound { imported, .. }
            | DriverReport::Error { imported, .. } => imported,
        }
    }
}

/// A disposable execution context for generated code.
pub trait Interpreter {
    /// Run one request. `Err` means the process itself failed to produce a report.
    fn run(&self, request: &DriverRequest) -> Result<DriverReport, String>;
}

#[derive(Debug, Clone)]
pub struct PythonInterpreter {
    pub program: String,
    pub cwd: PathBuf,
    pub timeout: Duration,
}

impl PythonInterpreter {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            cwd: cwd.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl Interpreter for PythonInterpreter {
    fn run(&self, request: &DriverRequest) -> Result<DriverReport, String> {
        let payload = serde_json::to_string(request)
            .map_err(|e| format!("Failed to encode driver request: {}", e))?;

        let mut command = Command::new(&self.program);
        command
            .current_dir(&self.cwd)
            .args(["-c", DRIVER_SOURCE])
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8");

        let result = run_command_with_input(&mut command, Some(&payload), self.timeout)?;
        if result.timed_out {
            return Err(format!(
                "Generated code did not finish within {}s",
                self.timeout.as_secs()
            ));
        }

        parse_report(&result.stdout).ok_or_else(|| {
            let code = result
                .status
                .and_then(|s| s.code())
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            format!(
                "Interpreter exited ({}) without a report:\n{}",
                code,
                truncate(result.stderr.trim(), 2000)
            )
        })
    }
}

/// Find the last report line in the driver's stdout.
pub fn parse_report(stdout: &str) -> Option<DriverReport> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(REPORT_MARKER))
        .and_then(|json| serde_json::from_str(json).ok())
}

/// Python program that loads and calls the generated module.
pub const DRIVER_SOURCE: &str = r#"
import builtins
import json
import math
import sys
import traceback
import types

MARKER = "__SYNTHLOOP_REPORT__"
SEEDED = ("import pandas as pd", "import numpy as np", "import logging")


def emit(report):
    sys.stdout.write("\n" + MARKER + json.dumps(report, default=repr, allow_nan=False) + "\n")
    sys.stdout.flush()


def finite(value):
    if isinstance(value, float) and not math.isfinite(value):
        return None
    if isinstance(value, dict):
        return {key: finite(item) for key, item in value.items()}
    if isinstance(value, (list, tuple)):
        return [finite(item) for item in value]
    return value


def jsonable(value):
    try:
        return json.loads(json.dumps(finite(value), allow_nan=False))
    except (TypeError, ValueError):
        pass
    to_dict = getattr(value, "to_dict", None)
    if callable(to_dict):
        try:
            converted = to_dict(orient="list") if hasattr(value, "columns") else to_dict()
            return json.loads(json.dumps(finite(converted), default=repr, allow_nan=False))
        except Exception:
            pass
    return repr(value)


def quiet_exec(line, namespace):
    try:
        exec(line, namespace)
    except Exception:
        pass


def main():
    payload = json.load(sys.stdin)
    namespace = {"__name__": "__synthloop__", "__builtins__": builtins}
    for line in SEEDED:
        quiet_exec(line, namespace)
    for line in payload["cached_imports"]:
        quiet_exec(line, namespace)

    imported = []
    try:
        for line in payload["imports"]:
            exec(line, namespace)
            imported.append(line)

        baseline = set(namespace)
        exec(compile(payload["body"], payload["filename"], "exec"), namespace)

        owner = payload["owner"]
        target = payload["target"]
        if owner:
            cls = namespace.get(owner)
            if not isinstance(cls, type):
                emit({"status": "callable_not_found", "name": owner, "imported": imported})
                return
            func = getattr(cls(), target, None)
        else:
            func = namespace.get(target)
        if not callable(func):
            emit({"status": "callable_not_found", "name": target, "imported": imported})
            return

        records = None
        if payload["record_set"] is not None:
            sample = payload["record_set"]
            pd = namespace.get("pd")
            if pd is not None:
                records = pd.DataFrame(sample["rows"], columns=sample["columns"])
            else:
                records = {c: [row[i] for row in sample["rows"]] for i, c in enumerate(sample["columns"])}

        args, kwargs = [], {}
        for arg in payload["arguments"]:
            kind = arg["kind"]
            if kind == "record_set":
                value = records
            elif kind == "literal":
                value = arg["value"]
            else:
                value = eval(arg["value"], namespace)
            if arg["keyword"]:
                kwargs[arg["name"]] = value
            else:
                args.append(value)

        result = func(*args, **kwargs)

        context = {}
        for name, value in namespace.items():
            if name in baseline or name.startswith("_"):
                continue
            if isinstance(value, types.ModuleType) or value is records:
                continue
            context[name] = repr(value)[:500]

        emit({"status": "ok", "result": jsonable(result), "context": context, "imported": imported})
    except BaseException as exc:
        emit({
            "status": "error",
            "error": "%s: %s" % (type(exc).__name__, exc),
            "traceback": traceback.format_exc(),
            "imported": imported,
        })


main()
"#;
