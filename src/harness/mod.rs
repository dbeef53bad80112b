//! Execution harness
//!
//! Loads normalized generated source into a fresh interpreter, resolves the
//! target callable, synthesizes its arguments from the descriptor and calls
//! it. Callers only see success or a typed failure; parse errors and runtime
//! errors in generated code both surface as `HarnessError::Execution`.

pub mod driver;
pub mod imports;

use crate::error::{HarnessError, StructuralMismatchError};
use crate::target::{Parameter, RecordSet, TargetDescriptor};
use driver::{Argument, ArgumentValue, DriverReport, DriverRequest, Interpreter};
use imports::{import_cache, split_imports, ImportCache};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use driver::PythonInterpreter;

/// Parameter names that conventionally receive the sample record set
const RECORD_SET_NAMES: &[&str] = &["df", "data", "dataframe", "frame", "records", "table"];

/// What a successful invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub result: serde_json::Value,
    /// Module-level bindings the generated code introduced, rendered with `repr`
    pub context: BTreeMap<String, String>,
}

pub struct Harness<I> {
    interpreter: I,
    cache: Arc<ImportCache>,
}

impl<I: Interpreter> Harness<I> {
    /// Harness sharing the process-wide import cache.
    pub fn new(interpreter: I) -> Self {
        Self {
            interpreter,
            cache: import_cache(),
        }
    }

    pub fn with_cache(interpreter: I, cache: Arc<ImportCache>) -> Self {
        Self { interpreter, cache }
    }

    pub fn cache(&self) -> &ImportCache {
        &self.cache
    }

    pub fn execute(
        &self,
        source: &str,
        target: &TargetDescriptor,
        sample: Option<&RecordSet>,
    ) -> Result<Execution, HarnessError> {
        precheck(source, target)?;
        let arguments = synthesize_arguments(&target.parameters, sample)?;
        let (imports, body) = split_imports(source);

        let request = DriverRequest {
            imports,
            cached_imports: self.cache.snapshot(),
            body,
            filename: target.implementation_path.display().to_string(),
            target: target.bare_name().to_string(),
            owner: target.owner.clone(),
            arguments,
            record_set: sample.cloned(),
        };

        let report = self
            .interpreter
            .run(&request)
            .map_err(|e| HarnessError::execution(e, source))?;

        let added = self.cache.extend(report.imported());
        if added > 0 {
            tracing::debug!(added, total = self.cache.len(), "cached imports");
        }

        match report {
            DriverReport::Ok {
                result, context, ..
            } => Ok(Execution { result, context }),
            DriverReport::CallableNotFound { name, .. } => {
                Err(HarnessError::CallableNotFound(name))
            }
            DriverReport::Error {
                error, traceback, ..
            } => {
                let message = if traceback.trim().is_empty() {
                    error
                } else {
                    format!("{}\n{}", error, traceback.trim_end())
                };
                Err(HarnessError::execution(message, source))
            }
        }
    }
}

/// Cheap structural check before anything runs.
pub fn precheck(source: &str, target: &TargetDescriptor) -> Result<(), StructuralMismatchError> {
    let name = target.bare_name();
    if name.is_empty() || !source.contains(name) {
        return Err(StructuralMismatchError {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Decide a value for every declared parameter.
///
/// Record-set parameters get the sample, `str` parameters get its first
/// column name, everything else falls back to its declared default.
pub fn synthesize_arguments(
    parameters: &[Parameter],
    sample: Option<&RecordSet>,
) -> Result<Vec<Argument>, HarnessError> {
    let mut arguments = Vec::new();
    let mut keyword = false;

    for param in parameters {
        if param.is_implicit() {
            // Everything after `*` or `*args` must be passed by keyword
            if param.name.starts_with('*') && !param.name.starts_with("**") {
                keyword = true;
            }
            continue;
        }

        let value = if let (true, Some(_)) = (wants_record_set(param), sample) {
            ArgumentValue::RecordSet
        } else if let (true, Some(column)) = (is_str(param), sample.and_then(RecordSet::first_column)) {
            ArgumentValue::Literal(serde_json::Value::String(column.to_string()))
        } else if let Some(default) = &param.default {
            ArgumentValue::Expression(default.clone())
        } else {
            return Err(HarnessError::UnresolvableArgument(param.name.clone()));
        };

        arguments.push(Argument {
            name: param.name.clone(),
            keyword,
            value,
        });
    }

    Ok(arguments)
}

fn wants_record_set(param: &Parameter) -> bool {
    let by_name = RECORD_SET_NAMES.contains(&param.name.to_lowercase().as_str());
    let by_type = param
        .annotation
        .as_deref()
        .is_some_and(|a| a.contains("DataFrame") || a.contains("RecordSet"));
    by_name || by_type
}

fn is_str(param: &Parameter) -> bool {
    matches!(
        param.annotation.as_deref().map(str::trim),
        Some("str") | Some("Optional[str]") | Some("str | None")
    )
}
