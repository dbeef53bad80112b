use std::path::PathBuf;
use thiserror::Error;

/// The model envelope carried no recognizable text field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Could not decode model response: {0}")]
pub struct DecodeError(pub String);

/// The decoded text could not be divided into implementation and tests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No tests found in model response")]
pub struct NoTestsFoundError;

/// Generated source never mentions the target's bare name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Generated code does not define `{name}`")]
pub struct StructuralMismatchError {
    pub name: String,
}

/// Normalization found symbols that no import resolves.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unresolved names in generated code: {}", symbols.join(", "))]
pub struct UnresolvedImportError {
    pub symbols: Vec<String>,
}

/// Tests passed but the target function is not fully covered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Coverage of `{function}` is {percentage}%, expected 100%")]
pub struct MissingCoverageError {
    pub function: String,
    pub percentage: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoverageParsingError {
    /// The runner produced no coverage data because nothing was collected.
    #[error("No tests ran; the generated test module is unusable")]
    NoTestsRan,

    #[error("No coverage row for {0} in runner output")]
    MissingRow(PathBuf),

    #[error("Function `{0}` not found in {1}")]
    FunctionNotFound(String, PathBuf),

    #[error("Cannot read {0}: {1}")]
    Unreadable(PathBuf, String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    #[error(transparent)]
    StructuralMismatch(#[from] StructuralMismatchError),

    #[error("Callable `{0}` not found after loading generated code")]
    CallableNotFound(String),

    #[error("Cannot synthesize an argument for parameter `{0}`")]
    UnresolvableArgument(String),

    /// Any failure while loading or invoking generated code.
    #[error("Execution failed: {message}")]
    Execution { message: String, source_text: String },
}

impl HarnessError {
    pub fn execution(message: impl Into<String>, source_text: &str) -> Self {
        HarnessError::Execution {
            message: message.into(),
            source_text: source_text.to_string(),
        }
    }
}

/// Everything that can end one synthesis iteration early.
#[derive(Error, Debug)]
pub enum IterationError {
    #[error("Model call failed: {0}")]
    Model(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    NoTests(#[from] NoTestsFoundError),

    #[error(transparent)]
    UnresolvedImport(#[from] UnresolvedImportError),

    #[error("Normalization failed: {0}")]
    Normalize(String),

    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error("Failed to persist generated files: {0}")]
    Persist(#[from] std::io::Error),

    #[error("Test runner failed: {0}")]
    Runner(String),

    #[error(transparent)]
    CoverageParsing(#[from] CoverageParsingError),

    #[error("Tests failed:\n{0}")]
    TestsFailed(String),

    #[error(transparent)]
    MissingCoverage(#[from] MissingCoverageError),
}

impl IterationError {
    /// Failures that mean the generated files are unusable and must be removed.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            IterationError::UnresolvedImport(_)
                | IterationError::Harness(HarnessError::StructuralMismatch(_))
                | IterationError::CoverageParsing(CoverageParsingError::NoTestsRan)
        )
    }
}
