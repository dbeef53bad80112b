use crate::coverage::CoverageReport;
use crate::target::TargetDescriptor;

pub const SYNTHESIS_SYSTEM: &str = r#"You are a senior Python developer writing a single function and its pytest suite.

OUTPUT FORMAT:
- First a ```python block with the implementation module (imports at the top)
- Then a ```python block with the tests, starting with `import pytest`
- No prose between or after the blocks

RULES:
- Keep the exact function name and signature you are given
- Import everything you use; do not rely on names being predefined
- Tests must import the function from its module and exercise EVERY line of it
- Cover edge cases: empty inputs, missing columns, error branches
- Do not mock the function under test"#;

pub const SAMPLE_SYSTEM: &str = r#"You produce small, realistic sample datasets for exercising Python functions.

Reply with ONE JSON object and nothing else:
{"columns": ["col_a", "col_b"], "rows": [[1, "x"], [2, null]]}

- 3 to 8 rows
- Every row has exactly one value per column
- Include at least one null and one edge value"#;

const COVERAGE_FEEDBACK_HEADER: &str = "Your tests pass, but they do not execute every line of the function.";
const ERROR_FEEDBACK_HEADER: &str = "Your previous answer failed.";

/// Describe the target so the model keeps its name and signature.
pub fn format_target_section(target: &TargetDescriptor) -> String {
    let mut section = format!(
        "Module: {}\nFile: {}\nSignature: {}",
        target.module,
        target.implementation_path.display(),
        target.signature()
    );
    if target.is_method() {
        section.push_str(&format!(
            "\nThe function is a method of class `{}`, which must be constructible with no arguments.",
            target.owner
        ));
    }
    if !target.docstring.trim().is_empty() {
        section.push_str(&format!("\nDocstring:\n{}", target.docstring.trim()));
    }
    section
}

/// Clarification after a run whose only problem was incomplete coverage.
pub fn coverage_clarification(
    target: &TargetDescriptor,
    report: &CoverageReport,
    implementation: &str,
    tests: &str,
) -> String {
    let mut uncovered = String::new();
    for ((start, end), text) in &report.uncovered {
        let label = if start == end {
            format!("Line {}", start)
        } else {
            format!("Lines {}-{}", start, end)
        };
        uncovered.push_str(&format!("{}:\n```python\n{}\n```\n", label, text));
    }

    format!(
        "{}\n\n{}\n\nCoverage of `{}`: {}%\n\nUncovered code:\n{}\nPrevious implementation:\n```python\n{}\n```\n\nPrevious tests:\n```python\n{}\n```\n\nAdd tests that execute the uncovered lines. Return the full implementation and the full test module again.",
        COVERAGE_FEEDBACK_HEADER,
        format_target_section(target),
        target.bare_name(),
        report.percentage,
        uncovered,
        implementation,
        tests
    )
}

/// Clarification after any other failure: the raw error plus the previous implementation.
pub fn error_clarification(target: &TargetDescriptor, error: &str, implementation: &str) -> String {
    format!(
        "{}\n\n{}\n\nError:\n```\n{}\n```\n\nPrevious implementation:\n```python\n{}\n```\n\nFix the problem. Return the full implementation and the full test module again.",
        ERROR_FEEDBACK_HEADER,
        format_target_section(target),
        error.trim(),
        implementation
    )
}

/// Ask for a record set the target can be called with.
pub fn sample_request(target: &TargetDescriptor) -> String {
    format!(
        "{}\n\nProduce a sample dataset this function can be called with.",
        format_target_section(target)
    )
}
