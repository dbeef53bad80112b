//! Response splitting
//!
//! Divides decoded model text into an implementation segment and a test
//! segment. Response shapes are recognized by an ordered chain of
//! strategies; the first one that matches decides the split.

use crate::error::NoTestsFoundError;
use regex::Regex;
use std::sync::OnceLock;

/// Finds where the test segment begins in the working text.
pub trait SplitStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Byte offset of the first line that starts the test segment.
    fn find(&self, text: &str) -> Option<usize>;
}

/// Split at the first line matching a regex.
pub struct LineMarker {
    name: String,
    pattern: Regex,
}

impl LineMarker {
    pub fn new(name: impl Into<String>, pattern: Regex) -> Self {
        Self {
            name: name.into(),
            pattern,
        }
    }
}

impl SplitStrategy for LineMarker {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, text: &str) -> Option<usize> {
        self.pattern.find(text).map(|m| m.start())
    }
}

fn builtin_strategies(module: Option<&str>) -> Vec<Box<dyn SplitStrategy>> {
    let mut strategies: Vec<Box<dyn SplitStrategy>> = Vec::new();
    strategies.push(Box::new(LineMarker::new(
        "explicit-marker",
        compile(r"(?im)^[ \t]*#+[ \t]*(start of tests|tests?|test cases)[ \t:]*$"),
    )));
    strategies.push(Box::new(LineMarker::new(
        "test-framework-import",
        compile(r"(?m)^(import pytest|from pytest import|import unittest|from unittest import)\b"),
    )));
    if let Some(module) = module.filter(|m| !m.is_empty()) {
        let escaped = regex::escape(module);
        strategies.push(Box::new(LineMarker::new(
            "target-module-import",
            compile(&format!(r"(?m)^from (src\.)?{} import\b", escaped)),
        )));
    }
    strategies.push(Box::new(LineMarker::new(
        "first-test-function",
        compile(r"(?m)^def test_\w*\s*\("),
    )));
    strategies
}

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        // Patterns are either literals above or built from an escaped module name
        Err(e) => unreachable!("invalid split pattern {}: {}", pattern, e),
    }
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| compile(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```"))
}

fn class_header_regex() -> &'static Regex {
    static CLASS: OnceLock<Regex> = OnceLock::new();
    CLASS.get_or_init(|| compile(r"(?m)^[ \t]*class\s+\w+"))
}

pub struct Splitter {
    strategies: Vec<Box<dyn SplitStrategy>>,
}

impl Default for Splitter {
    fn default() -> Self {
        Self {
            strategies: builtin_strategies(None),
        }
    }
}

impl Splitter {
    /// Built-in chain, also recognizing test imports of `module`.
    pub fn for_module(module: &str) -> Self {
        Self {
            strategies: builtin_strategies(Some(module)),
        }
    }

    /// Give a new response shape priority over the built-ins.
    pub fn with_strategy(mut self, strategy: Box<dyn SplitStrategy>) -> Self {
        self.strategies.insert(0, strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Split decoded text into `(implementation, tests)`.
    pub fn split(&self, text: &str) -> Result<(String, String), NoTestsFoundError> {
        let working = working_text(text);

        for strategy in &self.strategies {
            let Some(offset) = strategy.find(&working) else {
                continue;
            };
            if offset > working.len() || !working.is_char_boundary(offset) {
                continue;
            }
            let (implementation, tests) = working.split_at(offset);
            let tests = tests.trim();
            if !has_code(tests) {
                continue;
            }
            tracing::debug!(strategy = strategy.name(), "split model response");
            return Ok((implementation.trim().to_string(), tests.to_string()));
        }

        // One block holding both; the class carries its own tests
        if class_header_regex().is_match(&working) {
            let whole = working.trim().to_string();
            if !whole.is_empty() {
                return Ok((whole.clone(), whole));
            }
        }

        Err(NoTestsFoundError)
    }
}

/// Concatenated fenced block contents, or the whole text when there are none.
fn working_text(text: &str) -> String {
    let blocks: Vec<&str> = fence_regex()
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if blocks.is_empty() {
        text.to_string()
    } else {
        blocks.join("\n")
    }
}

/// A bare marker comment does not count as a test segment.
fn has_code(segment: &str) -> bool {
    segment
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Split with the default strategy chain.
pub fn split(text: &str) -> Result<(String, String), NoTestsFoundError> {
    Splitter::default().split(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_pytest_import_inside_fences() {
        let text = "Here you go:\n```python\ndef add(a, b):\n    return a + b\n```\n\nAnd tests:\n```python\nimport pytest\n\ndef test_add():\n    assert add(1, 2) == 3\n```\n";
        let (implementation, tests) = split(text).unwrap();
        assert_eq!(implementation, "def add(a, b):\n    return a + b");
        assert!(tests.starts_with("import pytest"));
        assert!(tests.contains("def test_add"));
    }

    #[test]
    fn test_explicit_marker_has_priority() {
        let text = "import pytest\ndef f():\n    return 1\n# START OF TESTS\ndef test_f():\n    assert f() == 1\n";
        let (implementation, tests) = split(text).unwrap();
        assert!(implementation.contains("import pytest"));
        assert!(tests.starts_with("# START OF TESTS"));
    }

    #[test]
    fn test_module_import_strategy() {
        let text = "def f():\n    return 1\n\nfrom src.mod import f\n\ndef check():\n    assert f()\n";
        assert!(split(text).is_err());
        let (implementation, tests) = Splitter::for_module("mod").split(text).unwrap();
        assert_eq!(implementation, "def f():\n    return 1");
        assert!(tests.starts_with("from src.mod import f"));
    }

    #[test]
    fn test_first_test_function_fallback() {
        let text = "def f():\n    return 1\n\ndef test_f():\n    assert f() == 1\n";
        let (implementation, tests) = split(text).unwrap();
        assert_eq!(implementation, "def f():\n    return 1");
        assert!(tests.starts_with("def test_f"));
    }

    #[test]
    fn test_class_block_is_both() {
        let text = "class Cleaner:\n    def run(self):\n        return 1\n";
        let (implementation, tests) = split(text).unwrap();
        assert_eq!(implementation, tests);
    }

    #[test]
    fn test_no_tests_is_typed_error() {
        assert_eq!(split("def f():\n    return 1\n"), Err(NoTestsFoundError));
        assert_eq!(split(""), Err(NoTestsFoundError));
        assert_eq!(split("```\n```"), Err(NoTestsFoundError));
    }

    #[test]
    fn test_marker_at_end_is_skipped() {
        // A marker with nothing after it cannot produce tests
        let text = "def f():\n    return 1\n# Tests\n";
        assert_eq!(split(text), Err(NoTestsFoundError));
    }

    #[test]
    fn test_split_is_total_over_odd_inputs() {
        let inputs = [
            "```",
            "```python\n",
            "日本語\n# tests\nassert True",
            "\u{0}\u{1}",
            "import pytest",
        ];
        for input in inputs {
            match split(input) {
                Ok((_, tests)) => assert!(!tests.is_empty()),
                Err(NoTestsFoundError) => {}
            }
        }
    }

    struct AlwaysAt(usize);

    impl SplitStrategy for AlwaysAt {
        fn name(&self) -> &str {
            "always"
        }
        fn find(&self, _text: &str) -> Option<usize> {
            Some(self.0)
        }
    }

    #[test]
    fn test_custom_strategy_goes_first() {
        let splitter = Splitter::default().with_strategy(Box::new(AlwaysAt(3)));
        assert_eq!(splitter.strategy_names()[0], "always");
        let (implementation, tests) = splitter.split("abcdef").unwrap();
        assert_eq!(implementation, "abc");
        assert_eq!(tests, "def");

        // Out-of-range offsets are ignored rather than panicking
        let bad = Splitter::default().with_strategy(Box::new(AlwaysAt(999)));
        assert_eq!(bad.split("abc"), Err(NoTestsFoundError));
    }
}
