//! Import handling for generated source
//!
//! Splits top-level imports from the rest of a module, and keeps the
//! process-wide cache of import lines that already ran successfully.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, OnceLock};

/// Append-only set of import lines known to work in this process.
///
/// Created on first use and never cleared; every harness run sees the
/// imports of all earlier runs.
#[derive(Debug, Default)]
pub struct ImportCache {
    lines: Mutex<BTreeSet<String>>,
}

static IMPORT_CACHE: OnceLock<Arc<ImportCache>> = OnceLock::new();

/// The process-wide cache shared by every harness.
pub fn import_cache() -> Arc<ImportCache> {
    IMPORT_CACHE
        .get_or_init(|| Arc::new(ImportCache::default()))
        .clone()
}

impl ImportCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert if absent; returns true when the line was new.
    pub fn insert(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.insert(line.to_string())
    }

    pub fn extend<'a>(&self, lines: impl IntoIterator<Item = &'a String>) -> usize {
        lines.into_iter().filter(|l| self.insert(l)).count()
    }

    pub fn contains(&self, line: &str) -> bool {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.contains(line.trim())
    }

    /// Sorted copy of every cached line.
    pub fn snapshot(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Separate top-level import statements from the rest of the source.
///
/// Import lines are blanked in the body so line numbers in tracebacks still
/// match the original text. Parenthesized and backslash-continued imports
/// are kept whole.
pub fn split_imports(source: &str) -> (Vec<String>, String) {
    let mut imports = Vec::new();
    let mut body = Vec::new();
    let mut pending: Option<String> = None;
    let mut open_parens: i32 = 0;

    for line in source.lines() {
        if let Some(statement) = pending.as_mut() {
            statement.push('\n');
            statement.push_str(line);
            open_parens += paren_delta(line);
            body.push("");
            if open_parens <= 0 && !line.trim_end().ends_with('\\') {
                if let Some(done) = pending.take() {
                    imports.push(done);
                }
                open_parens = 0;
            }
            continue;
        }

        if is_import_line(line) {
            open_parens = paren_delta(line);
            body.push("");
            if open_parens > 0 || line.trim_end().ends_with('\\') {
                pending = Some(line.to_string());
            } else {
                imports.push(line.trim_end().to_string());
                open_parens = 0;
            }
            continue;
        }

        body.push(line);
    }

    // Unterminated statement: keep it so the interpreter reports the syntax error
    if let Some(unfinished) = pending {
        imports.push(unfinished);
    }

    (imports, body.join("\n"))
}

fn is_import_line(line: &str) -> bool {
    if line.starts_with(char::is_whitespace) {
        return false;
    }
    line.starts_with("import ") || (line.starts_with("from ") && line.contains(" import"))
}

fn paren_delta(line: &str) -> i32 {
    let code = line.split('#').next().unwrap_or(line);
    code.chars().fold(0, |depth, c| match c {
        '(' => depth + 1,
        ')' => depth - 1,
        _ => depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_imports_blanks_lines() {
        let source = "import os\nfrom typing import List\n\ndef f():\n    import json\n    return os.sep\n";
        let (imports, body) = split_imports(source);
        assert_eq!(imports, vec!["import os", "from typing import List"]);
        assert_eq!(body, "\n\n\ndef f():\n    import json\n    return os.sep");
        assert_eq!(body.lines().count(), source.lines().count());
    }

    #[test]
    fn test_split_imports_multiline_forms() {
        let source = "from collections import (\n    Counter,\n    OrderedDict,\n)\nimport numpy as np, \\\n    pandas as pd\nx = 1\n";
        let (imports, body) = split_imports(source);
        assert_eq!(imports.len(), 2);
        assert!(imports[0].ends_with(")"));
        assert!(imports[1].contains("pandas as pd"));
        assert_eq!(body.trim(), "x = 1");
    }

    #[test]
    fn test_from_without_import_is_code() {
        let (imports, body) = split_imports("from_value = 3\n");
        assert!(imports.is_empty());
        assert_eq!(body, "from_value = 3");
    }

    #[test]
    fn test_cache_is_insert_if_absent() {
        let cache = ImportCache::new();
        assert!(cache.insert("import os"));
        assert!(!cache.insert("import os  "));
        assert!(!cache.insert("   "));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("import os"));
    }

    #[test]
    fn test_cache_is_shared_across_threads() {
        let cache = Arc::new(ImportCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache.insert("import os");
                    cache.insert(&format!("import mod_{}", i % 4));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.snapshot()[0], "import mod_0");
    }

    #[test]
    fn test_global_cache_is_one_instance() {
        let a = import_cache();
        let b = import_cache();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
