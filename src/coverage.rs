//! Coverage-gap extraction
//!
//! Scrapes the pytest-cov `term-missing` table, narrows the missing lines to
//! the target function and reads back the uncovered source so it can be
//! shown to the model verbatim.

use crate::error::CoverageParsingError;
use crate::util::indentation;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Output fragments meaning the runner collected nothing.
const NO_TESTS_PATTERN: &str =
    r"no tests ran|collected 0 items|No data to report|errors? during collection";

/// Function-scoped coverage for one test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageReport {
    /// Truncated integer percentage, scoped to the target function
    pub percentage: u32,
    /// Inclusive (start, end) line ranges mapped to their literal source
    pub uncovered: BTreeMap<(usize, usize), String>,
    pub tests_failed: bool,
    pub raw_output: String,
}

impl CoverageReport {
    pub fn is_complete(&self) -> bool {
        self.percentage == 100 && self.uncovered.is_empty()
    }
}

/// A row of the coverage table for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageRow {
    pub percentage: u32,
    pub missing: Vec<(usize, usize)>,
}

/// Read the target file and extract a function-scoped report.
pub fn extract(
    raw_output: &str,
    source_file: &Path,
    function: &str,
) -> Result<CoverageReport, CoverageParsingError> {
    let source = fs::read_to_string(source_file).map_err(|e| {
        CoverageParsingError::Unreadable(source_file.to_path_buf(), e.to_string())
    })?;
    extract_from_source(raw_output, source_file, &source, function, None)
}

/// Extract a report from runner output and the target's source text.
///
/// `owner` restricts the function lookup to one class body.
pub fn extract_from_source(
    raw_output: &str,
    source_file: &Path,
    source: &str,
    function: &str,
    owner: Option<&str>,
) -> Result<CoverageReport, CoverageParsingError> {
    if no_tests_ran(raw_output) {
        return Err(CoverageParsingError::NoTestsRan);
    }

    let row = find_row(raw_output, source_file)
        .ok_or_else(|| CoverageParsingError::MissingRow(source_file.to_path_buf()))?;

    let (bounds_start, bounds_end) = function_bounds(source, function, owner).ok_or_else(|| {
        CoverageParsingError::FunctionNotFound(function.to_string(), source_file.to_path_buf())
    })?;

    let lines: Vec<&str> = source.lines().collect();
    let mut uncovered = BTreeMap::new();
    let mut missing_lines = BTreeSet::new();
    for (start, end) in clip_ranges(&row.missing, (bounds_start, bounds_end)) {
        let text = lines[start - 1..end.min(lines.len())].join("\n");
        missing_lines.extend(start..=end);
        uncovered.insert((start, end), text);
    }

    let instrumented = lines[bounds_start - 1..bounds_end.min(lines.len())]
        .iter()
        .filter(|line| is_code_line(line))
        .count();

    Ok(CoverageReport {
        percentage: scoped_percentage(instrumented, missing_lines.len()),
        uncovered,
        tests_failed: tests_failed(raw_output),
        raw_output: raw_output.to_string(),
    })
}

/// `1 - missing / instrumented`, truncated; an uninstrumented body counts as covered.
fn scoped_percentage(instrumented: usize, missing: usize) -> u32 {
    if instrumented == 0 {
        return 100;
    }
    let covered = instrumented.saturating_sub(missing);
    (covered * 100 / instrumented) as u32
}

/// Locate the coverage-table row for `source_file`.
///
/// Exact and path-suffix matches win over a bare file-name match.
pub fn find_row(raw_output: &str, source_file: &Path) -> Option<CoverageRow> {
    let wanted = normalize_path(&source_file.to_string_lossy());
    let wanted_name = source_file.file_name().map(|n| n.to_string_lossy().to_string());

    let mut name_match = None;
    for line in raw_output.lines() {
        let mut tokens = line.split_whitespace();
        let Some(name) = tokens.next() else {
            continue;
        };
        let name = normalize_path(name);
        if name == "TOTAL" || name == "Name" {
            continue;
        }

        let path_match = name == wanted
            || wanted.ends_with(&format!("/{}", name))
            || name.ends_with(&format!("/{}", wanted));
        let file_name_match = wanted_name.as_deref().is_some_and(|w| {
            Path::new(&name)
                .file_name()
                .is_some_and(|n| n.to_string_lossy() == w)
        });
        if !path_match && !file_name_match {
            continue;
        }

        let Some(row) = parse_row(line) else {
            continue;
        };
        if path_match {
            return Some(row);
        }
        if name_match.is_none() {
            name_match = Some(row);
        }
    }
    name_match
}

fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.strip_prefix("./").unwrap_or(&path).to_string()
}

/// Parse `name stmts miss [branch brpart] cover missing...`.
fn parse_row(line: &str) -> Option<CoverageRow> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let cover_idx = tokens.iter().position(|t| t.ends_with('%'))?;
    let percentage = parse_percentage(tokens[cover_idx])?;
    let missing_field = tokens[cover_idx + 1..].join(" ");
    Some(CoverageRow {
        percentage,
        missing: parse_missing(&missing_field),
    })
}

fn parse_percentage(token: &str) -> Option<u32> {
    let number = token.trim_end_matches('%');
    if let Ok(whole) = number.parse::<u32>() {
        return Some(whole);
    }
    number
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p >= 0.0)
        .map(|p| p.trunc() as u32)
}

/// Parse `3, 7-9, 12->14` into closed ranges; branch arcs are ignored.
pub fn parse_missing(field: &str) -> Vec<(usize, usize)> {
    field
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && !part.contains("->"))
        .filter_map(|part| match part.split_once('-') {
            Some((a, b)) => {
                let a = a.trim().parse::<usize>().ok()?;
                let b = b.trim().parse::<usize>().ok()?;
                Some((a.min(b), a.max(b)))
            }
            None => part.parse::<usize>().ok().map(|n| (n, n)),
        })
        .filter(|(start, _)| *start > 0)
        .collect()
}

/// Intersect each range with `bounds`, dropping ranges that fall outside.
pub fn clip_ranges(ranges: &[(usize, usize)], bounds: (usize, usize)) -> Vec<(usize, usize)> {
    let (lo, hi) = bounds;
    ranges
        .iter()
        .filter_map(|&(start, end)| {
            let start = start.max(lo);
            let end = end.min(hi);
            (start <= end).then_some((start, end))
        })
        .collect()
}

fn def_regex(function: &str) -> Regex {
    let pattern = format!(
        r"^[ \t]*(async[ \t]+)?def[ \t]+{}[ \t]*\(",
        regex::escape(function)
    );
    match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => unreachable!("escaped def pattern failed to compile: {}", e),
    }
}

fn no_tests_ran(raw_output: &str) -> bool {
    static NO_TESTS: OnceLock<Regex> = OnceLock::new();
    let re = NO_TESTS.get_or_init(|| match Regex::new(NO_TESTS_PATTERN) {
        Ok(re) => re,
        Err(e) => unreachable!("invalid no-tests pattern: {}", e),
    });
    re.is_match(raw_output)
}

fn tests_failed(raw_output: &str) -> bool {
    static FAILED: OnceLock<Regex> = OnceLock::new();
    let re = FAILED.get_or_init(|| match Regex::new(r"\b([1-9]\d*) (failed|errors?)\b") {
        Ok(re) => re,
        Err(e) => unreachable!("invalid failure pattern: {}", e),
    });
    re.is_match(raw_output)
}

fn is_code_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

/// 1-based inclusive line bounds of `function`'s definition.
///
/// The body ends at the last code line before the first later line indented
/// at or below the header. Multi-line signatures and triple-quoted strings
/// are skipped over. Without an owner a module-level `def` wins over a
/// same-named method.
pub fn function_bounds(source: &str, function: &str, owner: Option<&str>) -> Option<(usize, usize)> {
    let lines: Vec<&str> = source.lines().collect();
    let header = def_regex(function);
    let is_header = |i: &usize| header.is_match(lines[*i]);

    let start = match owner.filter(|o| !o.is_empty()) {
        Some(owner) => {
            let (scan_from, scan_to) = class_span(&lines, owner).unwrap_or((0, lines.len()));
            (scan_from..scan_to).find(is_header)?
        }
        None => (0..lines.len())
            .filter(is_header)
            .find(|&i| indentation(lines[i]) == 0)
            .or_else(|| (0..lines.len()).find(is_header))?,
    };
    let header_indent = indentation(lines[start]);
    let signature_end = signature_end(&lines, start);

    let mut end = signature_end;
    let mut in_string: Option<&str> = None;
    for (i, line) in lines.iter().enumerate().skip(signature_end + 1) {
        if in_string.is_none() && is_code_line(line) && indentation(line) <= header_indent {
            break;
        }
        if in_string.is_some() || is_code_line(line) {
            end = i;
        }
        in_string = track_triple_quotes(line, in_string);
    }

    Some((start + 1, end + 1))
}

/// Line index span `[start, end)` of a class body.
fn class_span(lines: &[&str], owner: &str) -> Option<(usize, usize)> {
    let pattern = format!(r"^[ \t]*class[ \t]+{}\b", regex::escape(owner));
    let re = Regex::new(&pattern).ok()?;
    let start = lines.iter().position(|l| re.is_match(l))?;
    let indent = indentation(lines[start]);
    let end = lines
        .iter()
        .enumerate()
        .skip(start + 1)
        .find(|(_, l)| is_code_line(l) && indentation(l) <= indent)
        .map(|(i, _)| i)
        .unwrap_or(lines.len());
    Some((start, end))
}

/// Index of the line closing the `def` signature (the one ending in `:`).
fn signature_end(lines: &[&str], start: usize) -> usize {
    let mut depth: i32 = 0;
    for (i, line) in lines.iter().enumerate().skip(start) {
        let code = line.split('#').next().unwrap_or(line);
        for c in code.chars() {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                _ => {}
            }
        }
        if depth <= 0 && code.contains(':') {
            return i;
        }
    }
    start
}

/// Follow triple-quoted strings across lines; returns the open delimiter, if any.
fn track_triple_quotes<'a>(line: &str, open: Option<&'a str>) -> Option<&'a str> {
    let mut open = open;
    let mut rest = line;
    loop {
        match open {
            Some(delim) => match rest.find(delim) {
                Some(pos) => {
                    rest = &rest[pos + 3..];
                    open = None;
                }
                None => return open,
            },
            None => {
                let dq = rest.find("\"\"\"");
                let sq = rest.find("'''");
                let (pos, delim) = match (dq, sq) {
                    (Some(d), Some(s)) if s < d => (s, "'''"),
                    (Some(d), _) => (d, "\"\"\""),
                    (None, Some(s)) => (s, "'''"),
                    (None, None) => return None,
                };
                rest = &rest[pos + 3..];
                open = Some(delim);
            }
        }
    }
}
