use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::path::Path;
use synthloop::coverage;
use synthloop::harness::imports::split_imports;
use synthloop::llm::{decode, Splitter};

/// A module with `function_count` functions of `body_lines` statements each.
fn synthetic_module(function_count: usize, body_lines: usize) -> String {
    let mut source = String::from("import pandas as pd\nimport numpy as np\n\n");
    for f in 0..function_count {
        source.push_str(&format!("def transform_{f}(df, column=\"id\"):\n"));
        source.push_str(&format!("    \"\"\"Transform number {f}.\"\"\"\n"));
        for line in 0..body_lines {
            source.push_str(&format!("    value_{line} = df[column].sum() + {line}\n"));
        }
        source.push_str("    return df\n\n\n");
    }
    source
}

fn synthetic_response(body_lines: usize) -> String {
    let implementation = synthetic_module(1, body_lines);
    let mut tests = String::from("import pytest\nfrom pipeline import transform_0\n\n");
    for t in 0..40 {
        tests.push_str(&format!(
            "\ndef test_transform_{t}():\n    assert transform_0(pd.DataFrame({{\"id\": [{t}]}})) is not None\n"
        ));
    }
    format!("Here is the code:\n```python\n{implementation}```\n\n```python\n{tests}```\n")
}

fn bench_split_response(c: &mut Criterion) {
    let text = synthetic_response(400);
    let envelope = json!({ "response": text, "done": true });
    let splitter = Splitter::for_module("pipeline");

    c.bench_function("decode_and_split_response", |b| {
        b.iter(|| {
            let decoded = decode(black_box(&envelope)).unwrap_or_default();
            let parts = splitter.split(&decoded);
            black_box(parts.is_ok());
        });
    });

    let source = synthetic_module(50, 20);
    c.bench_function("split_imports_module", |b| {
        b.iter(|| {
            let (imports, body) = split_imports(black_box(&source));
            black_box((imports.len(), body.len()));
        });
    });
}

fn bench_coverage_extract(c: &mut Criterion) {
    let source = synthetic_module(200, 25);
    let mut output = String::from(
        "collected 120 items\n\nName              Stmts   Miss  Cover   Missing\n-----------------------------------------------\n",
    );
    for i in 0..300 {
        output.push_str(&format!(
            "src/other_{i:03}.py     40      3    92%   4, 9-10\n"
        ));
    }
    output.push_str("src/pipeline.py   5600    120    97%   ");
    let missing: Vec<String> = (0..120)
        .map(|i| format!("{}-{}", 30 + i * 40, 32 + i * 40))
        .collect();
    output.push_str(&missing.join(", "));
    output.push_str("\nTOTAL   17600   1020    94%\n========= 120 passed in 3.21s =========\n");

    c.bench_function("coverage_extract_late_function", |b| {
        b.iter(|| {
            let report = coverage::extract_from_source(
                black_box(&output),
                Path::new("src/pipeline.py"),
                &source,
                "transform_150",
                None,
            );
            black_box(report.map(|r| r.percentage).unwrap_or(0));
        });
    });
}

criterion_group!(perf_core, bench_split_response, bench_coverage_extract);
criterion_main!(perf_core);
