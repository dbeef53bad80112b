//! Synthesis loop
//!
//! Asks the model for an implementation and its tests, validates the answer
//! and feeds the first problem it finds back into the next prompt. Each
//! iteration runs `AskModel → Decode → Split → Normalize → Execute → Persist
//! → RunTests → Evaluate` and ends in success or a diagnostic for the next
//! one. Nothing escapes the loop except a `SynthesisOutcome`.

pub mod sample;

use crate::coverage::{self, CoverageReport};
use crate::error::{IterationError, MissingCoverageError};
use crate::harness::driver::Interpreter;
use crate::harness::{Execution, Harness};
use crate::llm::{decode, prompts, ModelClient, Splitter};
use crate::normalize::SourceNormalizer;
use crate::target::{RecordSet, TargetDescriptor};
use crate::testing::{TestRun, TestRunner};
use crate::util::tail_chars;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub use sample::{ModelSampleGenerator, NoSampleGenerator, SampleGenerator};

/// Runner output kept in a failed-tests diagnostic
const FAILURE_OUTPUT_MAX_CHARS: usize = 4_000;

/// One model round trip, filled in stage by stage.
#[derive(Debug, Clone, Default)]
pub struct ModelExchange {
    pub prompt: String,
    pub envelope: serde_json::Value,
    pub decoded: String,
    pub implementation: String,
    pub tests: String,
}

/// The single piece of feedback a clarification prompt carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Tests ran and passed but left lines of the function unexecuted
    Coverage(CoverageReport),
    Error(String),
}

/// What iteration N hands to iteration N+1.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviousAttempt {
    pub implementation: String,
    pub tests: String,
    pub diagnostic: Diagnostic,
}

impl PreviousAttempt {
    pub fn clarification(&self, target: &TargetDescriptor) -> String {
        match &self.diagnostic {
            Diagnostic::Coverage(report) => prompts::coverage_clarification(
                target,
                report,
                &self.implementation,
                &self.tests,
            ),
            Diagnostic::Error(message) => {
                prompts::error_clarification(target, message, &self.implementation)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisOutcome {
    Success {
        implementation: String,
        result: serde_json::Value,
        context: BTreeMap<String, String>,
        tests: String,
        iterations: usize,
    },
    Exhausted {
        implementation: String,
        tests: String,
        iterations: usize,
    },
}

impl SynthesisOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SynthesisOutcome::Success { .. })
    }

    /// Return value of the target call; `None` when the budget ran out.
    pub fn result(&self) -> Option<&serde_json::Value> {
        match self {
            SynthesisOutcome::Success { result, .. } => Some(result),
            SynthesisOutcome::Exhausted { .. } => None,
        }
    }

    pub fn context(&self) -> BTreeMap<String, String> {
        match self {
            SynthesisOutcome::Success { context, .. } => context.clone(),
            SynthesisOutcome::Exhausted { .. } => BTreeMap::new(),
        }
    }

    pub fn implementation(&self) -> &str {
        match self {
            SynthesisOutcome::Success { implementation, .. }
            | SynthesisOutcome::Exhausted { implementation, .. } => implementation,
        }
    }

    pub fn tests(&self) -> &str {
        match self {
            SynthesisOutcome::Success { tests, .. } | SynthesisOutcome::Exhausted { tests, .. } => {
                tests
            }
        }
    }

    pub fn iterations(&self) -> usize {
        match self {
            SynthesisOutcome::Success { iterations, .. }
            | SynthesisOutcome::Exhausted { iterations, .. } => *iterations,
        }
    }
}

pub struct Synthesizer<M, N, I, R> {
    model: M,
    normalizer: N,
    harness: Harness<I>,
    runner: R,
    sample_generator: Box<dyn SampleGenerator>,
    /// Project root the descriptor's paths are relative to
    root: PathBuf,
    system_prompt: String,
}

impl<M, N, I, R> Synthesizer<M, N, I, R>
where
    M: ModelClient,
    N: SourceNormalizer,
    I: Interpreter,
    R: TestRunner,
{
    pub fn new(model: M, normalizer: N, harness: Harness<I>, runner: R, root: impl Into<PathBuf>) -> Self {
        Self {
            model,
            normalizer,
            harness,
            runner,
            sample_generator: Box::new(NoSampleGenerator),
            root: root.into(),
            system_prompt: prompts::SYNTHESIS_SYSTEM.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_sample_generator(mut self, generator: impl SampleGenerator + 'static) -> Self {
        self.sample_generator = Box::new(generator);
        self
    }

    /// Run the loop for one target. Always returns within `max_retries` iterations.
    pub async fn synthesize(
        &self,
        task: &str,
        target: &TargetDescriptor,
        sample: Option<&RecordSet>,
        max_retries: usize,
        skip_sample_generation: bool,
    ) -> SynthesisOutcome {
        let generated = if sample.is_none() && !skip_sample_generation {
            self.generate_sample(target).await
        } else {
            None
        };
        let sample = sample.or(generated.as_ref());

        let splitter = Splitter::for_module(&target.module);
        let mut previous: Option<PreviousAttempt> = None;
        let mut artifacts = (String::new(), String::new());

        for iteration in 0..max_retries {
            let prompt = match &previous {
                Some(attempt) => attempt.clarification(target),
                None => task.to_string(),
            };
            let mut exchange = ModelExchange {
                prompt,
                ..Default::default()
            };
            let mut report = None;

            let outcome = self
                .iterate(iteration, target, sample, &splitter, &mut exchange, &mut report)
                .await;

            if !exchange.implementation.is_empty() {
                artifacts = (exchange.implementation.clone(), exchange.tests.clone());
            }

            match outcome {
                Ok(execution) => {
                    info!(
                        iteration,
                        function = %target.name,
                        stage = "evaluate",
                        "tests pass with full coverage"
                    );
                    return SynthesisOutcome::Success {
                        implementation: exchange.implementation,
                        result: execution.result,
                        context: execution.context,
                        tests: exchange.tests,
                        iterations: iteration + 1,
                    };
                }
                Err(error) => {
                    warn!(
                        iteration,
                        function = %target.name,
                        structural = error.is_structural(),
                        "iteration failed: {}",
                        error
                    );
                    if error.is_structural() {
                        self.remove_test_file(target);
                    }
                    previous = Some(handoff(error, exchange, report, previous.take()));
                }
            }
        }

        info!(function = %target.name, max_retries, "retry budget exhausted");
        SynthesisOutcome::Exhausted {
            implementation: artifacts.0,
            tests: artifacts.1,
            iterations: max_retries,
        }
    }

    async fn generate_sample(&self, target: &TargetDescriptor) -> Option<RecordSet> {
        match self.sample_generator.generate(target).await {
            Ok(Some(records)) => {
                debug!(
                    function = %target.name,
                    columns = records.columns.len(),
                    rows = records.rows.len(),
                    "generated sample"
                );
                Some(records)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(function = %target.name, "sample generation failed: {}", e);
                None
            }
        }
    }

    async fn iterate(
        &self,
        iteration: usize,
        target: &TargetDescriptor,
        sample: Option<&RecordSet>,
        splitter: &Splitter,
        exchange: &mut ModelExchange,
        report: &mut Option<CoverageReport>,
    ) -> Result<Execution, IterationError> {
        let function = target.name.as_str();

        debug!(iteration, function, stage = "ask_model", prompt_chars = exchange.prompt.len(), "asking model");
        exchange.envelope = self
            .model
            .complete(&self.system_prompt, &exchange.prompt)
            .await
            .map_err(|e| IterationError::Model(e.to_string()))?;

        exchange.decoded = decode(&exchange.envelope)?;

        debug!(iteration, function, stage = "split", "splitting response");
        let (implementation, tests) = splitter.split(&exchange.decoded)?;
        let single_block = implementation == tests;
        exchange.implementation = implementation;
        exchange.tests = tests;

        debug!(iteration, function, stage = "normalize", "normalizing source");
        let normalized = self.normalizer.normalize(&exchange.implementation)?;
        exchange.implementation = normalized.text;
        exchange.tests = if single_block {
            exchange.implementation.clone()
        } else {
            self.normalizer.normalize(&exchange.tests)?.text
        };

        debug!(iteration, function, stage = "execute", "executing target");
        let execution = self.harness.execute(&exchange.implementation, target, sample)?;

        debug!(iteration, function, stage = "persist", "writing generated files");
        self.persist(target, exchange)?;

        info!(iteration, function, stage = "run_tests", "running generated tests");
        let run = self.runner.run(target).map_err(IterationError::Runner)?;
        if run.timed_out {
            return Err(IterationError::Runner(format!(
                "Test run timed out after {}ms",
                run.duration_ms
            )));
        }

        let owner = (!target.owner.is_empty()).then_some(target.owner.as_str());
        let scoped = coverage::extract_from_source(
            &run.stdout,
            &target.implementation_path,
            &exchange.implementation,
            target.bare_name(),
            owner,
        )?;
        debug!(
            iteration,
            function,
            stage = "evaluate",
            percentage = scoped.percentage,
            gaps = scoped.uncovered.len(),
            "coverage extracted"
        );

        evaluate(target, &run, scoped, report)?;
        Ok(execution)
    }

    fn persist(&self, target: &TargetDescriptor, exchange: &ModelExchange) -> std::io::Result<()> {
        write_file(&self.root.join(&target.implementation_path), &exchange.implementation)?;
        write_file(&self.root.join(target.test_path()), &exchange.tests)
    }

    fn remove_test_file(&self, target: &TargetDescriptor) {
        let path = self.root.join(target.test_path());
        if !path.exists() {
            return;
        }
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed unusable test file"),
            Err(e) => warn!(path = %path.display(), "failed to remove test file: {}", e),
        }
    }
}

/// Success needs a clean runner exit, no failed tests and a fully covered function.
fn evaluate(
    target: &TargetDescriptor,
    run: &TestRun,
    scoped: CoverageReport,
    report: &mut Option<CoverageReport>,
) -> Result<(), IterationError> {
    if scoped.tests_failed {
        return Err(IterationError::TestsFailed(tail_chars(
            &run.stdout,
            FAILURE_OUTPUT_MAX_CHARS,
        )));
    }
    if !scoped.is_complete() {
        let percentage = scoped.percentage;
        *report = Some(scoped);
        return Err(MissingCoverageError {
            function: target.bare_name().to_string(),
            percentage,
        }
        .into());
    }
    if !run.passed {
        let code = run
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        return Err(IterationError::Runner(format!(
            "Test run exited with code {}:\n{}",
            code,
            tail_chars(&run.stdout, FAILURE_OUTPUT_MAX_CHARS)
        )));
    }
    Ok(())
}

/// Reduce a failed iteration to what the next prompt needs.
///
/// When the iteration never got as far as splitting, the decoded text (or
/// the raw envelope) stands in for the previous code.
fn handoff(
    error: IterationError,
    exchange: ModelExchange,
    report: Option<CoverageReport>,
    earlier: Option<PreviousAttempt>,
) -> PreviousAttempt {
    let diagnostic = match (&error, report) {
        (IterationError::MissingCoverage(_), Some(report)) => Diagnostic::Coverage(report),
        _ => Diagnostic::Error(error.to_string()),
    };

    let (implementation, tests) = if !exchange.implementation.is_empty() {
        (exchange.implementation, exchange.tests)
    } else if !exchange.decoded.is_empty() {
        (exchange.decoded, String::new())
    } else if !exchange.envelope.is_null() {
        (exchange.envelope.to_string(), String::new())
    } else {
        earlier
            .map(|attempt| (attempt.implementation, attempt.tests))
            .unwrap_or_default()
    };

    PreviousAttempt {
        implementation,
        tests,
        diagnostic,
    }
}

fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnresolvedImportError;
    use crate::harness::driver::{DriverReport, DriverRequest};
    use crate::harness::imports::ImportCache;
    use crate::normalize::Normalized;
    use crate::target::Parameter;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const IMPL: &str = "def total(values):\n    result = 0\n    for v in values:\n        result += v\n    if result < 0:\n        result = 0\n    return result";

    #[derive(Default)]
    struct ScriptedModel {
        responses: Mutex<VecDeque<Value>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Value>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(&self, _system: &str, prompt: &str) -> anyhow::Result<Value> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))
        }
    }

    /// Rejects any source mentioning `undefined_symbol`.
    struct FlaggingNormalizer;

    impl SourceNormalizer for FlaggingNormalizer {
        fn normalize(&self, source: &str) -> Result<Normalized, IterationError> {
            if source.contains("undefined_symbol") {
                return Err(UnresolvedImportError {
                    symbols: vec!["undefined_symbol".to_string()],
                }
                .into());
            }
            Ok(Normalized {
                text: source.to_string(),
                modified: false,
            })
        }
    }

    struct ReturnsSix;

    impl Interpreter for ReturnsSix {
        fn run(&self, _request: &DriverRequest) -> Result<DriverReport, String> {
            Ok(DriverReport::Ok {
                result: json!(6),
                context: BTreeMap::from([("LIMIT".to_string(), "10".to_string())]),
                imported: Vec::new(),
            })
        }
    }

    struct ScriptedRunner {
        runs: Mutex<VecDeque<TestRun>>,
        calls: AtomicUsize,
    }

    impl ScriptedRunner {
        fn new(runs: Vec<TestRun>) -> Self {
            Self {
                runs: Mutex::new(runs.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TestRunner for ScriptedRunner {
        fn run(&self, _target: &TargetDescriptor) -> Result<TestRun, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.runs
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| "no scripted run left".to_string())
        }
    }

    struct CountingSampleGenerator(Arc<AtomicUsize>);

    #[async_trait]
    impl SampleGenerator for CountingSampleGenerator {
        async fn generate(&self, _target: &TargetDescriptor) -> anyhow::Result<Option<RecordSet>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Some(RecordSet::new(vec!["value".to_string()], vec![vec![json!(1)]])))
        }
    }

    fn target() -> TargetDescriptor {
        TargetDescriptor::new("total", "stats", "src/stats.py")
            .with_parameters(vec![Parameter::new("values").with_default("[1, 2, 3]")])
    }

    fn response(implementation: &str, test_name: &str) -> Value {
        json!({
            "response": format!(
                "```python\n{}\n```\n\n```python\nimport pytest\nfrom stats import total\n\n\ndef {}():\n    assert total([1, 2, 3]) == 6\n```",
                implementation, test_name
            ),
            "done": true,
        })
    }

    fn pytest_output(missing: &str, cover: &str, summary: &str) -> String {
        format!(
            "============================= test session starts ==============================\n\
             collected 2 items\n\n\
             tests/test_stats.py ..                                                   [100%]\n\n\
             ---------- coverage: platform linux, python 3.11.4-final-0 -----------\n\
             Name           Stmts   Miss  Cover   Missing\n\
             --------------------------------------------\n\
             src/stats.py       7      2    {}   {}\n\
             --------------------------------------------\n\
             TOTAL              7      2    {}\n\
             ============================== {} in 0.05s ===============================\n",
            cover, missing, cover, summary
        )
    }

    fn full_coverage() -> TestRun {
        TestRun::success(pytest_output("", "100%", "2 passed"), 50)
    }

    fn partial_coverage() -> TestRun {
        TestRun::failure(pytest_output("5-6", "71%", "2 passed"), Some(2), 50)
    }

    type TestSynthesizer = Synthesizer<ScriptedModel, FlaggingNormalizer, ReturnsSix, ScriptedRunner>;

    fn synthesizer(model: ScriptedModel, runner: ScriptedRunner, root: &Path) -> TestSynthesizer {
        let harness = Harness::with_cache(ReturnsSix, Arc::new(ImportCache::new()));
        Synthesizer::new(model, FlaggingNormalizer, harness, runner, root)
    }

    #[tokio::test]
    async fn test_success_on_first_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![response(IMPL, "test_total")]);
        let runner = ScriptedRunner::new(vec![full_coverage()]);
        let synth = synthesizer(model, runner, dir.path());

        let outcome = synth
            .synthesize("Write total().", &target(), None, 5, true)
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.iterations(), 1);
        assert_eq!(outcome.result(), Some(&json!(6)));
        assert_eq!(outcome.context().get("LIMIT").map(String::as_str), Some("10"));
        assert_eq!(synth.model.prompts(), vec!["Write total()."]);

        let written = fs::read_to_string(dir.path().join("src/stats.py")).unwrap();
        assert_eq!(written, IMPL);
        let tests = fs::read_to_string(dir.path().join("tests/test_stats.py")).unwrap();
        assert!(tests.starts_with("import pytest"));
    }

    #[tokio::test]
    async fn test_unresolved_import_removes_test_file() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("tests/test_stats.py");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "def test_stale(): pass\n").unwrap();

        let broken = format!("{}\n\nLIMIT = undefined_symbol", IMPL);
        let model = ScriptedModel::new(vec![response(&broken, "test_total")]);
        let runner = ScriptedRunner::new(Vec::new());
        let synth = synthesizer(model, runner, dir.path());

        let outcome = synth.synthesize("task", &target(), None, 1, true).await;

        assert!(!outcome.is_success());
        assert!(!stale.exists());
        assert_eq!(synth.runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unresolved_import_retried_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let broken = format!("{}\n\nLIMIT = undefined_symbol", IMPL);
        let model = ScriptedModel::new(vec![
            response(&broken, "test_total"),
            response(IMPL, "test_total"),
        ]);
        let runner = ScriptedRunner::new(vec![full_coverage()]);
        let synth = synthesizer(model, runner, dir.path());

        let outcome = synth.synthesize("task", &target(), None, 5, true).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.iterations(), 2);
        let prompts = synth.model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Unresolved names in generated code: undefined_symbol"));
        assert!(prompts[1].contains("LIMIT = undefined_symbol"));
    }

    #[tokio::test]
    async fn test_coverage_gap_embedded_in_next_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![
            response(IMPL, "test_total"),
            response(IMPL, "test_total_negative"),
        ]);
        let runner = ScriptedRunner::new(vec![partial_coverage(), full_coverage()]);
        let synth = synthesizer(model, runner, dir.path());

        let outcome = synth.synthesize("task", &target(), None, 5, true).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.iterations(), 2);
        assert!(outcome.tests().contains("test_total_negative"));

        let prompts = synth.model.prompts();
        assert!(prompts[1].contains(
            "Lines 5-6:\n```python\n    if result < 0:\n        result = 0\n```"
        ));
        assert!(prompts[1].contains("71%"));
        assert!(!prompts[1].contains("Lines 1-"));
    }

    #[tokio::test]
    async fn test_exhausted_keeps_last_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![
            response(IMPL, "test_one"),
            response(IMPL, "test_two"),
            response(IMPL, "test_three"),
            response(IMPL, "test_four"),
        ]);
        let runner = ScriptedRunner::new(vec![
            partial_coverage(),
            partial_coverage(),
            partial_coverage(),
            partial_coverage(),
        ]);
        let synth = synthesizer(model, runner, dir.path());

        let outcome = synth.synthesize("task", &target(), None, 3, true).await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.iterations(), 3);
        assert!(outcome.tests().contains("test_three"));
        assert_eq!(outcome.implementation(), IMPL);
        assert!(outcome.result().is_none());
        assert!(outcome.context().is_empty());
        assert_eq!(synth.model.prompts().len(), 3);
        assert_eq!(synth.runner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_model_failures_never_abort_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(Vec::new());
        let runner = ScriptedRunner::new(Vec::new());
        let synth = synthesizer(model, runner, dir.path());

        let outcome = synth.synthesize("task", &target(), None, 4, true).await;

        assert_eq!(outcome.iterations(), 4);
        assert_eq!(synth.model.prompts().len(), 4);
        assert!(synth.model.prompts()[1].contains("connection refused"));
        assert_eq!(synth.runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_budget_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![response(IMPL, "test_total")]);
        let runner = ScriptedRunner::new(vec![full_coverage()]);
        let synth = synthesizer(model, runner, dir.path());

        let outcome = synth.synthesize("task", &target(), None, 0, true).await;

        assert_eq!(outcome.iterations(), 0);
        assert!(synth.model.prompts().is_empty());
        assert_eq!(outcome.implementation(), "");
    }

    #[tokio::test]
    async fn test_decode_error_uses_envelope_as_context() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![
            json!({"unexpected": "shape"}),
            response(IMPL, "test_total"),
        ]);
        let runner = ScriptedRunner::new(vec![full_coverage()]);
        let synth = synthesizer(model, runner, dir.path());

        let outcome = synth.synthesize("task", &target(), None, 3, true).await;

        assert_eq!(outcome.iterations(), 2);
        let prompts = synth.model.prompts();
        assert!(prompts[1].contains("Could not decode model response"));
        assert!(prompts[1].contains("\"unexpected\""));
    }

    #[tokio::test]
    async fn test_failed_tests_feed_runner_output_back() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![
            response(IMPL, "test_total"),
            response(IMPL, "test_total"),
        ]);
        let runner = ScriptedRunner::new(vec![
            TestRun::failure(pytest_output("", "100%", "1 failed, 1 passed"), Some(1), 50),
            full_coverage(),
        ]);
        let synth = synthesizer(model, runner, dir.path());

        let outcome = synth.synthesize("task", &target(), None, 3, true).await;

        assert_eq!(outcome.iterations(), 2);
        assert!(synth.model.prompts()[1].contains("1 failed, 1 passed"));
    }

    #[tokio::test]
    async fn test_sample_generated_once_unless_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let model = ScriptedModel::new(vec![response(IMPL, "test_total")]);
        let runner = ScriptedRunner::new(vec![full_coverage()]);
        let synth = synthesizer(model, runner, dir.path())
            .with_sample_generator(CountingSampleGenerator(Arc::clone(&calls)));
        synth.synthesize("task", &target(), None, 2, false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let model = ScriptedModel::new(vec![response(IMPL, "test_total")]);
        let runner = ScriptedRunner::new(vec![full_coverage()]);
        let synth = synthesizer(model, runner, dir.path())
            .with_sample_generator(CountingSampleGenerator(Arc::clone(&calls)));
        synth.synthesize("task", &target(), None, 2, true).await;
        let given = RecordSet::new(vec!["v".to_string()], Vec::new());
        synth.synthesize("task", &target(), Some(&given), 1, false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
