use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use synthloop::config::Config;
use synthloop::coverage;
use synthloop::harness::{Harness, PythonInterpreter};
use synthloop::llm::OllamaClient;
use synthloop::normalize::CommandNormalizer;
use synthloop::synth::{ModelSampleGenerator, SynthesisOutcome, Synthesizer};
use synthloop::target::{RecordSet, TargetDescriptor};
use synthloop::testing::PytestRunner;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "synthloop",
    about = "Generate a function and its tests, then repair until fully covered",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize one target function
    Run(RunArgs),
    /// Print a function-scoped coverage report from saved runner output
    Coverage(CoverageArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Target descriptor (.toml or .json)
    #[arg(long)]
    target: PathBuf,
    /// File holding the natural-language task
    #[arg(long)]
    task: PathBuf,
    /// Sample record set as JSON: {"columns": [...], "rows": [[...]]}
    #[arg(long)]
    sample: Option<PathBuf>,
    #[arg(long)]
    max_retries: Option<usize>,
    #[arg(long)]
    skip_sample_generation: bool,
    /// Project root the descriptor's paths are relative to
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[derive(Args, Debug)]
struct CoverageArgs {
    /// Saved pytest-cov term-missing output
    #[arg(long)]
    output: PathBuf,
    /// Source file the function lives in
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    function: String,
    /// Owning class, for methods
    #[arg(long)]
    owner: Option<String>,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(run(args))
        }
        Commands::Coverage(args) => show_coverage(args),
        Commands::Config => show_config(),
    }
}

fn init_logging() {
    let default_filter = "synthloop=info";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_filter))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(args: RunArgs) -> Result<()> {
    let config = Config::load();
    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("Project root {} does not exist", args.root.display()))?;
    let target = TargetDescriptor::load(&args.target)?;
    let task = fs::read_to_string(&args.task)
        .with_context(|| format!("Failed to read task {}", args.task.display()))?;
    let sample = args.sample.as_deref().map(RecordSet::load).transpose()?;
    let max_retries = args.max_retries.unwrap_or(config.max_retries);

    let client = OllamaClient::new(&config.model_url, &config.model, config.request_timeout_secs)?;
    let harness = Harness::new(PythonInterpreter::new(
        &config.python,
        &root,
        config.exec_timeout_secs,
    ));
    let runner = PytestRunner::new(&config.python, &root, config.test_timeout_secs);
    let normalizer = CommandNormalizer::new(config.normalizer_commands.clone());

    let synthesizer = Synthesizer::new(client.clone(), normalizer, harness, runner, &root)
        .with_system_prompt(config.system_prompt())
        .with_sample_generator(ModelSampleGenerator::new(client));

    eprintln!(
        "  Synthesizing {} with {} (up to {} iterations)...",
        target.name, config.model, max_retries
    );
    let outcome = synthesizer
        .synthesize(
            &task,
            &target,
            sample.as_ref(),
            max_retries,
            args.skip_sample_generation,
        )
        .await;

    report(&outcome, &target, &root)
}

fn report(outcome: &SynthesisOutcome, target: &TargetDescriptor, root: &Path) -> Result<()> {
    let implementation = root.join(&target.implementation_path);
    let tests = root.join(target.test_path());
    match outcome {
        SynthesisOutcome::Success {
            result,
            context,
            iterations,
            ..
        } => {
            eprintln!("  + Done after {} iteration(s)", iterations);
            eprintln!("    {}", implementation.display());
            eprintln!("    {}", tests.display());
            let summary = serde_json::json!({
                "status": "success",
                "iterations": iterations,
                "result": result,
                "context": context,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        SynthesisOutcome::Exhausted { iterations, .. } => Err(anyhow::anyhow!(
            "No fully covered solution after {} iteration(s); last attempt left in {}",
            iterations,
            implementation.display()
        )),
    }
}

fn show_coverage(args: CoverageArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.output)
        .with_context(|| format!("Failed to read runner output {}", args.output.display()))?;
    let source = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let report = coverage::extract_from_source(
        &raw,
        &args.file,
        &source,
        &args.function,
        args.owner.as_deref(),
    )?;

    println!("{}: {}%", args.function, report.percentage);
    if report.tests_failed {
        println!("(runner reported failing tests)");
    }
    for ((start, end), text) in &report.uncovered {
        println!("\n--- lines {}-{} ---\n{}", start, end, text);
    }
    Ok(())
}

fn show_config() -> Result<()> {
    let config = Config::load();
    eprintln!("  {}", Config::config_location());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
