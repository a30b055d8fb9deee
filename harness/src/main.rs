use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use harness::core::state::RetrieverKind;
use harness::io::config::{HarnessConfig, load_config};
use harness::io::generate::HttpGenerator;
use harness::io::retrieve::HttpRetriever;
use harness::io::sandbox::DockerSandbox;
use harness::run::run_batch;

/// Run the code-synthesis benchmark over a directory of questions.
#[derive(Parser)]
#[command(name = "harness", version, about = "Self-correcting code-synthesis harness")]
struct Cli {
    /// Directory scanned recursively for question.txt files.
    #[arg(long, default_value = "question_segments/pymatgen_analysis_defects")]
    questions_dir: PathBuf,

    /// Output JSONL file; written after the whole batch completes.
    #[arg(long, default_value = "function_generation_results.jsonl")]
    out: PathBuf,

    /// Retrieval corpus to draw context from.
    #[arg(long, value_enum, default_value_t = RetrieverKind::Code)]
    retriever_type: RetrieverKind,

    /// Model identifier; overrides the config file.
    #[arg(long)]
    model_name: Option<String>,

    /// Sampling temperature (0-1); overrides the config file.
    #[arg(long)]
    temperature: Option<f64>,

    /// Path to the harness config TOML; defaults are used when missing.
    #[arg(long, default_value = "harness.toml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    harness::logging::init();
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    if let Some(model) = cli.model_name {
        config.model = model;
    }
    if let Some(temperature) = cli.temperature {
        config.temperature = temperature;
    }
    config.validate().context("validate config overrides")?;

    let api_key = std::env::var("OPENAI_API_KEY").ok();
    let generator = HttpGenerator::new(
        &config.generation_url,
        api_key,
        &config.model,
        config.temperature,
        config.service_max_retries,
    )
    .context("build generation client")?;
    let retriever = HttpRetriever::new(&config.retrieval_url, config.service_max_retries)
        .context("build retrieval client")?;
    let sandbox = DockerSandbox::new(
        &config.sandbox.image,
        Duration::from_secs(config.sandbox.timeout_secs),
        config.sandbox.output_limit_bytes,
    );

    let summary = run_batch(
        &cli.questions_dir,
        &cli.out,
        cli.retriever_type,
        &config,
        &generator,
        &retriever,
        &sandbox,
    )?;

    println!(
        "batch: questions={} succeeded={} exhausted={} results={}",
        summary.questions,
        summary.succeeded,
        summary.exhausted,
        cli.out.display()
    );
    Ok(())
}
