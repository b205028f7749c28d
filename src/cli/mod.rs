//! Subcommand handlers extracted from `main.rs`.
//!
//! Keeps `main.rs` slim: clap parsing stays there, the work lives here.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};

use crate::compiler::{CompileStats, CompilerOptions, ExampleCompiler};
use crate::config::Config;
use crate::dataset::{self, records};
use crate::decoder;
use crate::eval::{self, EvalClient, EvalReport, EvalSummary};
use crate::facts::{FactsSource, HostFacts, StaticFacts};
use crate::inference::{CompletionServer, EngineSettings, InferenceEngine};
use crate::plan::{self, DatasetSummary, Hyperparams, SweepPreset, TrainingPlan};
use crate::prompt::{self, Prompter};
use crate::server;
use crate::template::ChatMlTemplate;
use crate::tokenizer;

pub const TRAIN_FILE: &str = "train.jsonl";
pub const EVAL_FILE: &str = "eval.jsonl";
pub const STATS_FILE: &str = "compile_stats.json";
pub const PLAN_FILE: &str = "training_plan.json";

// ── Flag overrides ───────────────────────────────────────────────────────────

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub max_length: Option<usize>,
    pub eval_fraction: Option<f64>,
    pub seed: Option<u64>,
    pub epochs: Option<u32>,
    pub learning_rate: Option<f64>,
    pub lora_r: Option<u32>,
    pub lora_alpha: Option<u32>,
    pub batch_size: Option<u32>,
    pub tools_json: Option<PathBuf>,
}

impl Overrides {
    /// Apply onto `config` and re-validate.
    pub fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(v) = &self.model {
            config.model.tokenizer = v.clone();
        }
        if let Some(v) = self.max_length {
            config.compile.max_length = v;
        }
        if let Some(v) = self.eval_fraction {
            config.compile.eval_fraction = v;
        }
        if let Some(v) = self.seed {
            config.compile.seed = v;
        }
        if let Some(v) = self.epochs {
            config.training.epochs = v;
        }
        if let Some(v) = self.learning_rate {
            config.training.learning_rate = v;
        }
        if let Some(v) = self.lora_r {
            config.training.lora_r = v;
        }
        if let Some(v) = self.lora_alpha {
            config.training.lora_alpha = v;
        }
        if let Some(v) = self.batch_size {
            config.training.batch_size = v;
        }
        if let Some(v) = &self.tools_json {
            config.model.tools_file = Some(v.display().to_string());
        }
        config.validate()
    }
}

fn prompter(config: &Config) -> anyhow::Result<Prompter> {
    let prompter = Prompter::new(Arc::new(ChatMlTemplate::new()));
    match &config.model.tools_file {
        Some(path) => {
            let tools = prompt::load_tools(Path::new(path))?;
            info!(path = %path, tools = tools.len(), "using tool definitions from file");
            Ok(prompter.with_tools(tools))
        }
        None => Ok(prompter),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

// ── compile ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompileSummary<'a> {
    #[serde(flatten)]
    stats: &'a CompileStats,
    files: usize,
    records_loaded: usize,
    records_skipped: usize,
    train_examples: usize,
    eval_examples: usize,
    eval_fraction: f64,
    seed: u64,
    tokenizer: &'a str,
}

/// Load records, compile, split, and write the trainer inputs to `output`.
pub async fn compile(config: &Config, data: &Path, output: &Path) -> anyhow::Result<()> {
    let (examples, report) = records::load_examples(data)?;
    if examples.is_empty() {
        anyhow::bail!(
            "no usable training records under {} ({} skipped)",
            data.display(),
            report.skipped
        );
    }
    let encoder = tokenizer::load(&config.model.tokenizer, &config.model.pad_token)?;
    let tokenizer_name = encoder.name().to_string();
    let compiler = ExampleCompiler::new(
        prompter(config)?,
        encoder,
        CompilerOptions {
            max_length: config.compile.max_length,
            add_special_tokens: config.model.add_special_tokens,
        },
    )?;

    let (rows, stats) = compiler.compile_all(&examples);
    if rows.is_empty() {
        anyhow::bail!("every record was dropped during compilation: {:?}", stats.dropped);
    }
    if stats.dropped_total() > 0 {
        warn!(dropped = stats.dropped_total(), "some records were dropped");
    }

    let split = dataset::assemble(rows, config.compile.eval_fraction, config.compile.seed)?;

    std::fs::create_dir_all(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let train_path = output.join(TRAIN_FILE);
    let eval_path = output.join(EVAL_FILE);
    dataset::write_jsonl(&train_path, &split.train)?;
    dataset::write_jsonl(&eval_path, &split.eval)?;

    write_json(
        &output.join(STATS_FILE),
        &CompileSummary {
            stats: &stats,
            files: report.files,
            records_loaded: report.loaded,
            records_skipped: report.skipped,
            train_examples: split.train.len(),
            eval_examples: split.eval.len(),
            eval_fraction: config.compile.eval_fraction,
            seed: config.compile.seed,
            tokenizer: &tokenizer_name,
        },
    )?;

    let summary = DatasetSummary {
        train_file: train_path.display().to_string(),
        eval_file: Some(eval_path.display().to_string()),
        train_examples: split.train.len(),
        eval_examples: split.eval.len(),
        max_length: config.compile.max_length,
        seed: config.compile.seed,
    };
    let plan = TrainingPlan::new(
        &config.model.base_model,
        &config.training,
        Hyperparams::from_config(&config.training),
        &summary,
    );
    write_json(&output.join(PLAN_FILE), &plan)?;

    println!(
        "compiled {} of {} records: {} train, {} eval -> {}",
        stats.compiled,
        stats.total,
        split.train.len(),
        split.eval.len(),
        output.display()
    );
    if !split.has_eval() {
        println!("no eval split; evaluation disabled in {PLAN_FILE}");
    }
    Ok(())
}

// ── sweep ────────────────────────────────────────────────────────────────────

fn count_lines(path: &Path) -> anyhow::Result<usize> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(contents.lines().filter(|l| !l.trim().is_empty()).count())
}

/// Write one training plan per grid point, reusing an already compiled
/// dataset in `data_dir`.
pub async fn sweep(
    config: &Config,
    preset: SweepPreset,
    data_dir: &Path,
    output: &Path,
) -> anyhow::Result<()> {
    let train_path = data_dir.join(TRAIN_FILE);
    let eval_path = data_dir.join(EVAL_FILE);
    if !train_path.exists() {
        anyhow::bail!(
            "{} not found; run `installer-llm compile` first",
            train_path.display()
        );
    }
    let train_examples = count_lines(&train_path)?;
    if train_examples == 0 {
        anyhow::bail!("{} is empty", train_path.display());
    }
    let eval_examples = if eval_path.exists() { count_lines(&eval_path)? } else { 0 };

    let summary = DatasetSummary {
        train_file: train_path.display().to_string(),
        eval_file: Some(eval_path.display().to_string()),
        train_examples,
        eval_examples,
        max_length: config.compile.max_length,
        seed: config.compile.seed,
    };

    let grid = plan::sweep_grid(preset);
    let mut names = Vec::with_capacity(grid.len());
    for hyper in grid {
        let plan = TrainingPlan::new(&config.model.base_model, &config.training, hyper, &summary);
        let dir = output.join(&plan.run_name);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        write_json(&dir.join(PLAN_FILE), &plan)?;
        names.push(plan.run_name);
    }
    write_json(&output.join("sweep.json"), &names)?;

    info!(runs = names.len(), ?preset, "sweep plans written");
    println!("{} training plans -> {}", names.len(), output.display());
    Ok(())
}

// ── serve ────────────────────────────────────────────────────────────────────

async fn facts_source(config: &Config, facts_file: Option<&Path>) -> anyhow::Result<Arc<dyn FactsSource>> {
    let file = facts_file
        .map(Path::to_path_buf)
        .or_else(|| config.server.facts_file.as_ref().map(PathBuf::from));
    let source: Arc<dyn FactsSource> = match file {
        Some(path) => {
            info!(path = %path.display(), "using fixed system facts");
            Arc::new(StaticFacts::load(&path).await?)
        }
        None => Arc::new(HostFacts::new(
            config.facts.ping_host.clone(),
            Duration::from_secs(config.facts.probe_timeout_secs),
        )),
    };
    Ok(source)
}

/// Build the engine from config and serve it until Ctrl-C.
pub async fn serve(config: &Config, facts_file: Option<&Path>) -> anyhow::Result<()> {
    let addr = config.server.socket_addr()?;
    let encoder = tokenizer::load(&config.model.tokenizer, &config.model.pad_token)?;
    let generator = Arc::new(CompletionServer::new(
        &config.server.backend_url,
        config.server.timeout(),
    )?);
    let facts = facts_source(config, facts_file).await?;

    let engine = Arc::new(InferenceEngine::new(
        prompter(config)?,
        encoder,
        generator,
        facts,
        EngineSettings {
            max_tokens: config.server.max_tokens,
            temperature: config.server.temperature,
            top_p: config.server.top_p,
            timeout: config.server.timeout(),
            add_special_tokens: config.model.add_special_tokens,
        },
    ));

    let srv = server::start_server(addr, engine)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    println!("  listening on http://{}", srv.addr);
    println!("  backend:    {}", config.server.backend_url);

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, shutting down…");
    srv.handle.abort();
    Ok(())
}

// ── decode ───────────────────────────────────────────────────────────────────

/// Decode raw model output from `file` (or stdin) and print the action.
pub async fn decode(file: Option<&Path>) -> anyhow::Result<()> {
    let raw = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };
    let action = decoder::decode(&raw)?;
    println!("{}", serde_json::to_string_pretty(&action.to_expected())?);
    Ok(())
}

// ── facts ────────────────────────────────────────────────────────────────────

/// Print the current facts snapshot as the system prompt sees it.
pub async fn facts(config: &Config, facts_file: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let source = facts_source(config, facts_file).await?;
    let snapshot = source.snapshot().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("{}", snapshot.format_system_context());
    }
    Ok(())
}

// ── evaluate ─────────────────────────────────────────────────────────────────

pub async fn evaluate(
    config: &Config,
    server_url: Option<&str>,
    cases_path: &Path,
    output: &Path,
) -> anyhow::Result<()> {
    let server_url = match server_url {
        Some(url) => url.to_string(),
        None => format!("http://{}", config.server.addr),
    };
    let cases = eval::load_cases(cases_path).await?;
    let client = EvalClient::new(&server_url, config.server.timeout())?;

    info!(cases = cases.len(), server = %server_url, "running evaluation");
    let results = client.run(&cases).await;
    let summary = EvalSummary::from_results(&results);

    println!("  total:            {}", summary.total);
    println!("  correct:          {} ({:.1}%)", summary.correct, 100.0 * summary.accuracy);
    println!("  command accuracy: {:.1}%", 100.0 * summary.command_accuracy);
    println!("  command rate:     {:.1}%", 100.0 * summary.command_rate);
    println!("  text rate:        {:.1}%", 100.0 * summary.text_rate);
    for (category, score) in &summary.per_category {
        println!("  {category:<17} {}/{}", score.correct, score.total);
    }

    let report = EvalReport {
        server: server_url,
        cases_file: cases_path.display().to_string(),
        finished_at: chrono::Utc::now(),
        summary,
        results,
    };
    eval::write_report(output, &report).await
}
