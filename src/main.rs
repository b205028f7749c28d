use installer_llm::cli;
use installer_llm::config;
use installer_llm::plan::SweepPreset;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "installer-llm",
    version,
    about = "Training-data compiler and inference server for the installer assistant"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct Hyper {
    /// Tokenizer: `o200k`, `bytes`, or a path to a model dir / tokenizer.json
    #[arg(long)]
    model: Option<String>,
    /// Maximum tokens per compiled example
    #[arg(long)]
    max_length: Option<usize>,
    #[arg(long)]
    epochs: Option<u32>,
    #[arg(long)]
    learning_rate: Option<f64>,
    #[arg(long)]
    lora_r: Option<u32>,
    #[arg(long)]
    lora_alpha: Option<u32>,
    #[arg(long)]
    batch_size: Option<u32>,
    /// JSON file of tool definitions replacing the built-in shell tool
    #[arg(long)]
    tools_json: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile JSONL training records into tokenized train/eval files
    Compile {
        /// A JSONL file or a directory of them
        #[arg(long, alias = "data-dir")]
        data: PathBuf,
        /// Output directory
        #[arg(long, default_value = "compiled")]
        output: PathBuf,
        /// Share of examples held out for evaluation, in [0, 1)
        #[arg(long)]
        eval_fraction: Option<f64>,
        /// Shuffle seed for the split
        #[arg(long)]
        seed: Option<u64>,
        #[command(flatten)]
        hyper: Hyper,
    },
    /// Serve the query endpoint in front of a completion backend
    Serve {
        /// Listen address (overrides server.addr)
        #[arg(long)]
        addr: Option<String>,
        /// Completion backend base URL (overrides server.backend_url)
        #[arg(long)]
        backend: Option<String>,
        /// Use a fixed facts snapshot instead of probing the host
        #[arg(long)]
        facts_file: Option<PathBuf>,
        /// Tokenizer: `o200k`, `bytes`, or a path to a model dir / tokenizer.json
        #[arg(long)]
        model: Option<String>,
        /// Tool definitions; must be the file the model was compiled with
        #[arg(long)]
        tools_json: Option<PathBuf>,
    },
    /// Decode raw model output into an action
    Decode {
        /// Read from a file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print the system facts the model would see
    Facts {
        #[arg(long)]
        facts_file: Option<PathBuf>,
        /// Print JSON instead of the prompt block
        #[arg(long)]
        json: bool,
    },
    /// Replay evaluation cases against a running server
    Evaluate {
        /// JSONL file of `{query, expect, category}` cases
        #[arg(long, default_value = "templates/eval_cases.jsonl")]
        cases: PathBuf,
        /// Server base URL (defaults to server.addr)
        #[arg(long)]
        server: Option<String>,
        /// Report path
        #[arg(long, default_value = "eval_report.json")]
        output: PathBuf,
    },
    /// Write one training plan per hyperparameter grid point
    Sweep {
        #[arg(long, value_enum, default_value = "quick")]
        preset: SweepPreset,
        /// Directory produced by `compile`
        #[arg(long, alias = "data-dir", default_value = "compiled")]
        data: PathBuf,
        #[arg(long, default_value = "sweep")]
        output: PathBuf,
        #[command(flatten)]
        hyper: Hyper,
    },
}

impl Hyper {
    fn overrides(&self) -> cli::Overrides {
        cli::Overrides {
            model: self.model.clone(),
            max_length: self.max_length,
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            lora_r: self.lora_r,
            lora_alpha: self.lora_alpha,
            batch_size: self.batch_size,
            tools_json: self.tools_json.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let cli = Cli::parse();
    let mut cfg = config::Config::load_or_default(cli.config.as_deref()).await?;
    info!(tokenizer = %cfg.model.tokenizer, "configuration loaded");

    match cli.command {
        Command::Compile {
            data,
            output,
            eval_fraction,
            seed,
            hyper,
        } => {
            cli::Overrides {
                eval_fraction,
                seed,
                ..hyper.overrides()
            }
            .apply(&mut cfg)?;
            cli::compile(&cfg, &data, &output).await
        }
        Command::Serve {
            addr,
            backend,
            facts_file,
            model,
            tools_json,
        } => {
            if let Some(addr) = addr {
                cfg.server.addr = addr;
            }
            if let Some(backend) = backend {
                cfg.server.backend_url = backend;
            }
            cli::Overrides {
                model,
                tools_json,
                ..Default::default()
            }
            .apply(&mut cfg)?;
            cli::serve(&cfg, facts_file.as_deref()).await
        }
        Command::Decode { file } => cli::decode(file.as_deref()).await,
        Command::Facts { facts_file, json } => cli::facts(&cfg, facts_file.as_deref(), json).await,
        Command::Evaluate {
            cases,
            server,
            output,
        } => cli::evaluate(&cfg, server.as_deref(), &cases, &output).await,
        Command::Sweep {
            preset,
            data,
            output,
            hyper,
        } => {
            hyper.overrides().apply(&mut cfg)?;
            cli::sweep(&cfg, preset, &data, &output).await
        }
    }
}
