use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Tokenizer and special-token settings shared by compile and serve.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// `o200k`, `bytes`, or a path to a model dir / `tokenizer.json`.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
    /// Base model handed to the external trainer.
    #[serde(default = "default_base_model")]
    pub base_model: String,
    /// Must differ from the template's end-of-turn marker.
    #[serde(default = "default_pad_token")]
    pub pad_token: String,
    /// Applied identically to prompt and full-text tokenization.
    #[serde(default)]
    pub add_special_tokens: bool,
    /// JSON array of tool definitions replacing the built-in shell tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_file: Option<String>,
}

fn default_tokenizer() -> String {
    "o200k".to_string()
}

fn default_base_model() -> String {
    "vendor/models/SmolLM3-3B".to_string()
}

fn default_pad_token() -> String {
    "<|endoftext|>".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            tokenizer: default_tokenizer(),
            base_model: default_base_model(),
            pad_token: default_pad_token(),
            add_special_tokens: false,
            tools_file: None,
        }
    }
}

/// Example compilation and dataset split.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CompileConfig {
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Fraction held out for evaluation; `0` disables evaluation.
    #[serde(default = "default_eval_fraction")]
    pub eval_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_max_length() -> usize {
    768
}

fn default_eval_fraction() -> f64 {
    crate::dataset::DEFAULT_EVAL_FRACTION
}

fn default_seed() -> u64 {
    crate::dataset::DEFAULT_SEED
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            eval_fraction: default_eval_fraction(),
            seed: default_seed(),
        }
    }
}

/// Hyperparameters written into the training plan.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_lora_r")]
    pub lora_r: u32,
    #[serde(default = "default_lora_alpha")]
    pub lora_alpha: u32,
    #[serde(default = "default_lora_dropout")]
    pub lora_dropout: f64,
    #[serde(default = "default_target_modules")]
    pub target_modules: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Batch size after gradient accumulation.
    #[serde(default = "default_effective_batch_size")]
    pub effective_batch_size: u32,
    #[serde(default = "default_warmup_ratio")]
    pub warmup_ratio: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    #[serde(default = "default_lr_scheduler")]
    pub lr_scheduler: String,
}

fn default_epochs() -> u32 {
    5
}

fn default_learning_rate() -> f64 {
    1e-4
}

fn default_lora_r() -> u32 {
    32
}

fn default_lora_alpha() -> u32 {
    64
}

fn default_lora_dropout() -> f64 {
    0.05
}

fn default_target_modules() -> Vec<String> {
    ["q_proj", "k_proj", "v_proj", "o_proj", "gate_proj", "up_proj", "down_proj"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_batch_size() -> u32 {
    1
}

fn default_effective_batch_size() -> u32 {
    8
}

fn default_warmup_ratio() -> f64 {
    0.1
}

fn default_weight_decay() -> f64 {
    0.01
}

fn default_lr_scheduler() -> String {
    "cosine".to_string()
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            lora_r: default_lora_r(),
            lora_alpha: default_lora_alpha(),
            lora_dropout: default_lora_dropout(),
            target_modules: default_target_modules(),
            batch_size: default_batch_size(),
            effective_batch_size: default_effective_batch_size(),
            warmup_ratio: default_warmup_ratio(),
            weight_decay: default_weight_decay(),
            lr_scheduler: default_lr_scheduler(),
        }
    }
}

/// HTTP server and generation settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Base URL of the completion backend serving the fine-tuned model.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Serve a fixed facts snapshot instead of probing the host.
    #[serde(default)]
    pub facts_file: Option<String>,
}

fn default_addr() -> String {
    "127.0.0.1:8765".to_string()
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_max_tokens() -> usize {
    256
}

fn default_temperature() -> f32 {
    0.3
}

fn default_top_p() -> f32 {
    0.9
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            backend_url: default_backend_url(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            timeout_secs: default_timeout_secs(),
            facts_file: None,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        self.addr
            .parse()
            .with_context(|| format!("config: invalid server.addr `{}`", self.addr))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Live system-fact probing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FactsConfig {
    #[serde(default = "default_ping_host")]
    pub ping_host: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_ping_host() -> String {
    "archlinux.org".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            ping_host: default_ping_host(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Top-level configuration loaded from `config.yaml`. Every section is
/// optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub compile: CompileConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub facts: FactsConfig,
}

impl Config {
    /// Parse and validate YAML text.
    pub fn from_yaml(contents: &str) -> anyhow::Result<Config> {
        let config: Config =
            serde_yaml_ng::from_str(contents).context("failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML configuration file.
    pub async fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::from_yaml(&contents)
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load `path` when given; otherwise the default file under the app
    /// home, falling back to built-in defaults when that file is absent.
    pub async fn load_or_default(path: Option<&Path>) -> anyhow::Result<Config> {
        if let Some(path) = path {
            return Self::load(path).await;
        }
        let default_path = crate::app_home().join("config.yaml");
        if tokio::fs::try_exists(&default_path).await.unwrap_or(false) {
            Self::load(&default_path).await
        } else {
            tracing::debug!(path = %default_path.display(), "no config file, using defaults");
            Ok(Config::default())
        }
    }

    /// Validate semantic constraints that serde cannot enforce.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model.tokenizer.trim().is_empty() {
            anyhow::bail!("config: model.tokenizer must not be empty");
        }
        if self.model.pad_token.is_empty() {
            anyhow::bail!("config: model.pad_token must not be empty");
        }

        if self.compile.max_length == 0 {
            anyhow::bail!("config: compile.max_length must be greater than zero");
        }
        if !(0.0..1.0).contains(&self.compile.eval_fraction) {
            anyhow::bail!(
                "config: compile.eval_fraction must be in [0, 1), got {}",
                self.compile.eval_fraction
            );
        }

        let t = &self.training;
        if t.epochs == 0 {
            anyhow::bail!("config: training.epochs must be at least 1");
        }
        if t.learning_rate <= 0.0 {
            anyhow::bail!("config: training.learning_rate must be positive");
        }
        if t.lora_r == 0 || t.lora_alpha == 0 {
            anyhow::bail!("config: training.lora_r and training.lora_alpha must be positive");
        }
        if t.batch_size == 0 || t.effective_batch_size < t.batch_size {
            anyhow::bail!(
                "config: training.batch_size ({}) must be in 1..=effective_batch_size ({})",
                t.batch_size,
                t.effective_batch_size
            );
        }
        if !(0.0..1.0).contains(&t.lora_dropout) || !(0.0..1.0).contains(&t.warmup_ratio) {
            anyhow::bail!("config: training.lora_dropout and training.warmup_ratio must be in [0, 1)");
        }

        let s = &self.server;
        s.socket_addr()?;
        if !(s.backend_url.starts_with("http://") || s.backend_url.starts_with("https://")) {
            anyhow::bail!("config: server.backend_url must be an http(s) URL");
        }
        if s.max_tokens == 0 {
            anyhow::bail!("config: server.max_tokens must be greater than zero");
        }
        if s.temperature < 0.0 {
            anyhow::bail!("config: server.temperature must not be negative");
        }
        if !(s.top_p > 0.0 && s.top_p <= 1.0) {
            anyhow::bail!("config: server.top_p must be in (0, 1], got {}", s.top_p);
        }
        if s.timeout_secs == 0 {
            anyhow::bail!("config: server.timeout_secs=0 would fail every request");
        }

        if self.facts.probe_timeout_secs == 0 {
            anyhow::bail!("config: facts.probe_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Serialize and write the configuration back to a YAML file.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_yaml_ng::to_string(self).context("serialize config YAML")?;
        tokio::fs::write(path, &contents)
            .await
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}
