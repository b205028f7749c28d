//! Training-plan manifests for the external LoRA trainer, and
//! hyperparameter sweep grids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;

/// The knobs a sweep varies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparams {
    pub epochs: u32,
    pub learning_rate: f64,
    pub lora_r: u32,
    pub lora_alpha: u32,
}

impl Hyperparams {
    pub fn from_config(training: &TrainingConfig) -> Self {
        Self {
            epochs: training.epochs,
            learning_rate: training.learning_rate,
            lora_r: training.lora_r,
            lora_alpha: training.lora_alpha,
        }
    }

    /// Adapter directory name, e.g. `r16_a32_lr2e-4_e3`.
    pub fn run_name(&self) -> String {
        format!(
            "r{}_a{}_lr{:e}_e{}",
            self.lora_r, self.lora_alpha, self.learning_rate, self.epochs
        )
    }
}

/// Everything the trainer needs besides the data files themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPlan {
    pub run_name: String,
    pub base_model: String,
    pub train_file: String,
    /// Absent when no examples were held out.
    pub eval_file: Option<String>,
    pub train_examples: usize,
    pub eval_examples: usize,
    pub max_length: usize,
    #[serde(flatten)]
    pub hyperparams: Hyperparams,
    pub lora_dropout: f64,
    pub target_modules: Vec<String>,
    pub per_device_batch_size: u32,
    pub gradient_accumulation_steps: u32,
    pub warmup_ratio: f64,
    pub weight_decay: f64,
    pub lr_scheduler_type: String,
    /// `epoch` with an eval set, otherwise `no`.
    pub eval_strategy: String,
    pub load_best_model_at_end: bool,
    pub seed: u64,
    pub created_at: DateTime<Utc>,
}

/// Inputs of [`TrainingPlan::new`] that come from the compiled dataset.
#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub train_file: String,
    pub eval_file: Option<String>,
    pub train_examples: usize,
    pub eval_examples: usize,
    pub max_length: usize,
    pub seed: u64,
}

impl TrainingPlan {
    pub fn new(
        base_model: &str,
        training: &TrainingConfig,
        hyperparams: Hyperparams,
        data: &DatasetSummary,
    ) -> Self {
        let has_eval = data.eval_examples > 0;
        let batch = training.batch_size.max(1);
        Self {
            run_name: hyperparams.run_name(),
            base_model: base_model.to_string(),
            train_file: data.train_file.clone(),
            eval_file: if has_eval { data.eval_file.clone() } else { None },
            train_examples: data.train_examples,
            eval_examples: data.eval_examples,
            max_length: data.max_length,
            hyperparams,
            lora_dropout: training.lora_dropout,
            target_modules: training.target_modules.clone(),
            per_device_batch_size: batch,
            gradient_accumulation_steps: (training.effective_batch_size / batch).max(1),
            warmup_ratio: training.warmup_ratio,
            weight_decay: training.weight_decay,
            lr_scheduler_type: training.lr_scheduler.clone(),
            eval_strategy: if has_eval { "epoch" } else { "no" }.to_string(),
            load_best_model_at_end: has_eval,
            seed: data.seed,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SweepPreset {
    Quick,
    Full,
}

struct SearchSpace {
    learning_rate: &'static [f64],
    epochs: &'static [u32],
    lora_r: &'static [u32],
    lora_alpha: &'static [u32],
}

const FULL_SEARCH: SearchSpace = SearchSpace {
    learning_rate: &[1e-4, 2e-4, 5e-4],
    epochs: &[1, 2, 3],
    lora_r: &[8, 16, 32],
    lora_alpha: &[16, 32],
};

const QUICK_SEARCH: SearchSpace = SearchSpace {
    learning_rate: &[2e-4],
    epochs: &[1, 2],
    lora_r: &[8, 16],
    lora_alpha: &[16, 32],
};

/// Cartesian grid of the preset, followed by any missing `alpha = 2 * r`
/// variants.
pub fn sweep_grid(preset: SweepPreset) -> Vec<Hyperparams> {
    let space = match preset {
        SweepPreset::Quick => &QUICK_SEARCH,
        SweepPreset::Full => &FULL_SEARCH,
    };
    let mut grid = Vec::new();
    for &learning_rate in space.learning_rate {
        for &epochs in space.epochs {
            for &lora_r in space.lora_r {
                for &lora_alpha in space.lora_alpha {
                    grid.push(Hyperparams {
                        epochs,
                        learning_rate,
                        lora_r,
                        lora_alpha,
                    });
                }
            }
        }
    }
    let mut extra: Vec<Hyperparams> = Vec::new();
    for h in &grid {
        let doubled = Hyperparams {
            lora_alpha: h.lora_r * 2,
            ..*h
        };
        if !grid.contains(&doubled) && !extra.contains(&doubled) {
            extra.push(doubled);
        }
    }
    grid.extend(extra);
    grid
}
