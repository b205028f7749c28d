//! Dataset assembly: deterministic train/eval split, batching, and
//! writing compiled rows for an external trainer.

pub mod records;

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::compiler::CompiledExample;

pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_EVAL_FRACTION: f64 = 0.1;

/// Result of [`assemble`]. Indices refer to positions in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplit<T> {
    pub train: Vec<T>,
    pub eval: Vec<T>,
    pub train_indices: Vec<usize>,
    pub eval_indices: Vec<usize>,
}

impl<T> DatasetSplit<T> {
    pub fn has_eval(&self) -> bool {
        !self.eval.is_empty()
    }
}

impl DatasetSplit<CompiledExample> {
    /// Fixed-size batches over the train rows; the last may be short.
    pub fn train_batches(&self, batch_size: usize) -> impl Iterator<Item = Batch> + '_ {
        self.train.chunks(batch_size.max(1)).map(Batch::stack)
    }
}

/// Number of eval rows for `n` examples.
pub fn eval_size(n: usize, eval_fraction: f64) -> usize {
    if eval_fraction <= 0.0 || n < 2 {
        return 0;
    }
    // Tolerate float error so 100 * 0.1 stays 10.
    let raw = (n as f64 * eval_fraction - 1e-9).ceil() as usize;
    raw.clamp(1, n - 1)
}

/// Shuffle with `seed` and split off `eval_fraction` of the rows.
///
/// The same input and seed always give the same partition;
/// `eval_fraction == 0` gives an empty eval set.
pub fn assemble<T>(examples: Vec<T>, eval_fraction: f64, seed: u64) -> anyhow::Result<DatasetSplit<T>> {
    if !(0.0..1.0).contains(&eval_fraction) {
        anyhow::bail!("eval_fraction must be in [0, 1), got {eval_fraction}");
    }
    let n = examples.len();
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let n_eval = eval_size(n, eval_fraction);
    let (eval_order, train_order) = order.split_at(n_eval);
    let eval_indices = eval_order.to_vec();
    let train_indices = train_order.to_vec();

    let mut slots: Vec<Option<T>> = examples.into_iter().map(Some).collect();
    let mut take = |idx: &[usize]| -> Vec<T> { idx.iter().filter_map(|&i| slots[i].take()).collect() };
    let eval = take(&eval_indices);
    let train = take(&train_indices);

    Ok(DatasetSplit {
        train,
        eval,
        train_indices,
        eval_indices,
    })
}

/// Column-stacked rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u8>>,
    pub labels: Vec<Vec<i64>>,
}

impl Batch {
    pub fn stack(rows: &[CompiledExample]) -> Self {
        Self {
            input_ids: rows.iter().map(|r| r.input_ids.clone()).collect(),
            attention_mask: rows.iter().map(|r| r.attention_mask.clone()).collect(),
            labels: rows.iter().map(|r| r.labels.clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Write rows as JSON lines. An empty slice yields an empty file.
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = std::io::BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut out, row).context("failed to serialize row")?;
        out.write_all(b"\n")?;
    }
    out.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_size_rounds_up_and_keeps_train() {
        assert_eq!(eval_size(100, 0.1), 10);
        assert_eq!(eval_size(15, 0.1), 2);
        assert_eq!(eval_size(2, 0.9), 1);
        assert_eq!(eval_size(1, 0.5), 0);
        assert_eq!(eval_size(50, 0.0), 0);
    }

    #[test]
    fn zero_fraction_keeps_everything_in_train() {
        let split = assemble((0..10).collect::<Vec<_>>(), 0.0, DEFAULT_SEED).unwrap();
        assert!(!split.has_eval());
        assert_eq!(split.train.len(), 10);
    }

    #[test]
    fn out_of_range_fraction_is_rejected() {
        assert!(assemble(vec![1, 2, 3], 1.0, 1).is_err());
        assert!(assemble(vec![1, 2, 3], -0.1, 1).is_err());
    }

    #[test]
    fn split_partitions_input() {
        let split = assemble((0..37).collect::<Vec<_>>(), 0.2, 7).unwrap();
        let mut all: Vec<i32> = split.train.iter().chain(&split.eval).copied().collect();
        all.sort();
        assert_eq!(all, (0..37).collect::<Vec<_>>());
        assert_eq!(split.eval.len(), 8);
        for (value, idx) in split.eval.iter().zip(&split.eval_indices) {
            assert_eq!(*value as usize, *idx);
        }
    }

    #[test]
    fn batches_cover_train_rows() {
        let rows: Vec<CompiledExample> = (0..5)
            .map(|i| CompiledExample::from_tokens(vec![i + 1, i + 2], 1, 4, 0))
            .collect();
        let split = assemble(rows, 0.0, 1).unwrap();
        let sizes: Vec<usize> = split.train_batches(2).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }
}
