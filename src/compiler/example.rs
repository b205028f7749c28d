use serde::{Deserialize, Serialize};

/// Label value ignored by the loss.
pub const IGNORE_INDEX: i64 = -100;

/// One training row; every vector has exactly `max_length` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u8>,
    pub labels: Vec<i64>,
    /// Tokens belonging to the prompt (masked out of the loss).
    #[serde(skip)]
    pub prompt_length: usize,
}

impl CompiledExample {
    /// Build a padded row from already-truncated `tokens`.
    ///
    /// Labels copy the token ids from `prompt_length` on, except tokens
    /// equal to `pad_id`; the prompt and the padding are [`IGNORE_INDEX`].
    pub fn from_tokens(
        mut tokens: Vec<u32>,
        prompt_length: usize,
        max_length: usize,
        pad_id: u32,
    ) -> Self {
        tokens.truncate(max_length);
        let real = tokens.len();

        let mut labels: Vec<i64> = tokens
            .iter()
            .enumerate()
            .map(|(i, &id)| {
                if i < prompt_length || id == pad_id {
                    IGNORE_INDEX
                } else {
                    i64::from(id)
                }
            })
            .collect();
        labels.resize(max_length, IGNORE_INDEX);

        let mut attention_mask = vec![1u8; real];
        attention_mask.resize(max_length, 0);

        tokens.resize(max_length, pad_id);

        Self {
            input_ids: tokens,
            attention_mask,
            labels,
            prompt_length,
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of non-padding positions.
    pub fn real_length(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }

    /// Token ids that contribute to the loss, in order.
    pub fn target_ids(&self) -> Vec<u32> {
        self.labels
            .iter()
            .filter(|&&l| l != IGNORE_INDEX)
            .map(|&l| l as u32)
            .collect()
    }
}
