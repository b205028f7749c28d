use std::path::Path;

use tokenizers::Tokenizer;
use tracing::debug;

use super::TokenEncoder;

/// The model's own `tokenizer.json`, via the `tokenizers` crate.
pub struct HfEncoder {
    tokenizer: Tokenizer,
    pad_id: u32,
}

impl HfEncoder {
    pub fn from_file(path: &Path, pad_token: &str) -> anyhow::Result<Self> {
        let mut tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer {}: {e}", path.display()))?;
        // Padding and truncation are applied by the compiler, never here.
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(None)
            .map_err(|e| anyhow::anyhow!("failed to disable truncation: {e}"))?;

        let pad_id = tokenizer
            .token_to_id(pad_token)
            .ok_or_else(|| anyhow::anyhow!("pad token `{pad_token}` not in vocabulary"))?;
        debug!(path = %path.display(), pad_id, "tokenizer loaded");
        Ok(Self { tokenizer, pad_id })
    }
}

impl TokenEncoder for HfEncoder {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn encode(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, add_special_tokens)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> anyhow::Result<String> {
        self.tokenizer
            .decode(ids, false)
            .map_err(|e| anyhow::anyhow!("detokenization failed: {e}"))
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_id
    }

    fn single_token_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }
}
