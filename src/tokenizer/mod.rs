//! Tokenizer seam.
//!
//! Three backends implement [`TokenEncoder`]:
//! - [`HfEncoder`]: a HuggingFace `tokenizer.json` (the model's own);
//! - [`TiktokenEncoder`]: `o200k_base` BPE, bundled and offline;
//! - [`ByteEncoder`]: one token per byte, for dry runs.

mod bytes;
mod hf;
mod tiktoken;

use std::path::Path;
use std::sync::Arc;

pub use bytes::ByteEncoder;
pub use hf::HfEncoder;
pub use tiktoken::TiktokenEncoder;

/// Text ↔ token ids.
///
/// `add_special_tokens` controls backend-specific extras (BOS/EOS, special
/// token recognition). Callers that compare token sequences must pass the
/// same value on both sides.
pub trait TokenEncoder: Send + Sync {
    fn name(&self) -> &str;

    fn encode(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>>;

    /// Decode ids back to text, keeping special tokens verbatim.
    fn decode(&self, ids: &[u32]) -> anyhow::Result<String>;

    fn pad_token_id(&self) -> u32;

    /// Id of `token` when it encodes to exactly one id.
    fn single_token_id(&self, token: &str) -> Option<u32> {
        match self.encode(token, true) {
            Ok(ids) if ids.len() == 1 => Some(ids[0]),
            _ => None,
        }
    }
}

/// Resolve `--model` into an encoder.
///
/// `o200k` and `bytes` select the built-in backends; anything else is a
/// path to a `tokenizer.json` or a directory containing one.
pub fn load(model: &str, pad_token: &str) -> anyhow::Result<Arc<dyn TokenEncoder>> {
    match model {
        "o200k" => Ok(Arc::new(TiktokenEncoder::o200k(pad_token)?)),
        "bytes" => Ok(Arc::new(ByteEncoder::new())),
        path => {
            let path = Path::new(path);
            let file = if path.is_dir() {
                path.join("tokenizer.json")
            } else {
                path.to_path_buf()
            };
            if !file.exists() {
                anyhow::bail!("tokenizer not found: {}", file.display());
            }
            Ok(Arc::new(HfEncoder::from_file(&file, pad_token)?))
        }
    }
}
