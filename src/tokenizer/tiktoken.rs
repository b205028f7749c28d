use anyhow::Context;
use tiktoken_rs::{o200k_base, CoreBPE};

use super::TokenEncoder;

/// `o200k_base` BPE. The ranks ship with the crate, so no download is needed.
pub struct TiktokenEncoder {
    bpe: CoreBPE,
    pad_id: u32,
}

impl TiktokenEncoder {
    pub fn o200k(pad_token: &str) -> anyhow::Result<Self> {
        let bpe = o200k_base().context("failed to load o200k_base tokeniser")?;
        let ids = bpe.encode_with_special_tokens(pad_token);
        let pad_id = match ids.as_slice() {
            [id] => *id,
            _ => anyhow::bail!("pad token `{pad_token}` is not a single o200k_base token"),
        };
        Ok(Self { bpe, pad_id })
    }
}

impl TokenEncoder for TiktokenEncoder {
    fn name(&self) -> &str {
        "o200k_base"
    }

    fn encode(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
        let ids = if add_special_tokens {
            self.bpe.encode_with_special_tokens(text)
        } else {
            self.bpe.encode_ordinary(text)
        };
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> anyhow::Result<String> {
        self.bpe.decode(ids.to_vec())
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endoftext_is_pad() {
        let enc = TiktokenEncoder::o200k("<|endoftext|>").unwrap();
        assert_eq!(enc.single_token_id("<|endoftext|>"), Some(enc.pad_token_id()));
    }

    #[test]
    fn multi_token_pad_is_rejected() {
        assert!(TiktokenEncoder::o200k("not a special token").is_err());
    }

    #[test]
    fn decode_inverts_encode() {
        let enc = TiktokenEncoder::o200k("<|endoftext|>").unwrap();
        let text = "<tool_call>\n{\"name\":\"run_shell_command\"}\n</tool_call>";
        let ids = enc.encode(text, false).unwrap();
        assert_eq!(enc.decode(&ids).unwrap(), text);
    }
}
