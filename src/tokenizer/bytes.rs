use super::TokenEncoder;

const PAD_ID: u32 = 0;
const BOS_ID: u32 = 1;
const BYTE_OFFSET: u32 = 2;

/// One token per UTF-8 byte, shifted past the pad and BOS ids.
///
/// With `add_special_tokens` every encoding starts with BOS.
#[derive(Debug, Clone, Default)]
pub struct ByteEncoder;

impl ByteEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn bos_token_id(&self) -> u32 {
        BOS_ID
    }
}

impl TokenEncoder for ByteEncoder {
    fn name(&self) -> &str {
        "bytes"
    }

    fn encode(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
        let mut ids = Vec::with_capacity(text.len() + 1);
        if add_special_tokens {
            ids.push(BOS_ID);
        }
        ids.extend(text.bytes().map(|b| u32::from(b) + BYTE_OFFSET));
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> anyhow::Result<String> {
        let mut bytes = Vec::with_capacity(ids.len());
        for &id in ids {
            match id {
                PAD_ID | BOS_ID => {}
                id if id < BYTE_OFFSET + 256 => bytes.push((id - BYTE_OFFSET) as u8),
                id => anyhow::bail!("token id {id} out of byte range"),
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn pad_token_id(&self) -> u32 {
        PAD_ID
    }

    fn single_token_id(&self, token: &str) -> Option<u32> {
        (token.len() == 1).then(|| u32::from(token.as_bytes()[0]) + BYTE_OFFSET)
    }
}
