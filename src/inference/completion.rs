//! llama.cpp-style completion backend.
//!
//! Sends token ids to `POST {base_url}/completion` and asks for the
//! generated token ids back, so detokenization happens with the same
//! tokenizer that built the prompt.
//!
//! ```yaml
//! server:
//!   backend_url: http://127.0.0.1:8080
//! ```

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{GenerationParams, TextGenerator};

pub struct CompletionServer {
    endpoint: String,
    client: Client,
}

#[derive(Deserialize)]
struct CompletionReply {
    #[serde(default)]
    tokens: Option<Vec<u32>>,
}

impl CompletionServer {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            endpoint: format!("{}/completion", base_url.trim_end_matches('/')),
            client,
        })
    }
}

#[async_trait]
impl TextGenerator for CompletionServer {
    fn name(&self) -> &str {
        "completion-server"
    }

    async fn generate(
        &self,
        prompt_ids: &[u32],
        params: &GenerationParams,
    ) -> anyhow::Result<Vec<u32>> {
        let body = json!({
            "prompt": prompt_ids,
            "n_predict": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "stop": params.stop,
            "return_tokens": true,
            "cache_prompt": true,
        });

        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("completion server returned {status}: {text}");
        }

        let reply: CompletionReply = resp
            .json()
            .await
            .context("completion server sent an unreadable body")?;
        reply
            .tokens
            .ok_or_else(|| anyhow::anyhow!("completion server did not return tokens"))
    }
}
