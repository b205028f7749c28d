//! Inference pipeline: request → prompt → generation → decode → verify.
//!
//! Generation is serialized per engine (one model instance, one request at
//! a time); everything after generation is pure and runs concurrently.
//! System facts are re-read for every request.

mod completion;
mod wire;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn, Instrument};

use crate::conversation::Conversation;
use crate::decoder::{self, DecodeError};
use crate::facts::{FactsSource, SystemFacts};
use crate::prompt::Prompter;
use crate::template::TemplateError;
use crate::tokenizer::TokenEncoder;
use crate::verifier::{verify, ValidDeviceSet, VerifiedAction};

pub use completion::CompletionServer;
pub use wire::{QueryRequest, QueryResponse};

/// Sampling settings for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub stop: Vec<String>,
}

/// The model: prompt token ids in, generated token ids out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt_ids: &[u32],
        params: &GenerationParams,
    ) -> anyhow::Result<Vec<u32>>;
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("request has no messages")]
    EmptyRequest,
    #[error("template: {0}")]
    Template(#[from] TemplateError),
    #[error("tokenizer: {0}")]
    Tokenizer(String),
    #[error("generation backend: {0}")]
    Backend(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl EngineError {
    /// Short machine-readable failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::EmptyRequest => "empty_request",
            EngineError::Template(_) => "template_failure",
            EngineError::Tokenizer(_) => "tokenizer",
            EngineError::Backend(_) => "backend",
            EngineError::Timeout(_) => "timeout",
            EngineError::Decode(DecodeError::MalformedToolCall { .. }) => "malformed_tool_call",
            EngineError::Decode(DecodeError::EmptyResponse) => "empty_response",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout: Duration,
    pub add_special_tokens: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.3,
            top_p: 0.9,
            timeout: Duration::from_secs(120),
            add_special_tokens: false,
        }
    }
}

/// Successful pipeline output.
#[derive(Debug, Clone)]
pub struct Reply {
    pub verified: VerifiedAction,
    /// Detokenized model output, before decoding.
    pub raw: String,
}

pub struct InferenceEngine {
    prompter: Prompter,
    encoder: Arc<dyn TokenEncoder>,
    generator: Arc<dyn TextGenerator>,
    facts: Arc<dyn FactsSource>,
    settings: EngineSettings,
    generation_lock: Mutex<()>,
}

impl InferenceEngine {
    pub fn new(
        prompter: Prompter,
        encoder: Arc<dyn TokenEncoder>,
        generator: Arc<dyn TextGenerator>,
        facts: Arc<dyn FactsSource>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            prompter,
            encoder,
            generator,
            facts,
            settings,
            generation_lock: Mutex::new(()),
        }
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub fn tokenizer_name(&self) -> &str {
        self.encoder.name()
    }

    pub async fn facts_snapshot(&self) -> SystemFacts {
        self.facts.snapshot().await
    }

    /// Run the full pipeline and map the outcome onto the wire shape.
    pub async fn query(&self, request: &QueryRequest) -> QueryResponse {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("query", %request_id);
        async {
            match self.respond(request).await {
                Ok(reply) => QueryResponse::from_verified(&reply.verified),
                Err(e) => {
                    warn!(kind = e.kind(), error = %e, "query failed");
                    QueryResponse::failure(&e)
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn respond(&self, request: &QueryRequest) -> Result<Reply, EngineError> {
        if request.messages.is_empty() {
            return Err(EngineError::EmptyRequest);
        }

        let facts = self.facts.snapshot().await;
        let valid = ValidDeviceSet::from_facts(&facts);
        let context = request
            .system_context
            .clone()
            .unwrap_or_else(|| facts.format_system_context());

        let conversation = Conversation::from_messages(Some(context), &request.messages)?;
        let prompt = self.prompter.render_prompt(&conversation)?;
        let prompt_ids = self
            .encoder
            .encode(&prompt, self.settings.add_special_tokens)
            .map_err(|e| EngineError::Tokenizer(format!("{e:#}")))?;

        let params = GenerationParams {
            max_tokens: request
                .max_tokens
                .unwrap_or(self.settings.max_tokens)
                .clamp(1, self.settings.max_tokens.max(1)),
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            stop: vec![self.prompter.template().end_of_turn().to_string()],
        };

        let generated = {
            let _guard = self.generation_lock.lock().await;
            debug!(prompt_tokens = prompt_ids.len(), max_tokens = params.max_tokens, "generating");
            match tokio::time::timeout(
                self.settings.timeout,
                self.generator.generate(&prompt_ids, &params),
            )
            .await
            {
                Ok(Ok(ids)) => ids,
                Ok(Err(e)) => return Err(EngineError::Backend(format!("{e:#}"))),
                Err(_) => return Err(EngineError::Timeout(self.settings.timeout)),
            }
        };

        let raw = self
            .encoder
            .decode(&generated)
            .map_err(|e| EngineError::Tokenizer(format!("{e:#}")))?;
        let action = decoder::decode(&raw)?;
        let verified = verify(action, &valid);

        match &verified.downgrade {
            Some(d) => warn!(blocked = ?d.blocked, "blocked command naming unknown devices"),
            None => info!(
                kind = ?verified.action.kind(),
                generated_tokens = generated.len(),
                "query answered"
            ),
        }
        Ok(Reply { verified, raw })
    }
}
