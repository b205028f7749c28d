//! Supervised-example compiler.
//!
//! Turns a conversation plus the desired [`Action`] into fixed-length
//! `(input_ids, attention_mask, labels)` rows where only the assistant
//! target contributes to the loss.
//!
//! The prompt and the full text are rendered through the same
//! [`Prompter`] and tokenized with the same special-token setting; the
//! prompt's token sequence must be an exact prefix of the full sequence,
//! otherwise the example is dropped instead of being trained with a
//! shifted mask.

mod example;

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::action::Action;
use crate::conversation::{Conversation, Role};
use crate::dataset::records::TrainingExample;
use crate::prompt::Prompter;
use crate::template::TemplateError;
use crate::tokenizer::TokenEncoder;

pub use example::{CompiledExample, IGNORE_INDEX};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("transcript has no final assistant turn to train on")]
    NoTarget,
    #[error("template failure: {0}")]
    TemplateFailure(#[from] TemplateError),
    #[error("rendered prompt is not a text prefix of the full example")]
    PromptNotPrefix,
    #[error("prompt tokens diverge from full-text tokens at position {position}")]
    TokenBoundary { position: usize },
    #[error("prompt takes {prompt_tokens} tokens, leaving no target within max_length {max_length}")]
    PromptOverflow {
        prompt_tokens: usize,
        max_length: usize,
    },
    #[error("tokenizer: {0}")]
    Tokenizer(String),
}

impl CompileError {
    /// Stable short name used as the drop-count key.
    pub fn reason(&self) -> &'static str {
        match self {
            CompileError::NoTarget => "no_target",
            CompileError::TemplateFailure(_) => "template_failure",
            CompileError::PromptNotPrefix => "prompt_not_prefix",
            CompileError::TokenBoundary { .. } => "token_boundary",
            CompileError::PromptOverflow { .. } => "prompt_overflow",
            CompileError::Tokenizer(_) => "tokenizer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerOptions {
    pub max_length: usize,
    pub add_special_tokens: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            max_length: 768,
            add_special_tokens: false,
        }
    }
}

/// Per-run compile outcome counts.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CompileStats {
    pub total: usize,
    pub compiled: usize,
    pub dropped: BTreeMap<String, usize>,
}

impl CompileStats {
    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }
}

pub struct ExampleCompiler {
    prompter: Prompter,
    encoder: Arc<dyn TokenEncoder>,
    options: CompilerOptions,
}

impl ExampleCompiler {
    /// Fails when the options are unusable or the pad token would swallow
    /// the end-of-turn marker (labels equal to the pad id are masked, so the
    /// model would never learn to stop).
    pub fn new(
        prompter: Prompter,
        encoder: Arc<dyn TokenEncoder>,
        options: CompilerOptions,
    ) -> anyhow::Result<Self> {
        if options.max_length == 0 {
            anyhow::bail!("max_length must be greater than zero");
        }
        let eot = prompter.template().end_of_turn();
        if encoder.single_token_id(eot) == Some(encoder.pad_token_id()) {
            anyhow::bail!(
                "pad token id {} is the end-of-turn marker `{eot}`; choose a distinct pad token",
                encoder.pad_token_id()
            );
        }
        Ok(Self {
            prompter,
            encoder,
            options,
        })
    }

    pub fn options(&self) -> CompilerOptions {
        self.options
    }

    /// Compile `conversation` with `expected` as the assistant target.
    pub fn compile(
        &self,
        conversation: &Conversation,
        expected: &Action,
    ) -> Result<CompiledExample, CompileError> {
        self.compile_target(conversation, &expected.to_target_text())
    }

    /// Compile a transcript whose final assistant turn is the target.
    pub fn compile_transcript(
        &self,
        transcript: &Conversation,
    ) -> Result<CompiledExample, CompileError> {
        match transcript.split_last() {
            Some((history, last)) if last.role == Role::Assistant => {
                self.compile_target(&history, &last.content)
            }
            _ => Err(CompileError::NoTarget),
        }
    }

    /// Compile one loaded training record. Records without an expected
    /// response are compiled as transcripts.
    pub fn compile_example(
        &self,
        example: &TrainingExample,
    ) -> Result<CompiledExample, CompileError> {
        let conversation =
            Conversation::from_messages(example.system_context.clone(), &example.messages)?;
        match &example.expected {
            Some(expected) => self.compile(&conversation, expected),
            None => self.compile_transcript(&conversation),
        }
    }

    /// Compile all examples in parallel. Output order follows input order;
    /// failures are dropped and counted by reason.
    pub fn compile_all(&self, examples: &[TrainingExample]) -> (Vec<CompiledExample>, CompileStats) {
        let results: Vec<Result<CompiledExample, CompileError>> = examples
            .par_iter()
            .map(|ex| self.compile_example(ex))
            .collect();

        let mut stats = CompileStats {
            total: examples.len(),
            ..Default::default()
        };
        let mut compiled = Vec::with_capacity(results.len());
        for (example, result) in examples.iter().zip(results) {
            match result {
                Ok(row) => compiled.push(row),
                Err(e) => {
                    warn!(origin = %example.origin, reason = e.reason(), error = %e, "dropping example");
                    *stats.dropped.entry(e.reason().to_string()).or_default() += 1;
                }
            }
        }
        stats.compiled = compiled.len();
        debug!(
            total = stats.total,
            compiled = stats.compiled,
            dropped = stats.dropped_total(),
            "compile finished"
        );
        (compiled, stats)
    }

    fn compile_target(
        &self,
        conversation: &Conversation,
        target: &str,
    ) -> Result<CompiledExample, CompileError> {
        let prompt_text = self.prompter.render_prompt(conversation)?;
        let full_text = self.prompter.render_full(conversation, target)?;
        if !full_text.starts_with(&prompt_text) {
            return Err(CompileError::PromptNotPrefix);
        }

        let add_special = self.options.add_special_tokens;
        let prompt_ids = self.encode(&prompt_text, add_special)?;
        let mut full_ids = self.encode(&full_text, add_special)?;

        if let Some(position) = prompt_ids
            .iter()
            .zip(&full_ids)
            .position(|(p, f)| p != f)
        {
            return Err(CompileError::TokenBoundary { position });
        }
        if prompt_ids.len() >= full_ids.len() {
            return Err(CompileError::TokenBoundary {
                position: full_ids.len(),
            });
        }

        let prompt_len = prompt_ids.len();
        let max_length = self.options.max_length;
        full_ids.truncate(max_length);
        if prompt_len >= full_ids.len() {
            return Err(CompileError::PromptOverflow {
                prompt_tokens: prompt_len,
                max_length,
            });
        }

        Ok(CompiledExample::from_tokens(
            full_ids,
            prompt_len,
            max_length,
            self.encoder.pad_token_id(),
        ))
    }

    fn encode(&self, text: &str, add_special: bool) -> Result<Vec<u32>, CompileError> {
        self.encoder
            .encode(text, add_special)
            .map_err(|e| CompileError::Tokenizer(format!("{e:#}")))
    }
}
