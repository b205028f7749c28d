//! installer_llm: fine-tuning data compiler and inference server for the
//! installation assistant model.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod action;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod conversation;
pub mod dataset;
pub mod decoder;
pub mod eval;
pub mod facts;
pub mod inference;
pub mod plan;
pub mod prompt;
pub mod server;
pub mod template;
pub mod tokenizer;
pub mod verifier;

/// Return the application home directory.
///
/// Resolution order:
/// 1. `INSTALLER_LLM_HOME` environment variable
/// 2. `$HOME/.installer-llm`
pub fn app_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("INSTALLER_LLM_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".installer-llm")
    }
}
