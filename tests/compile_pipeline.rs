//! Integration tests: records → compiled rows → split, and the decode side
//! of the same format.

use std::sync::Arc;

use installer_llm::action::Action;
use installer_llm::compiler::{CompileError, CompilerOptions, ExampleCompiler, IGNORE_INDEX};
use installer_llm::conversation::{Conversation, Turn};
use installer_llm::dataset::{self, records};
use installer_llm::decoder;
use installer_llm::prompt::Prompter;
use installer_llm::template::ChatMlTemplate;
use installer_llm::tokenizer::{ByteEncoder, TokenEncoder};

const LSBLK_RECORD: &str = r###"{"system_context": "## Available Disks\n\n- /dev/sda: 500G (Samsung SSD 870)", "messages": [{"role": "user", "content": "list disks"}], "expected_response": {"type": "command", "command": "lsblk"}}"###;

fn prompter() -> Prompter {
    Prompter::new(Arc::new(ChatMlTemplate::new()))
}

fn compiler_with(encoder: Arc<dyn TokenEncoder>, add_special_tokens: bool) -> ExampleCompiler {
    ExampleCompiler::new(
        prompter(),
        encoder,
        CompilerOptions {
            max_length: 4096,
            add_special_tokens,
        },
    )
    .unwrap()
}

fn byte_compiler() -> ExampleCompiler {
    compiler_with(Arc::new(ByteEncoder::new()), false)
}

/// Byte encoder that appends an end-of-sequence id when asked for special
/// tokens, so a prompt encoding is never a prefix of the full encoding.
struct EosAppending;

impl TokenEncoder for EosAppending {
    fn name(&self) -> &str {
        "eos-appending"
    }

    fn encode(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
        let mut ids: Vec<u32> = text.bytes().map(|b| u32::from(b) + 2).collect();
        if add_special_tokens {
            ids.push(1);
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> anyhow::Result<String> {
        let bytes: Vec<u8> = ids.iter().filter(|&&i| i >= 2).map(|&i| (i - 2) as u8).collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn pad_token_id(&self) -> u32 {
        0
    }
}

#[test]
fn labels_mask_prompt_and_cover_target() {
    let example = records::parse_record(LSBLK_RECORD, "inline:1").unwrap();
    let row = byte_compiler().compile_example(&example).unwrap();

    assert_eq!(row.input_ids.len(), 4096);
    assert_eq!(row.labels.len(), 4096);
    assert_eq!(row.attention_mask.len(), 4096);

    let p = row.prompt_length;
    assert!(p > 0);
    assert!(row.labels[..p].iter().all(|&l| l == IGNORE_INDEX));

    let real = row.real_length();
    assert!(real > p);
    assert!(row.labels[p..real].iter().all(|&l| l != IGNORE_INDEX));
    assert!(row.labels[real..].iter().all(|&l| l == IGNORE_INDEX));
    assert!(row.attention_mask[real..].iter().all(|&m| m == 0));
}

#[test]
fn compiled_lsblk_target_decodes_back_to_the_command() {
    let example = records::parse_record(LSBLK_RECORD, "inline:1").unwrap();
    let row = byte_compiler().compile_example(&example).unwrap();

    let target_text = ByteEncoder::new().decode(&row.target_ids()).unwrap();
    assert!(target_text.contains("<tool_call>"));
    assert!(target_text.trim_end().ends_with("<|im_end|>"));

    let action = decoder::decode(&target_text).unwrap();
    assert_eq!(action, Action::command("lsblk", None).unwrap());
}

#[test]
fn transcript_and_action_compile_identically() {
    let compiler = byte_compiler();
    let history = Conversation::new(None, vec![Turn::user("list disks")]);
    let action = Action::command("lsblk", None).unwrap();

    let from_action = compiler.compile(&history, &action).unwrap();
    let transcript = history.with_trailing(Turn::assistant(action.to_target_text()));
    let from_transcript = compiler.compile_transcript(&transcript).unwrap();

    assert_eq!(from_action, from_transcript);
}

#[test]
fn transcript_without_assistant_target_is_rejected() {
    let transcript = Conversation::new(None, vec![Turn::user("hello")]);
    assert_eq!(
        byte_compiler().compile_transcript(&transcript).unwrap_err(),
        CompileError::NoTarget
    );
}

#[test]
fn consistent_special_tokens_keep_the_prompt_prefix() {
    let example = records::parse_record(LSBLK_RECORD, "inline:1").unwrap();
    let encoder = ByteEncoder::new();
    let bos = encoder.bos_token_id();
    let row = compiler_with(Arc::new(encoder), true)
        .compile_example(&example)
        .unwrap();
    assert_eq!(row.input_ids[0], bos);
    assert_eq!(row.labels[0], IGNORE_INDEX);
}

#[test]
fn inconsistent_special_tokens_are_a_token_boundary_error() {
    let example = records::parse_record(LSBLK_RECORD, "inline:1").unwrap();
    let err = compiler_with(Arc::new(EosAppending), true)
        .compile_example(&example)
        .unwrap_err();
    assert!(matches!(err, CompileError::TokenBoundary { .. }), "{err:?}");
    assert_eq!(err.reason(), "token_boundary");
}

#[test]
fn whitespace_only_thinking_is_absent_everywhere() {
    let line = r#"{"messages": [{"role": "user", "content": "hi"}], "expected_response": {"type": "text", "response": "Hello!", "thinking": "  \n "}}"#;
    let example = records::parse_record(line, "inline:1").unwrap();
    assert_eq!(example.expected.as_ref().unwrap().thinking(), None);

    let row = byte_compiler().compile_example(&example).unwrap();
    let target_text = ByteEncoder::new().decode(&row.target_ids()).unwrap();
    assert!(!target_text.contains("<think>"));

    let decoded = decoder::decode("<think>   </think>Hello!").unwrap();
    assert_eq!(decoded, Action::text("Hello!", None).unwrap());
}

#[test]
fn assemble_is_deterministic_for_a_seed() {
    let items: Vec<usize> = (0..50).collect();
    let a = dataset::assemble(items.clone(), 0.1, 42).unwrap();
    let b = dataset::assemble(items.clone(), 0.1, 42).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.eval.len(), 5);
    assert_eq!(a.train.len(), 45);

    let none = dataset::assemble(items, 0.0, 42).unwrap();
    assert!(!none.has_eval());
    assert_eq!(none.train.len(), 50);
}

#[test]
fn compile_all_drops_overflowing_examples_and_keeps_order() {
    let short = records::parse_record(LSBLK_RECORD, "a:1").unwrap();
    let long_line = format!(
        r#"{{"messages": [{{"role": "user", "content": "{}"}}], "expected_response": {{"type": "text", "response": "ok"}}}}"#,
        "x".repeat(5000)
    );
    let long = records::parse_record(&long_line, "a:2").unwrap();

    let (rows, stats) = byte_compiler().compile_all(&[short.clone(), long, short]);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], rows[1]);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.compiled, 2);
    assert_eq!(stats.dropped.get("prompt_overflow"), Some(&1));
}

#[tokio::test]
async fn compile_command_writes_trainer_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    let mut lines: Vec<String> = (0..20).map(|_| LSBLK_RECORD.to_string()).collect();
    lines.push("not json".into());
    std::fs::write(data.join("disks.jsonl"), lines.join("\n")).unwrap();

    let mut config = installer_llm::config::Config::default();
    config.model.tokenizer = "bytes".into();
    config.compile.max_length = 4096;
    let out = dir.path().join("out");

    installer_llm::cli::compile(&config, &data, &out).await.unwrap();

    let train = std::fs::read_to_string(out.join("train.jsonl")).unwrap();
    let eval = std::fs::read_to_string(out.join("eval.jsonl")).unwrap();
    assert_eq!(train.lines().count(), 18);
    assert_eq!(eval.lines().count(), 2);

    let stats: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("compile_stats.json")).unwrap()).unwrap();
    assert_eq!(stats["records_skipped"], 1);
    assert_eq!(stats["compiled"], 20);

    let plan: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("training_plan.json")).unwrap()).unwrap();
    assert_eq!(plan["eval_strategy"], "epoch");
    assert_eq!(plan["train_examples"], 18);
}

#[tokio::test]
async fn compile_command_rejects_empty_dataset() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("empty.jsonl"), "\n\n").unwrap();
    let mut config = installer_llm::config::Config::default();
    config.model.tokenizer = "bytes".into();

    let err = installer_llm::cli::compile(&config, dir.path(), &dir.path().join("out"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no usable training records"));
}
