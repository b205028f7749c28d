//! JSONL training-record loading.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::action::{Action, ExpectedResponse};
use crate::conversation::ChatMessage;

/// One line of a training `.jsonl` file.
///
/// Without `expected_response` the record is a transcript: its last
/// assistant message is the target and anything after it is ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainingRecord {
    #[serde(default)]
    pub system_context: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_response: Option<ExpectedResponse>,
}

/// A validated record, ready for compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingExample {
    /// `file:line` of the source record.
    pub origin: String,
    pub system_context: Option<String>,
    /// Ends with the target assistant turn when `expected` is `None`.
    pub messages: Vec<ChatMessage>,
    pub expected: Option<Action>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LoadReport {
    pub files: usize,
    pub loaded: usize,
    pub skipped: usize,
}

/// Parse and validate one JSONL line.
pub fn parse_record(line: &str, origin: &str) -> anyhow::Result<TrainingExample> {
    let mut record: TrainingRecord =
        serde_json::from_str(line).with_context(|| format!("{origin}: invalid record JSON"))?;
    let expected = match &record.expected_response {
        Some(response) => Some(
            Action::from_expected(response)
                .with_context(|| format!("{origin}: invalid expected_response"))?,
        ),
        None => {
            let Some(last) = record.messages.iter().rposition(|m| m.role == "assistant") else {
                anyhow::bail!("{origin}: no expected_response and no assistant message to train on");
            };
            record.messages.truncate(last + 1);
            None
        }
    };
    Ok(TrainingExample {
        origin: origin.to_string(),
        system_context: record.system_context,
        messages: record.messages,
        expected,
    })
}

/// List `.jsonl` files under `path` (or `path` itself), sorted by name.
pub fn jsonl_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !path.exists() {
        anyhow::bail!("data path not found: {}", path.display());
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files: Vec<PathBuf> = fs::read_dir(path)
        .with_context(|| format!("failed to read data dir {}", path.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();
    Ok(files)
}

/// Load every record under `path`. Bad lines are logged with their origin,
/// counted, and skipped.
pub fn load_examples(path: &Path) -> anyhow::Result<(Vec<TrainingExample>, LoadReport)> {
    let files = jsonl_files(path)?;
    let mut report = LoadReport {
        files: files.len(),
        ..Default::default()
    };
    let mut examples = Vec::new();

    for file in &files {
        let handle =
            fs::File::open(file).with_context(|| format!("failed to open {}", file.display()))?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for (idx, line) in BufReader::new(handle).lines().enumerate() {
            let line =
                line.with_context(|| format!("failed to read {}:{}", file.display(), idx + 1))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let origin = format!("{name}:{}", idx + 1);
            match parse_record(line, &origin) {
                Ok(example) => examples.push(example),
                Err(e) => {
                    warn!(error = format!("{e:#}"), "skipping record");
                    report.skipped += 1;
                }
            }
        }
    }
    report.loaded = examples.len();
    info!(
        files = report.files,
        loaded = report.loaded,
        skipped = report.skipped,
        "training records loaded"
    );
    Ok((examples, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_record() {
        let line = r#"{"messages":[{"role":"user","content":"show disks"}],"expected_response":{"type":"command","command":"lsblk"}}"#;
        let ex = parse_record(line, "a.jsonl:1").unwrap();
        assert_eq!(ex.expected, Some(Action::command("lsblk", None).unwrap()));
        assert_eq!(ex.system_context, None);
        assert_eq!(ex.origin, "a.jsonl:1");
    }

    #[test]
    fn mismatched_expected_is_rejected_with_origin() {
        let line = r#"{"messages":[],"expected_response":{"type":"text","command":"lsblk"}}"#;
        let err = parse_record(line, "b.jsonl:7").unwrap_err();
        assert!(format!("{err:#}").contains("b.jsonl:7"));
    }

    #[test]
    fn missing_messages_is_rejected() {
        let line = r#"{"expected_response":{"type":"text","response":"hi"}}"#;
        assert!(parse_record(line, "c.jsonl:1").is_err());
    }

    #[test]
    fn transcript_record_keeps_history_through_last_assistant() {
        let line = r#"{"messages":[{"role":"user","content":"list disks"},{"role":"assistant","content":"<tool_call>\n{\"name\":\"run_shell_command\",\"arguments\":{\"command\":\"lsblk\"}}\n</tool_call>"},{"role":"user","content":"thanks"}]}"#;
        let ex = parse_record(line, "t.jsonl:1").unwrap();
        assert_eq!(ex.expected, None);
        assert_eq!(ex.messages.len(), 2);
        assert_eq!(ex.messages[1].role, "assistant");
        assert!(ex.messages[1].content.contains("lsblk"));
    }

    #[test]
    fn transcript_without_assistant_is_rejected() {
        let line = r#"{"messages":[{"role":"user","content":"hi"}]}"#;
        let err = parse_record(line, "t.jsonl:2").unwrap_err();
        assert!(err.to_string().contains("no assistant message"));
    }

    #[test]
    fn load_accepts_transcript_records() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("chat.jsonl"),
            concat!(
                r#"{"messages":[{"role":"user","content":"list disks"},{"role":"assistant","content":"<tool_call>\n{\"name\":\"run_shell_command\",\"arguments\":{\"command\":\"lsblk\"}}\n</tool_call>"}]}"#,
                "\n",
                r#"{"messages":[{"role":"user","content":"hi"}]}"#,
                "\n"
            ),
        )
        .unwrap();

        let (examples, report) = load_examples(dir.path()).unwrap();
        assert_eq!(report, LoadReport { files: 1, loaded: 1, skipped: 1 });
        assert_eq!(examples[0].expected, None);
    }

    #[test]
    fn load_skips_and_counts_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.jsonl"),
            concat!(
                r#"{"messages":[{"role":"user","content":"hi"}],"expected_response":{"type":"text","response":"Hello!"}}"#,
                "\n\nnot json\n",
                r#"{"messages":[{"role":"user","content":"disks"}],"expected_response":{"type":"command","command":"lsblk"}}"#,
                "\n"
            ),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let (examples, report) = load_examples(dir.path()).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(report, LoadReport { files: 1, loaded: 2, skipped: 1 });
        assert_eq!(examples[1].origin, "a.jsonl:4");
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(load_examples(Path::new("/nonexistent/data")).is_err());
    }
}
