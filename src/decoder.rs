//! Raw model output → [`Action`].
//!
//! Decoding runs in three stages, first match wins:
//! 1. reasoning: a `<think>…</think>` block is cut out and kept as
//!    `thinking` (blank blocks are dropped);
//! 2. tool call: a `<tool_call>` region must hold
//!    `{"name": "run_shell_command", "arguments": {"command": …}}`;
//! 3. text: remaining markup tags are stripped and the rest is the reply.
//!
//! Markup is found by a small byte-level lexer rather than regexes, so
//! payload bytes between tags are never reinterpreted.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::action::{normalize_thinking, Action, SHELL_TOOL_NAME};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed tool call: {reason}")]
    MalformedToolCall { reason: String },
    #[error("model produced an empty response")]
    EmptyResponse,
}

impl DecodeError {
    fn malformed(reason: impl Into<String>) -> Self {
        DecodeError::MalformedToolCall {
            reason: reason.into(),
        }
    }
}

/// A `<name>` markup tag located in the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tag<'a> {
    /// Text between the angle brackets, e.g. `think`, `/tool_call`, `|im_end|`.
    name: &'a str,
    start: usize,
    end: usize,
}

#[derive(Clone, Copy)]
enum Lex {
    Text,
    Tag { start: usize },
}

fn is_tag_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'|' | b'/' | b':' | b'.')
}

fn is_tag_name(name: &str) -> bool {
    let body = name.trim_start_matches('/');
    match body.as_bytes().first() {
        Some(b) => b.is_ascii_alphabetic() || *b == b'|',
        None => false,
    }
}

/// Locate every markup tag in `text`, in order.
fn scan_tags(text: &str) -> Vec<Tag<'_>> {
    let mut tags = Vec::new();
    let mut state = Lex::Text;
    for (i, &b) in text.as_bytes().iter().enumerate() {
        state = match (state, b) {
            (_, b'<') => Lex::Tag { start: i },
            (Lex::Text, _) => Lex::Text,
            (Lex::Tag { start }, b'>') => {
                let name = &text[start + 1..i];
                if is_tag_name(name) {
                    tags.push(Tag {
                        name,
                        start,
                        end: i + 1,
                    });
                }
                Lex::Text
            }
            (Lex::Tag { start }, b) if is_tag_byte(b) => Lex::Tag { start },
            (Lex::Tag { .. }, _) => Lex::Text,
        };
    }
    tags
}

fn find_tag<'a>(tags: &[Tag<'a>], name: &str, from: usize) -> Option<Tag<'a>> {
    tags.iter().copied().find(|t| t.start >= from && t.name == name)
}

/// Split `text` into (reasoning, remaining body).
///
/// An unterminated `<think>` means generation stopped mid-reasoning: the
/// rest is reasoning and the body is what preceded it. A bare `</think>`
/// closes reasoning that began in the prompt.
fn split_reasoning(text: &str) -> (Option<String>, String) {
    let tags = scan_tags(text);
    let open = find_tag(&tags, "think", 0);
    let close = find_tag(&tags, "/think", open.map_or(0, |o| o.end));
    match (open, close) {
        (Some(open), Some(close)) => (
            normalize_thinking(Some(&text[open.end..close.start])),
            format!("{}{}", &text[..open.start], &text[close.end..]),
        ),
        (Some(open), None) => (
            normalize_thinking(Some(&text[open.end..])),
            text[..open.start].to_string(),
        ),
        (None, Some(close)) => (
            normalize_thinking(Some(&text[..close.start])),
            text[close.end..].to_string(),
        ),
        (None, None) => (None, text.to_string()),
    }
}

/// Payload of the first `<tool_call>` region, ending at `</tool_call>`, an
/// end-of-turn control tag, or the end of text.
fn tool_call_payload(body: &str) -> Option<&str> {
    let tags = scan_tags(body);
    let open = find_tag(&tags, "tool_call", 0)?;
    let end = tags
        .iter()
        .find(|t| t.start >= open.end && (t.name == "/tool_call" || t.name.starts_with('|')))
        .map_or(body.len(), |t| t.start);
    Some(&body[open.end..end])
}

#[derive(Deserialize)]
struct RawToolCall {
    name: Option<String>,
    #[serde(default)]
    arguments: Value,
}

fn parse_tool_call(payload: &str) -> Result<String, DecodeError> {
    let call: RawToolCall = serde_json::from_str(payload.trim())
        .map_err(|e| DecodeError::malformed(format!("invalid JSON: {e}")))?;
    match call.name.as_deref() {
        Some(SHELL_TOOL_NAME) => {}
        Some(other) => return Err(DecodeError::malformed(format!("unknown tool `{other}`"))),
        None => return Err(DecodeError::malformed("missing tool name")),
    }
    let arguments = match call.arguments {
        Value::String(s) => serde_json::from_str::<Value>(&s)
            .map_err(|e| DecodeError::malformed(format!("invalid arguments JSON: {e}")))?,
        other => other,
    };
    arguments
        .get("command")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DecodeError::malformed("missing or empty command"))
}

/// Remove every markup tag from `text`.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for tag in scan_tags(text) {
        out.push_str(&text[cursor..tag.start]);
        cursor = tag.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Decode raw generated text. Pure: the same input always gives the same
/// result.
pub fn decode(raw: &str) -> Result<Action, DecodeError> {
    let text = raw.replace("\r\n", "\n");
    let (thinking, body) = split_reasoning(&text);

    if let Some(payload) = tool_call_payload(&body) {
        let command = parse_tool_call(payload)?;
        return Ok(Action::ShellCommand { command, thinking });
    }

    let reply = strip_tags(&body);
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(DecodeError::EmptyResponse);
    }
    Ok(Action::TextResponse {
        text: reply.to_string(),
        thinking,
    })
}
