//! The assistant's intended action and its two wire encodings.
//!
//! An [`Action`] is either a shell command for the installer to run or a
//! plain-text reply. It travels as:
//! - the `expected_response` object of a training record (JSON, validated
//!   by [`Action::from_expected`]);
//! - the assistant target text the model is trained to emit
//!   ([`Action::to_target_text`]), which the response decoder parses back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the single tool the model may call.
pub const SHELL_TOOL_NAME: &str = "run_shell_command";

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";
pub const TOOL_CALL_OPEN: &str = "<tool_call>";
pub const TOOL_CALL_CLOSE: &str = "</tool_call>";

/// What the assistant decided to do for the latest user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ShellCommand {
        command: String,
        thinking: Option<String>,
    },
    TextResponse {
        text: String,
        thinking: Option<String>,
    },
}

/// Rejections raised while building an [`Action`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("command action has an empty command")]
    EmptyCommand,
    #[error("text action has an empty response")]
    EmptyText,
    #[error("expected_response of type `{kind}` is missing `{field}`")]
    MissingField { kind: &'static str, field: &'static str },
    #[error("expected_response of type `{kind}` must not carry `{field}`")]
    UnexpectedField { kind: &'static str, field: &'static str },
}

/// Kind tag shared by the training record and the HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Command,
    Text,
}

/// Raw `expected_response` object as it appears in a training record.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectedResponse {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

#[derive(Serialize)]
struct ToolCall<'a> {
    name: &'a str,
    arguments: ShellArguments<'a>,
}

#[derive(Serialize)]
struct ShellArguments<'a> {
    command: &'a str,
}

/// Collapse whitespace-only reasoning to `None` and trim the rest.
pub fn normalize_thinking(thinking: Option<&str>) -> Option<String> {
    thinking
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

impl Action {
    /// Build a shell-command action. The command is stored trimmed.
    pub fn command(command: &str, thinking: Option<&str>) -> Result<Self, ActionError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ActionError::EmptyCommand);
        }
        Ok(Action::ShellCommand {
            command: command.to_string(),
            thinking: normalize_thinking(thinking),
        })
    }

    /// Build a text action. Surrounding whitespace is removed.
    pub fn text(text: &str, thinking: Option<&str>) -> Result<Self, ActionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ActionError::EmptyText);
        }
        Ok(Action::TextResponse {
            text: text.to_string(),
            thinking: normalize_thinking(thinking),
        })
    }

    /// The single validating constructor for the training-record encoding.
    ///
    /// Exactly one of `command`/`response` must be present, matching `type`.
    pub fn from_expected(raw: &ExpectedResponse) -> Result<Self, ActionError> {
        match raw.kind {
            ActionKind::Command => {
                if raw.response.is_some() {
                    return Err(ActionError::UnexpectedField {
                        kind: "command",
                        field: "response",
                    });
                }
                let command = raw.command.as_deref().ok_or(ActionError::MissingField {
                    kind: "command",
                    field: "command",
                })?;
                Action::command(command, raw.thinking.as_deref())
            }
            ActionKind::Text => {
                if raw.command.is_some() {
                    return Err(ActionError::UnexpectedField {
                        kind: "text",
                        field: "command",
                    });
                }
                let text = raw.response.as_deref().ok_or(ActionError::MissingField {
                    kind: "text",
                    field: "response",
                })?;
                Action::text(text, raw.thinking.as_deref())
            }
        }
    }

    /// Inverse of [`Action::from_expected`].
    pub fn to_expected(&self) -> ExpectedResponse {
        match self {
            Action::ShellCommand { command, thinking } => ExpectedResponse {
                kind: ActionKind::Command,
                command: Some(command.clone()),
                response: None,
                thinking: thinking.clone(),
            },
            Action::TextResponse { text, thinking } => ExpectedResponse {
                kind: ActionKind::Text,
                command: None,
                response: Some(text.clone()),
                thinking: thinking.clone(),
            },
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::ShellCommand { .. } => ActionKind::Command,
            Action::TextResponse { .. } => ActionKind::Text,
        }
    }

    pub fn thinking(&self) -> Option<&str> {
        match self {
            Action::ShellCommand { thinking, .. } | Action::TextResponse { thinking, .. } => {
                thinking.as_deref()
            }
        }
    }

    /// Render the assistant turn content the model is trained to produce.
    ///
    /// This is the only encoding of an action into model text; the response
    /// decoder is its inverse.
    pub fn to_target_text(&self) -> String {
        let mut out = String::new();
        if let Some(thinking) = normalize_thinking(self.thinking()) {
            out.push_str(THINK_OPEN);
            out.push('\n');
            out.push_str(&thinking);
            out.push('\n');
            out.push_str(THINK_CLOSE);
            out.push('\n');
        }
        match self {
            Action::ShellCommand { command, .. } => {
                let call = ToolCall {
                    name: SHELL_TOOL_NAME,
                    arguments: ShellArguments { command },
                };
                out.push_str(TOOL_CALL_OPEN);
                out.push('\n');
                // Serializing two string fields cannot fail.
                out.push_str(&serde_json::to_string(&call).unwrap_or_default());
                out.push('\n');
                out.push_str(TOOL_CALL_CLOSE);
            }
            Action::TextResponse { text, .. } => out.push_str(text),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected(kind: ActionKind, command: Option<&str>, response: Option<&str>) -> ExpectedResponse {
        ExpectedResponse {
            kind,
            command: command.map(str::to_string),
            response: response.map(str::to_string),
            thinking: None,
        }
    }

    #[test]
    fn command_target_is_tool_call_block() {
        let action = Action::command("lsblk", None).unwrap();
        assert_eq!(
            action.to_target_text(),
            "<tool_call>\n{\"name\":\"run_shell_command\",\"arguments\":{\"command\":\"lsblk\"}}\n</tool_call>"
        );
    }

    #[test]
    fn thinking_prefixes_target() {
        let action = Action::text("Which disk?", Some("  user was vague ")).unwrap();
        assert_eq!(
            action.to_target_text(),
            "<think>\nuser was vague\n</think>\nWhich disk?"
        );
    }

    #[test]
    fn blank_thinking_is_absent() {
        let action = Action::command("lsblk", Some(" \n\t ")).unwrap();
        assert_eq!(action.thinking(), None);
        assert!(!action.to_target_text().contains(THINK_OPEN));
    }

    #[test]
    fn expected_requires_matching_field() {
        let err = Action::from_expected(&expected(ActionKind::Command, None, Some("hi"))).unwrap_err();
        assert_eq!(
            err,
            ActionError::UnexpectedField {
                kind: "command",
                field: "response"
            }
        );
        let err = Action::from_expected(&expected(ActionKind::Text, None, None)).unwrap_err();
        assert!(matches!(err, ActionError::MissingField { field: "response", .. }));
    }

    #[test]
    fn expected_rejects_blank_command() {
        let err = Action::from_expected(&expected(ActionKind::Command, Some("   "), None)).unwrap_err();
        assert_eq!(err, ActionError::EmptyCommand);
    }

    #[test]
    fn expected_json_parses() {
        let raw: ExpectedResponse = serde_json::from_str(
            r#"{"type":"command","command":" lsblk ","thinking":"list first"}"#,
        )
        .unwrap();
        let action = Action::from_expected(&raw).unwrap();
        assert_eq!(
            action,
            Action::ShellCommand {
                command: "lsblk".into(),
                thinking: Some("list first".into())
            }
        );
        assert_eq!(action.to_expected().command.as_deref(), Some("lsblk"));
    }
}
