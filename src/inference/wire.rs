use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionKind};
use crate::conversation::ChatMessage;
use crate::verifier::VerifiedAction;

use super::EngineError;

/// Body of `POST /query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    /// Overrides the live facts block in the system prompt. Device
    /// verification still uses the live facts.
    #[serde(default)]
    pub system_context: Option<String>,
}

/// Reply of `POST /query`: either a decoded action or a typed failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ActionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Set exactly when a command was downgraded by device verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "kind", default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl QueryResponse {
    pub fn from_verified(verified: &VerifiedAction) -> Self {
        let mut out = Self {
            success: true,
            kind: Some(verified.action.kind()),
            thinking: verified.action.thinking().map(str::to_string),
            ..Default::default()
        };
        match &verified.action {
            Action::ShellCommand { command, .. } => out.command = Some(command.clone()),
            Action::TextResponse { text, .. } => out.response = Some(text.clone()),
        }
        if let Some(d) = &verified.downgrade {
            out.warning = Some(d.warning.clone());
            out.suggested_command = Some(d.suggested_command.clone());
        }
        out
    }

    pub fn failure(error: &EngineError) -> Self {
        Self::failure_message(error.kind(), error.to_string())
    }

    pub fn failure_message(kind: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            error_kind: Some(kind.to_string()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::{verify, ValidDeviceSet};

    #[test]
    fn command_response_shape() {
        let verified = verify(Action::command("lsblk", None).unwrap(), &ValidDeviceSet::new());
        let json = serde_json::to_value(QueryResponse::from_verified(&verified)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": true, "type": "command", "command": "lsblk"})
        );
    }

    #[test]
    fn downgrade_sets_warning() {
        let valid: ValidDeviceSet = ["/dev/sda"].into_iter().collect();
        let verified = verify(Action::command("wipefs -a /dev/sdz", None).unwrap(), &valid);
        let resp = QueryResponse::from_verified(&verified);
        assert_eq!(resp.kind, Some(ActionKind::Text));
        assert!(resp.command.is_none());
        assert!(resp.warning.unwrap().contains("/dev/sdz"));
        assert_eq!(resp.suggested_command.as_deref(), Some("lsblk"));
    }

    #[test]
    fn failure_shape() {
        let json = serde_json::to_value(QueryResponse::failure(&EngineError::EmptyRequest)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": false, "error": "request has no messages", "kind": "empty_request"})
        );
    }
}
