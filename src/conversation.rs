//! Conversation model shared by training records and inference requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::template::TemplateError;

/// A chat message as it appears on the wire (training JSONL, `/query` body).
///
/// The role stays a free-form string here; it is checked when the message
/// is turned into a [`Turn`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(TemplateError::UnsupportedRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// An ordered, immutable sequence of turns plus the optional system facts
/// block injected into the system prompt.
///
/// Turns may come in any order; nothing here assumes user/assistant
/// alternation. Adding a turn yields a new value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conversation {
    system_context: Option<String>,
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(system_context: Option<String>, turns: Vec<Turn>) -> Self {
        Self {
            system_context,
            turns,
        }
    }

    /// Build a conversation from wire messages, rejecting unknown roles.
    pub fn from_messages(
        system_context: Option<String>,
        messages: &[ChatMessage],
    ) -> Result<Self, TemplateError> {
        let turns = messages
            .iter()
            .map(|m| Ok(Turn::new(m.role.parse()?, m.content.clone())))
            .collect::<Result<Vec<_>, TemplateError>>()?;
        Ok(Self::new(system_context, turns))
    }

    pub fn system_context(&self) -> Option<&str> {
        self.system_context.as_deref()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// A copy with `turn` prepended.
    pub fn with_leading(&self, turn: Turn) -> Self {
        let mut turns = Vec::with_capacity(self.turns.len() + 1);
        turns.push(turn);
        turns.extend(self.turns.iter().cloned());
        Self::new(self.system_context.clone(), turns)
    }

    /// A copy with `turn` appended.
    pub fn with_trailing(&self, turn: Turn) -> Self {
        let mut turns = self.turns.clone();
        turns.push(turn);
        Self::new(self.system_context.clone(), turns)
    }

    /// Split off the final turn, returning the remaining conversation.
    pub fn split_last(&self) -> Option<(Self, &Turn)> {
        let (last, rest) = self.turns.split_last()?;
        Some((Self::new(self.system_context.clone(), rest.to_vec()), last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_role_is_rejected() {
        let err = Conversation::from_messages(None, &[ChatMessage::new("tool", "x")]).unwrap_err();
        assert_eq!(err, TemplateError::UnsupportedRole("tool".into()));
    }

    #[test]
    fn derived_copies_leave_original_untouched() {
        let conv = Conversation::new(None, vec![Turn::user("list disks")]);
        let extended = conv.with_trailing(Turn::assistant("ok"));
        let prefixed = conv.with_leading(Turn::system("sys"));
        assert_eq!(conv.turns().len(), 1);
        assert_eq!(extended.turns().len(), 2);
        assert_eq!(prefixed.turns()[0].role, Role::System);
    }

    #[test]
    fn split_last_returns_remaining_turns() {
        let conv = Conversation::new(
            Some("ctx".into()),
            vec![Turn::user("a"), Turn::assistant("b")],
        );
        let (rest, last) = conv.split_last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(rest.turns(), &[Turn::user("a")]);
        assert_eq!(rest.system_context(), Some("ctx"));
    }
}
