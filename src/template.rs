//! Chat templating: turns + tool schemas → model prompt text.

use serde_json::Value;
use thiserror::Error;

use crate::conversation::{Role, Turn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unsupported role `{0}`")]
    UnsupportedRole(String),
    #[error("turn {turn} ({role}) contains reserved marker `{marker}`")]
    ReservedMarker {
        turn: usize,
        role: Role,
        marker: String,
    },
    #[error("conversation has no turns")]
    Empty,
}

/// Renders a conversation into the exact text a model was trained on.
///
/// Implementations must guarantee that the rendering with
/// `add_generation_prompt = true` of turns `T` is a text prefix of the
/// rendering with `add_generation_prompt = false` of `T + [assistant]`.
pub trait ChatTemplate: Send + Sync {
    fn name(&self) -> &str;

    fn render(
        &self,
        turns: &[Turn],
        tools: &[Value],
        add_generation_prompt: bool,
    ) -> Result<String, TemplateError>;

    /// Marker closing every turn, including the assistant's.
    fn end_of_turn(&self) -> &str;
}

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";

/// ChatML layout: `<|im_start|>{role}\n{content}<|im_end|>\n`.
///
/// Tool schemas are appended to the first system turn (or to a synthesized
/// one when the conversation has none).
#[derive(Debug, Clone, Default)]
pub struct ChatMlTemplate;

impl ChatMlTemplate {
    pub fn new() -> Self {
        Self
    }

    fn tools_section(tools: &[Value]) -> String {
        let mut out = String::from(
            "\n\n# Tools\n\nYou may call one or more functions to assist with the user query.\n\n\
             You are provided with function signatures within <tools></tools> XML tags:\n<tools>",
        );
        for tool in tools {
            out.push('\n');
            out.push_str(&tool.to_string());
        }
        out.push_str(
            "\n</tools>\n\nFor each function call, return a json object with function name and \
             arguments within <tool_call></tool_call> XML tags:\n<tool_call>\n\
             {\"name\": <function-name>, \"arguments\": <args-json-object>}\n</tool_call>",
        );
        out
    }

    fn push_turn(out: &mut String, role: Role, content: &str) {
        out.push_str(IM_START);
        out.push_str(role.as_str());
        out.push('\n');
        out.push_str(content);
        out.push_str(IM_END);
        out.push('\n');
    }
}

impl ChatTemplate for ChatMlTemplate {
    fn name(&self) -> &str {
        "chatml"
    }

    fn render(
        &self,
        turns: &[Turn],
        tools: &[Value],
        add_generation_prompt: bool,
    ) -> Result<String, TemplateError> {
        if turns.is_empty() {
            return Err(TemplateError::Empty);
        }
        for (i, turn) in turns.iter().enumerate() {
            for marker in [IM_START, IM_END] {
                if turn.content.contains(marker) {
                    return Err(TemplateError::ReservedMarker {
                        turn: i,
                        role: turn.role,
                        marker: marker.to_string(),
                    });
                }
            }
        }

        let mut out = String::new();
        let mut tools_pending = !tools.is_empty();
        if tools_pending && turns[0].role != Role::System {
            Self::push_turn(&mut out, Role::System, Self::tools_section(tools).trim_start());
            tools_pending = false;
        }
        for turn in turns {
            if tools_pending && turn.role == Role::System {
                let content = format!("{}{}", turn.content, Self::tools_section(tools));
                Self::push_turn(&mut out, turn.role, &content);
                tools_pending = false;
            } else {
                Self::push_turn(&mut out, turn.role, &turn.content);
            }
        }
        if add_generation_prompt {
            out.push_str(IM_START);
            out.push_str(Role::Assistant.as_str());
            out.push('\n');
        }
        Ok(out)
    }

    fn end_of_turn(&self) -> &str {
        IM_END
    }
}
