//! System prompt construction and the single prompt-rendering path used by
//! both the example compiler and the inference engine.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use tracing::warn;

use crate::action::SHELL_TOOL_NAME;
use crate::conversation::{Conversation, Turn};
use crate::template::{ChatTemplate, TemplateError};

/// Facts used when a training record carries no `system_context`.
pub const DEFAULT_SYSTEM_CONTEXT: &str = "## Current System State

- Boot mode: UEFI
- Network: Connected
- Hostname: archiso
- Timezone: not set

## Available Disks

- /dev/sda: 500G (Samsung SSD 870)";

/// Fixed facts for evaluation runs, so scores are comparable across runs.
pub const EVAL_SYSTEM_CONTEXT: &str = "## Current System State

- Boot mode: UEFI
- Network: Connected
- Hostname: archiso
- Timezone: not set

## Available Disks

- /dev/sda: 500G (Samsung SSD 870)
- /dev/sdb: 1T (WD Blue HDD)";

/// Build the system prompt around a facts block.
pub fn build_system_prompt(system_context: &str) -> String {
    format!(
        "You are the installation assistant for this operating system. \
Help the user install it on their machine.

{}

RULES:
1. When the user wants something DONE (list, partition, format, mount, create, set, install), call run_shell_command.
2. When the user CONFIRMS a pending action (yes, ok, go ahead, do it), run that command via run_shell_command.
3. When the user asks a QUESTION (what is, how do I, should I, explain), answer in text.

COMMANDS:
- List disks: lsblk
- Partition disk: sgdisk -Z /dev/X && sgdisk -n 1:0:+512M -t 1:ef00 -n 2:0:0 /dev/X
- Format EFI: mkfs.fat -F32 /dev/X1
- Format root: mkfs.ext4 /dev/X2
- Mount root: mount /dev/X2 /mnt
- Mount EFI: mkdir -p /mnt/boot/efi && mount /dev/X1 /mnt/boot/efi
- Set hostname: hostnamectl set-hostname NAME
- Set timezone: timedatectl set-timezone ZONE
- Create user: useradd -m -G wheel NAME
- Install bootloader: grub-install --target=x86_64-efi --efi-directory=/boot/efi

Only mention disks listed in the system state above. Never invent device names.",
        system_context.trim()
    )
}

/// JSON schema of the shell tool, passed to the template on every render.
pub fn shell_command_tool() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": SHELL_TOOL_NAME,
            "description": "Execute a shell command for system installation tasks.",
            "parameters": {
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    }
                },
                "required": ["command"]
            }
        }
    })
}

/// Read tool definitions from a JSON array file, replacing the built-in
/// shell tool schema. Compile and serve must use the same file.
pub fn load_tools(path: &Path) -> anyhow::Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read tools file {}", path.display()))?;
    let tools: Vec<Value> = serde_json::from_str(&raw)
        .with_context(|| format!("{}: expected a JSON array of tool definitions", path.display()))?;
    if tools.is_empty() {
        anyhow::bail!("{}: tools file is empty", path.display());
    }
    if let Some(i) = tools.iter().position(|t| !t.is_object()) {
        anyhow::bail!("{}: tool #{i} is not a JSON object", path.display());
    }
    let has_shell = tools
        .iter()
        .any(|t| t["function"]["name"] == SHELL_TOOL_NAME || t["name"] == SHELL_TOOL_NAME);
    if !has_shell {
        warn!(
            path = %path.display(),
            "tools file does not define {SHELL_TOOL_NAME}; the model cannot be asked for commands"
        );
    }
    Ok(tools)
}

/// Renders conversations for the model: synthesizes the system turn from
/// the conversation's facts, attaches the tool schema, and applies the
/// chat template.
#[derive(Clone)]
pub struct Prompter {
    template: Arc<dyn ChatTemplate>,
    tools: Vec<Value>,
}

impl Prompter {
    pub fn new(template: Arc<dyn ChatTemplate>) -> Self {
        Self {
            template,
            tools: vec![shell_command_tool()],
        }
    }

    /// Replace the tool definitions attached to every render.
    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn tools(&self) -> &[Value] {
        &self.tools
    }

    pub fn template(&self) -> &dyn ChatTemplate {
        self.template.as_ref()
    }

    /// Derived copy of `conversation` with the system prompt as first turn.
    pub fn with_system_turn(&self, conversation: &Conversation) -> Conversation {
        let context = conversation
            .system_context()
            .unwrap_or(DEFAULT_SYSTEM_CONTEXT);
        conversation.with_leading(Turn::system(build_system_prompt(context)))
    }

    /// Prompt text ending with the assistant generation header.
    pub fn render_prompt(&self, conversation: &Conversation) -> Result<String, TemplateError> {
        let prepared = self.with_system_turn(conversation);
        self.template.render(prepared.turns(), &self.tools, true)
    }

    /// Prompt plus `target` as the closing assistant turn.
    pub fn render_full(
        &self,
        conversation: &Conversation,
        target: &str,
    ) -> Result<String, TemplateError> {
        let prepared = self
            .with_system_turn(conversation)
            .with_trailing(Turn::assistant(target));
        self.template.render(prepared.turns(), &self.tools, false)
    }
}
