//! Guard against commands that name devices the machine does not have.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::action::Action;
use crate::facts::SystemFacts;

/// Device nodes that exist on every Linux system and are never disks.
pub const PSEUDO_DEVICES: &[&str] = &[
    "/dev/null",
    "/dev/zero",
    "/dev/random",
    "/dev/urandom",
    "/dev/stdin",
    "/dev/stdout",
    "/dev/stderr",
];

pub const SUGGESTED_COMMAND: &str = "lsblk";

fn device_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/dev/[A-Za-z0-9_+\-./:]*").expect("device pattern is valid"))
}

fn separator_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(?:\.?/)+").expect("separator pattern is valid"))
}

/// Bytes that end a directory name, so `/dev/` after them is a subpath.
fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Shell syntax that makes the final device name unknowable before
/// execution: quoting, expansion, escapes and globs.
fn is_expansion_byte(b: u8) -> bool {
    matches!(b, b'"' | b'\'' | b'$' | b'{' | b'\\' | b'`' | b'*' | b'?' | b'[')
}

fn is_word_end(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b';' | b'|' | b'&' | b'<' | b'>' | b'(' | b')')
}

/// Every `/dev/...` path mentioned in `command`, in order, without
/// duplicates.
///
/// `//` and `/./` collapse first, so `//dev/sdz` names `/dev/sdz`. Matches
/// inside a longer path (`/mnt/dev/x`) are ignored and trailing sentence
/// punctuation is dropped. A device word built with shell quoting,
/// expansion or globbing (`/dev/"sdz"`, `/dev/{a,b}`, `/dev/sd*`) is
/// returned whole; it can never match a known device.
pub fn device_paths(command: &str) -> Vec<String> {
    let normalized = separator_pattern().replace_all(command, "/");
    let bytes = normalized.as_bytes();
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for m in device_pattern().find_iter(&normalized) {
        let before = m.start().checked_sub(1).map(|i| bytes[i]);
        if before.is_some_and(is_name_byte) {
            continue;
        }

        let path = match bytes.get(m.end()).copied() {
            Some(q @ (b'"' | b'\'')) if before == Some(q) && m.as_str().len() > "/dev/".len() => {
                m.as_str().trim_end_matches(['.', ':', '/'])
            }
            Some(next) if is_expansion_byte(next) => {
                let end = bytes[m.end()..]
                    .iter()
                    .position(|&b| is_word_end(b))
                    .map_or(bytes.len(), |i| m.end() + i);
                &normalized[m.start()..end]
            }
            _ => m.as_str().trim_end_matches(['.', ':', '/']),
        };
        if path.len() > "/dev/".len() && seen.insert(path.to_string()) {
            out.push(path.to_string());
        }
    }
    out
}

/// Device paths that exist right now.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidDeviceSet(BTreeSet<String>);

impl ValidDeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disks and all of their descendants, as `/dev/<name>`.
    pub fn from_facts(facts: &SystemFacts) -> Self {
        facts.device_paths().into_iter().collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains(path)
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        PSEUDO_DEVICES.contains(&path) || self.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ValidDeviceSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Why a command was replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Downgrade {
    pub blocked: Vec<String>,
    pub warning: String,
    pub suggested_command: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAction {
    pub action: Action,
    pub downgrade: Option<Downgrade>,
}

/// Replace a command naming unknown devices with a safe text reply.
///
/// Text actions pass through. The original command is discarded on
/// downgrade; reasoning is kept.
pub fn verify(action: Action, valid: &ValidDeviceSet) -> VerifiedAction {
    let Action::ShellCommand { command, thinking } = &action else {
        return VerifiedAction {
            action,
            downgrade: None,
        };
    };

    let blocked: Vec<String> = device_paths(command)
        .into_iter()
        .filter(|p| !valid.is_allowed(p))
        .collect();
    if blocked.is_empty() {
        return VerifiedAction {
            action,
            downgrade: None,
        };
    }

    let listed = blocked.join(", ");
    let downgraded = Action::TextResponse {
        text: format!(
            "I couldn't find {listed} on this system. Let me check what disks are available."
        ),
        thinking: thinking.clone(),
    };
    VerifiedAction {
        action: downgraded,
        downgrade: Some(Downgrade {
            warning: format!("Blocked hallucinated disk: {listed}"),
            suggested_command: SUGGESTED_COMMAND.to_string(),
            blocked,
        }),
    }
}
