//! Snapshot of the machine being installed: disks, boot mode, network,
//! hostname, timezone, users.
//!
//! The snapshot feeds both the system prompt (as a markdown block) and the
//! device verifier. It is taken fresh for every request; nothing here is
//! cached.

mod probe;

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use probe::HostFacts;

/// One `lsblk -J` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub name: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub mountpoint: Option<String>,
    #[serde(default)]
    pub fstype: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub children: Vec<BlockDevice>,
}

impl BlockDevice {
    pub fn is_disk(&self) -> bool {
        self.kind.as_deref() == Some("disk")
    }

    pub fn path(&self) -> String {
        format!("/dev/{}", self.name)
    }

    fn collect_paths(&self, out: &mut Vec<String>) {
        out.push(self.path());
        for child in &self.children {
            child.collect_paths(out);
        }
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<BlockDevice>,
}

/// Parse `lsblk -J` output.
pub fn parse_lsblk(json: &str) -> anyhow::Result<Vec<BlockDevice>> {
    let out: LsblkOutput = serde_json::from_str(json).context("invalid lsblk JSON")?;
    Ok(out.blockdevices)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemFacts {
    #[serde(default)]
    pub uefi: bool,
    #[serde(default)]
    pub network: bool,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    /// `/mnt` currently has the target mounted.
    #[serde(default)]
    pub target_mounted: bool,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub devices: Vec<BlockDevice>,
}

impl SystemFacts {
    /// Top-level devices of type `disk`.
    pub fn disks(&self) -> impl Iterator<Item = &BlockDevice> {
        self.devices.iter().filter(|d| d.is_disk())
    }

    /// `/dev/<name>` for every disk and every descendant of a disk.
    pub fn device_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for disk in self.disks() {
            disk.collect_paths(&mut out);
        }
        out
    }

    /// Markdown block injected into the system prompt.
    pub fn format_system_context(&self) -> String {
        let mut lines = vec!["## Current System State".to_string(), String::new()];
        lines.push(format!(
            "- Boot mode: {}",
            if self.uefi { "UEFI" } else { "Legacy BIOS" }
        ));
        lines.push(format!(
            "- Network: {}",
            if self.network { "Connected" } else { "Not connected" }
        ));
        lines.push(format!(
            "- Hostname: {}",
            self.hostname.as_deref().unwrap_or("unknown")
        ));
        lines.push(format!(
            "- Timezone: {}",
            self.timezone.as_deref().unwrap_or("not set")
        ));

        let disks: Vec<&BlockDevice> = self.disks().collect();
        if !disks.is_empty() {
            lines.push(String::new());
            lines.push("## Available Disks".to_string());
            lines.push(String::new());
            for disk in disks {
                let model = disk
                    .model
                    .as_deref()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .unwrap_or("Unknown");
                lines.push(format!(
                    "- {}: {} ({model})",
                    disk.path(),
                    disk.size.as_deref().unwrap_or("?")
                ));
                for child in &disk.children {
                    push_child(&mut lines, child, 1);
                }
            }
        }

        if self.target_mounted {
            lines.push(String::new());
            lines.push("## Current Mounts".to_string());
            lines.push(String::new());
            lines.push("Target partitions are mounted under /mnt".to_string());
        }

        if !self.users.is_empty() {
            lines.push(String::new());
            lines.push(format!("## Existing Users: {}", self.users.join(", ")));
        }

        lines.join("\n")
    }
}

fn push_child(lines: &mut Vec<String>, dev: &BlockDevice, depth: usize) {
    let indent = "  ".repeat(depth);
    let fs = dev
        .fstype
        .as_deref()
        .filter(|f| !f.is_empty())
        .map(|f| format!(" [{f}]"))
        .unwrap_or_default();
    let mount = dev
        .mountpoint
        .as_deref()
        .filter(|m| !m.is_empty())
        .map(|m| format!(" mounted at {m}"))
        .unwrap_or_default();
    lines.push(format!(
        "{indent}- {}: {}{fs}{mount}",
        dev.path(),
        dev.size.as_deref().unwrap_or("?")
    ));
    for child in &dev.children {
        push_child(lines, child, depth + 1);
    }
}

/// Where the engine gets a fresh facts snapshot for each request.
#[async_trait]
pub trait FactsSource: Send + Sync {
    async fn snapshot(&self) -> SystemFacts;
}

/// A fixed snapshot, for tests and for running away from the target machine.
#[derive(Debug, Clone)]
pub struct StaticFacts(pub SystemFacts);

impl StaticFacts {
    /// Load a snapshot from JSON: either a full [`SystemFacts`] object or raw
    /// `lsblk -J` output (other fields then take their defaults).
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read facts file: {}", path.display()))?;
        let value: serde_json::Value =
            serde_json::from_str(&contents).context("facts file is not JSON")?;
        let facts = if value.get("blockdevices").is_some() {
            SystemFacts {
                devices: parse_lsblk(&contents)?,
                ..Default::default()
            }
        } else {
            serde_json::from_value(value).context("invalid facts file")?
        };
        Ok(Self(facts))
    }
}

#[async_trait]
impl FactsSource for StaticFacts {
    async fn snapshot(&self) -> SystemFacts {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSBLK: &str = r#"{
        "blockdevices": [
            {"name": "loop0", "size": "700M", "type": "loop", "mountpoint": "/run/archiso", "fstype": "squashfs", "model": null},
            {"name": "sda", "size": "500G", "type": "disk", "mountpoint": null, "fstype": null, "model": "Samsung SSD 870 ",
             "children": [
                {"name": "sda1", "size": "512M", "type": "part", "mountpoint": "/mnt/boot/efi", "fstype": "vfat", "model": null},
                {"name": "sda2", "size": "499.5G", "type": "part", "mountpoint": null, "fstype": "crypto_LUKS", "model": null,
                 "children": [{"name": "cryptroot", "size": "499.5G", "type": "crypt", "mountpoint": "/mnt", "fstype": "ext4"}]}
             ]},
            {"name": "nvme0n1", "size": "1T", "type": "disk", "model": ""}
        ]
    }"#;

    fn facts() -> SystemFacts {
        SystemFacts {
            uefi: true,
            network: true,
            hostname: Some("archiso".into()),
            devices: parse_lsblk(LSBLK).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn device_paths_cover_disks_and_descendants() {
        assert_eq!(
            facts().device_paths(),
            vec![
                "/dev/sda",
                "/dev/sda1",
                "/dev/sda2",
                "/dev/cryptroot",
                "/dev/nvme0n1"
            ]
        );
    }

    #[test]
    fn context_lists_disks_and_partitions() {
        let text = facts().format_system_context();
        assert!(text.starts_with("## Current System State\n\n- Boot mode: UEFI\n- Network: Connected"));
        assert!(text.contains("- /dev/sda: 500G (Samsung SSD 870)"));
        assert!(text.contains("  - /dev/sda1: 512M [vfat] mounted at /mnt/boot/efi"));
        assert!(text.contains("    - /dev/cryptroot: 499.5G [ext4] mounted at /mnt"));
        assert!(text.contains("- /dev/nvme0n1: 1T (Unknown)"));
        assert!(!text.contains("loop0"));
        assert!(text.contains("- Timezone: not set"));
    }

    #[test]
    fn context_without_disks_has_no_disk_section() {
        let text = SystemFacts::default().format_system_context();
        assert!(!text.contains("Available Disks"));
        assert!(text.contains("- Boot mode: Legacy BIOS"));
        assert!(text.contains("- Hostname: unknown"));
    }

    #[test]
    fn users_and_mounts_are_rendered() {
        let facts = SystemFacts {
            target_mounted: true,
            users: vec!["alice".into(), "bob".into()],
            ..Default::default()
        };
        let text = facts.format_system_context();
        assert!(text.contains("Target partitions are mounted under /mnt"));
        assert!(text.ends_with("## Existing Users: alice, bob"));
    }

    #[tokio::test]
    async fn static_facts_load_raw_lsblk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lsblk.json");
        std::fs::write(&path, LSBLK).unwrap();
        let facts = StaticFacts::load(&path).await.unwrap().snapshot().await;
        assert_eq!(facts.disks().count(), 2);
        assert!(!facts.uefi);
    }

    #[tokio::test]
    async fn static_facts_load_full_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");
        std::fs::write(&path, serde_json::to_string(&facts()).unwrap()).unwrap();
        let loaded = StaticFacts::load(&path).await.unwrap().snapshot().await;
        assert_eq!(loaded, facts());
    }
}
