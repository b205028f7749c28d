//! Live probing of the local machine.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{parse_lsblk, FactsSource, SystemFacts};

const LSBLK_COLUMNS: &str = "NAME,SIZE,TYPE,MOUNTPOINT,FSTYPE,MODEL";
const EFI_VARS: &str = "/sys/firmware/efi/efivars";
const ZONEINFO: &str = "zoneinfo/";

/// Probes the host on every snapshot. Each probe has its own timeout and
/// falls back to a neutral value on failure.
#[derive(Debug, Clone)]
pub struct HostFacts {
    pub ping_host: String,
    pub probe_timeout: Duration,
}

impl Default for HostFacts {
    fn default() -> Self {
        Self {
            ping_host: "archlinux.org".to_string(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl HostFacts {
    pub fn new(ping_host: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            ping_host: ping_host.into(),
            probe_timeout,
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Option<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        match tokio::time::timeout(self.probe_timeout, cmd.output()).await {
            Ok(Ok(out)) => Some(out),
            Ok(Err(e)) => {
                debug!(program, error = %e, "probe failed to start");
                None
            }
            Err(_) => {
                debug!(program, "probe timed out");
                None
            }
        }
    }

    async fn devices(&self) -> Vec<super::BlockDevice> {
        let Some(out) = self.run("lsblk", &["-J", "-o", LSBLK_COLUMNS]).await else {
            return Vec::new();
        };
        if !out.status.success() {
            debug!(status = %out.status, "lsblk failed");
            return Vec::new();
        }
        match parse_lsblk(&String::from_utf8_lossy(&out.stdout)) {
            Ok(devices) => devices,
            Err(e) => {
                debug!(error = %e, "lsblk output unreadable");
                Vec::new()
            }
        }
    }

    async fn network(&self) -> bool {
        self.run("ping", &["-c", "1", "-W", "2", self.ping_host.as_str()])
            .await
            .is_some_and(|out| out.status.success())
    }

    async fn target_mounted(&self) -> bool {
        self.run("findmnt", &["-n", "-M", "/mnt"])
            .await
            .is_some_and(|out| out.status.success() && !out.stdout.is_empty())
    }

    async fn hostname(&self) -> Option<String> {
        let out = self.run("hostname", &[]).await?;
        let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
        (!name.is_empty()).then_some(name)
    }
}

/// Zone name from the `/etc/localtime` link target.
pub(crate) fn timezone_from_link(target: &Path) -> Option<String> {
    let target = target.to_string_lossy();
    let idx = target.find(ZONEINFO)?;
    let zone = &target[idx + ZONEINFO.len()..];
    (!zone.is_empty()).then(|| zone.to_string())
}

/// Regular (UID 1000–59999) account names from `/etc/passwd` contents.
pub(crate) fn regular_users(passwd: &str) -> Vec<String> {
    passwd
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim().split(':').collect();
            if fields.len() < 7 {
                return None;
            }
            let uid: u32 = fields[2].parse().ok()?;
            (1000..60000).contains(&uid).then(|| fields[0].to_string())
        })
        .collect()
}

#[async_trait]
impl FactsSource for HostFacts {
    async fn snapshot(&self) -> SystemFacts {
        let (devices, network, target_mounted, hostname) = tokio::join!(
            self.devices(),
            self.network(),
            self.target_mounted(),
            self.hostname()
        );
        let timezone = tokio::fs::read_link("/etc/localtime")
            .await
            .ok()
            .and_then(|t| timezone_from_link(&t));
        let users = tokio::fs::read_to_string("/etc/passwd")
            .await
            .map(|p| regular_users(&p))
            .unwrap_or_default();
        let uefi = tokio::fs::metadata(EFI_VARS).await.is_ok();

        debug!(
            disks = devices.iter().filter(|d| d.is_disk()).count(),
            uefi,
            network,
            "system facts gathered"
        );
        SystemFacts {
            uefi,
            network,
            hostname,
            timezone,
            target_mounted,
            users,
            devices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timezone_from_absolute_and_relative_links() {
        assert_eq!(
            timezone_from_link(Path::new("/usr/share/zoneinfo/Europe/Amsterdam")).as_deref(),
            Some("Europe/Amsterdam")
        );
        assert_eq!(
            timezone_from_link(Path::new("../usr/share/zoneinfo/UTC")).as_deref(),
            Some("UTC")
        );
        assert_eq!(timezone_from_link(Path::new("/etc/other")), None);
    }

    #[test]
    fn only_regular_users_are_listed() {
        let passwd = "root:x:0:0:root:/root:/bin/bash\n\
                      alice:x:1000:1000::/home/alice:/bin/bash\n\
                      nobody:x:65534:65534:Nobody:/:/usr/bin/nologin\n\
                      broken:line\n\
                      bob:x:1001:1001::/home/bob:/bin/zsh\n";
        assert_eq!(regular_users(passwd), vec!["alice", "bob"]);
    }
}
