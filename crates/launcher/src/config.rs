//! Launcher configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// OpenSSH `StrictHostKeyChecking` policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Refuse unknown and changed keys.
    Yes,
    /// Record unknown keys, refuse changed ones.
    #[default]
    AcceptNew,
    /// Accept anything. Only for disposable lab targets.
    No,
}

impl HostKeyPolicy {
    pub fn as_ssh_option(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::AcceptNew => "accept-new",
            Self::No => "no",
        }
    }
}

/// Launcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// SSH client binary
    #[serde(default = "default_ssh_path")]
    pub ssh_path: PathBuf,
    /// Known-hosts file; OpenSSH's default when unset
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,
    #[serde(default)]
    pub host_key_checking: HostKeyPolicy,
    /// HOME passed to the SSH client (keys and ssh_config live there)
    #[serde(default)]
    pub home: Option<PathBuf>,
    /// Time between the hang-up signal and a forceful kill
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    /// How long to watch a fresh process for an early failure exit
    #[serde(default = "default_startup_probe_ms")]
    pub startup_probe_ms: u64,
}

fn default_ssh_path() -> PathBuf {
    PathBuf::from("/usr/bin/ssh")
}

fn default_close_grace_ms() -> u64 {
    3000
}

fn default_startup_probe_ms() -> u64 {
    750
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            ssh_path: default_ssh_path(),
            known_hosts_path: None,
            host_key_checking: HostKeyPolicy::default(),
            home: None,
            close_grace_ms: default_close_grace_ms(),
            startup_probe_ms: default_startup_probe_ms(),
        }
    }
}

impl LauncherConfig {
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn startup_probe(&self) -> Duration {
        Duration::from_millis(self.startup_probe_ms)
    }

    /// Whether the configured SSH binary exists as a regular file.
    pub fn ssh_available(&self) -> bool {
        self.ssh_path.is_file()
    }
}
