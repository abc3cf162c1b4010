//! SSH client invocation.
//!
//! Builds the exact program, argv and environment for one session. Kept
//! free of I/O so the security-relevant parts are unit-testable.

use std::collections::BTreeMap;

use gateway_core::limits::ALLOWED_ENV_KEYS;
use gateway_core::{SessionLimits, Target};

use crate::config::LauncherConfig;

/// Remote command. Fixed: callers can never supply their own.
pub const REMOTE_SHELL_COMMAND: &str = r#"exec "${SHELL:-/bin/sh}" -l"#;

/// Wrapper used when CPU or memory ceilings apply. `$0`/`$@` carry the
/// SSH invocation so limits are set on the SSH client's own process tree.
const RLIMIT_SHELL: &str = "/bin/sh";

const BASE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const BASE_TERM: &str = "xterm-256color";
const BASE_LANG: &str = "C.UTF-8";

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

fn ssh_args(config: &LauncherConfig, target: &Target) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-tt".into(),
        "-p".into(),
        target.port.to_string(),
        "-o".into(),
        format!(
            "StrictHostKeyChecking={}",
            config.host_key_checking.as_ssh_option()
        ),
    ];

    if let Some(ref known_hosts) = config.known_hosts_path {
        args.push("-o".into());
        args.push(format!("UserKnownHostsFile={}", known_hosts.display()));
    }

    for option in [
        "ForwardAgent=no",
        "ForwardX11=no",
        "ClearAllForwardings=yes",
        "PermitLocalCommand=no",
        "ServerAliveInterval=30",
    ] {
        args.push("-o".into());
        args.push(option.into());
    }

    args.push("--".into());
    args.push(target.destination());
    args.push(REMOTE_SHELL_COMMAND.into());
    args
}

fn rlimit_script(limits: &SessionLimits) -> String {
    let mut script = String::new();
    if let Some(cpu) = limits.cpu_seconds.filter(|s| *s > 0) {
        script.push_str(&format!("ulimit -t {} || exit 126; ", cpu));
    }
    if let Some(bytes) = limits.memory_bytes.filter(|b| *b > 0) {
        // ulimit -v takes KiB
        let kib = bytes.div_ceil(1024).max(1);
        script.push_str(&format!("ulimit -v {} || exit 126; ", kib));
    }
    script.push_str(r#"exec "$0" "$@""#);
    script
}

/// Environment: fixed baseline plus allow-listed caller values.
fn session_env(config: &LauncherConfig, env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    out.insert("PATH".to_string(), BASE_PATH.to_string());
    out.insert("TERM".to_string(), BASE_TERM.to_string());
    out.insert("LANG".to_string(), BASE_LANG.to_string());
    if let Some(ref home) = config.home {
        out.insert("HOME".to_string(), home.display().to_string());
    }

    for (key, value) in env {
        if ALLOWED_ENV_KEYS.contains(&key.as_str()) {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

/// Resolve the command for a session.
pub fn build_ssh_command(
    config: &LauncherConfig,
    target: &Target,
    limits: &SessionLimits,
    env: &BTreeMap<String, String>,
) -> SshCommand {
    let ssh = config.ssh_path.display().to_string();
    let args = ssh_args(config, target);

    let (program, args) = if limits.needs_rlimit() {
        let mut wrapped = vec!["-c".to_string(), rlimit_script(limits), ssh];
        wrapped.extend(args);
        (RLIMIT_SHELL.to_string(), wrapped)
    } else {
        (ssh, args)
    };

    SshCommand {
        program,
        args,
        env: session_env(config, env),
    }
}
