//! Validation of caller-supplied session parameters.
//!
//! Everything here runs before the launcher is touched; a failure is always
//! an invalid-request.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::limits::{
    ALLOWED_ENV_KEYS, DEFAULT_SSH_PORT, HOST_PATTERN, MAX_ENV_ENTRIES, MAX_ENV_VALUE_BYTES,
    MAX_HOST_LEN, USER_PATTERN,
};
use crate::session::{OpenRequest, Target};

static USER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(USER_PATTERN).expect("invalid user pattern"));

static HOST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(HOST_PATTERN).expect("invalid host pattern"));

/// Port 0 means "default"; everything else must already be in range.
pub fn normalize_port(port: u32) -> Result<u16> {
    match port {
        0 => Ok(DEFAULT_SSH_PORT),
        1..=65535 => Ok(port as u16),
        _ => Err(Error::invalid(format!("port {} is outside 1-65535", port))),
    }
}

/// Validate user and host against the allow-list patterns.
pub fn validate_target(user: &str, host: &str, port: u32) -> Result<Target> {
    if user.is_empty() {
        return Err(Error::invalid("user is required"));
    }
    if !USER_REGEX.is_match(user) {
        return Err(Error::invalid("user contains disallowed characters"));
    }
    if host.is_empty() {
        return Err(Error::invalid("host is required"));
    }
    if host.len() > MAX_HOST_LEN || !HOST_REGEX.is_match(host) {
        return Err(Error::invalid("host is not a valid hostname or IPv4 address"));
    }

    Ok(Target {
        user: user.to_string(),
        host: host.to_string(),
        port: normalize_port(port)?,
    })
}

/// Remote commands are fixed by the gateway; any override is refused.
pub fn validate_command(command: Option<&str>) -> Result<()> {
    match command {
        None => Ok(()),
        Some(_) => Err(Error::invalid("custom remote commands are not permitted")),
    }
}

/// Enforce the environment allow-list.
pub fn validate_env(env: &BTreeMap<String, String>) -> Result<()> {
    if env.len() > MAX_ENV_ENTRIES {
        return Err(Error::invalid(format!(
            "env has {} entries, exceeds {} limit",
            env.len(),
            MAX_ENV_ENTRIES
        )));
    }

    for (key, value) in env {
        if !ALLOWED_ENV_KEYS.contains(&key.as_str()) {
            return Err(Error::invalid(format!("env key {} is not allowed", key)));
        }
        if value.is_empty() {
            return Err(Error::invalid(format!("env value for {} is empty", key)));
        }
        if value.len() > MAX_ENV_VALUE_BYTES {
            return Err(Error::invalid(format!(
                "env value for {} exceeds {} bytes",
                key, MAX_ENV_VALUE_BYTES
            )));
        }
        if value.chars().any(char::is_control) {
            return Err(Error::invalid(format!(
                "env value for {} contains control characters",
                key
            )));
        }
    }

    Ok(())
}

/// Run every open-time check.
pub fn validate_open(request: &OpenRequest) -> Result<()> {
    validate_target(
        &request.target.user,
        &request.target.host,
        u32::from(request.target.port),
    )?;
    validate_command(request.command.as_deref())?;
    validate_env(&request.env)
}
