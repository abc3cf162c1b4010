//! Unified error types for the terminal-session gateway.
//!
//! Every fault is classified into exactly one [`ErrorKind`] before it leaves
//! the crate that detected it. Codes are stable and machine-readable:
//! - REQ_001-002: Request errors
//! - AUTH_001-002: Authorization errors
//! - SESS_001-002: Session lookup errors
//! - STORE_001: Persistence errors
//! - LAUNCH_001-004: Subprocess launch errors
//! - RATE_001, CAP_001: Admission errors
//! - INT_001: Uncategorized

use std::io;

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a subprocess launch failed, derived from the underlying OS/process error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchFailure {
    /// LAUNCH_001: Destination could not be reached
    HostUnreachable,
    /// LAUNCH_002: Remote side refused our credentials
    AuthenticationFailed,
    /// LAUNCH_003: SSH client binary is missing
    BinaryMissing,
    /// LAUNCH_004: Any other pty/spawn I/O failure
    Io,
}

impl LaunchFailure {
    /// Classify an OS error returned by the launcher.
    ///
    /// The error kind is checked first; the message is consulted for the
    /// diagnostics an SSH client prints when it fails before the shell starts.
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => return Self::BinaryMissing,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::TimedOut => return Self::HostUnreachable,
            _ => {}
        }

        let msg = err.to_string().to_lowercase();
        if msg.contains("permission denied (")
            || msg.contains("authentication failed")
            || msg.contains("host key verification failed")
        {
            Self::AuthenticationFailed
        } else if msg.contains("could not resolve hostname")
            || msg.contains("no route to host")
            || msg.contains("network is unreachable")
            || msg.contains("connection refused")
            || msg.contains("connection timed out")
        {
            Self::HostUnreachable
        } else if msg.contains("no such file or directory") {
            Self::BinaryMissing
        } else {
            Self::Io
        }
    }

    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::HostUnreachable => "LAUNCH_001",
            Self::AuthenticationFailed => "LAUNCH_002",
            Self::BinaryMissing => "LAUNCH_003",
            Self::Io => "LAUNCH_004",
        }
    }

    /// Get the HTTP status code.
    ///
    /// Upstream faults are 502, local faults 503.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::HostUnreachable | Self::AuthenticationFailed => 502,
            Self::BinaryMissing | Self::Io => 503,
        }
    }

    /// Operator-facing description without paths or credentials.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::HostUnreachable => "destination host is unreachable",
            Self::AuthenticationFailed => "authentication with the destination host failed",
            Self::BinaryMissing => "ssh client is not available on the gateway",
            Self::Io => "failed to start terminal session",
        }
    }
}

/// The closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Unauthorized,
    SessionNotFound,
    SessionExpired,
    PersistenceFailed,
    LaunchFailed(LaunchFailure),
    RateLimited,
    CapacityExceeded,
    Internal,
}

impl ErrorKind {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "REQ_001",
            Self::Unauthorized => "AUTH_002",
            Self::SessionNotFound => "SESS_001",
            Self::SessionExpired => "SESS_002",
            Self::PersistenceFailed => "STORE_001",
            Self::LaunchFailed(reason) => reason.code(),
            Self::RateLimited => "RATE_001",
            Self::CapacityExceeded => "CAP_001",
            Self::Internal => "INT_001",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::Unauthorized => 403,
            Self::SessionNotFound => 404,
            Self::SessionExpired => 401,
            Self::PersistenceFailed => 503,
            Self::LaunchFailed(reason) => reason.http_status(),
            Self::RateLimited => 429,
            Self::CapacityExceeded => 503,
            Self::Internal => 500,
        }
    }
}

/// Unified error type for the gateway.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("session not found")]
    SessionNotFound,

    #[error("session expired")]
    SessionExpired,

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("launch failed: {}", reason.describe())]
    LaunchFailed {
        reason: LaunchFailure,
        #[source]
        source: io::Error,
    },

    #[error("rate limited")]
    RateLimited { retry_after: Option<u64> },

    #[error("max sessions exceeded")]
    CapacityExceeded,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::PersistenceFailed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap a launcher error, classifying it at the point of failure.
    pub fn launch(source: io::Error) -> Self {
        Self::LaunchFailed {
            reason: LaunchFailure::classify(&source),
            source,
        }
    }

    /// Get the classified kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::SessionNotFound => ErrorKind::SessionNotFound,
            Self::SessionExpired => ErrorKind::SessionExpired,
            Self::PersistenceFailed(_) => ErrorKind::PersistenceFailed,
            Self::LaunchFailed { reason, .. } => ErrorKind::LaunchFailed(*reason),
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::CapacityExceeded => ErrorKind::CapacityExceeded,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show to callers.
    ///
    /// Persistence and internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidRequest(msg) => msg.clone(),
            Self::PersistenceFailed(_) => "session metadata could not be recorded".to_string(),
            Self::LaunchFailed { reason, .. } => reason.describe().to_string(),
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }
}
