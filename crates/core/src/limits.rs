//! Input and resource limits for the gateway.
//!
//! These bound everything a caller controls: request bodies, stdin chunks,
//! terminal geometry, and the environment forwarded to the subprocess.

// === Request Body Limits ===

/// Maximum body size for `POST /sessions` (16KB).
pub const MAX_OPEN_BODY_BYTES: usize = 16 * 1024;

/// Maximum body size for `POST /sessions/resume` (1KB).
///
/// The token travels in the header; the body is at most `{}`.
pub const MAX_RESUME_BODY_BYTES: usize = 1024;

/// Maximum body size for `POST /sessions/{id}/resize` (1KB).
pub const MAX_RESIZE_BODY_BYTES: usize = 1024;

/// Maximum decoded stdin chunk in bytes (64KB).
pub const MAX_STDIN_BYTES: usize = 64 * 1024;

/// Maximum body size for `POST /sessions/{id}/stdin`.
///
/// Base64 inflates by 4/3, plus room for the JSON envelope.
pub const MAX_STDIN_BODY_BYTES: usize = MAX_STDIN_BYTES / 3 * 4 + 1024;

// === Terminal Geometry ===

/// Smallest accepted column/row count.
pub const MIN_TERMINAL_DIMENSION: u32 = 1;

/// Largest accepted column/row count.
pub const MAX_TERMINAL_DIMENSION: u32 = 4096;

/// Initial pty size before the first resize.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

// === Environment Allow-list ===

/// Environment variables a caller may forward to the subprocess.
pub const ALLOWED_ENV_KEYS: [&str; 3] = ["LANG", "LC_ALL", "TERM"];

/// Maximum number of forwarded environment entries.
pub const MAX_ENV_ENTRIES: usize = 8;

/// Maximum length of a forwarded environment value in bytes.
pub const MAX_ENV_VALUE_BYTES: usize = 128;

// === Target ===

/// Port used when the caller sends 0 or omits it.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Maximum host name length (RFC 1035).
pub const MAX_HOST_LEN: usize = 253;

/// User name pattern (portable POSIX login names).
pub const USER_PATTERN: &str = r"^[a-z_][a-z0-9_.-]{0,31}$";

/// Host pattern: dot-separated DNS labels or an IPv4 literal.
pub const HOST_PATTERN: &str =
    r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$";

// === Identifiers ===

/// Random bytes in a session id (rendered as 32 hex chars).
pub const SESSION_ID_BYTES: usize = 16;

/// Random bytes in a resume token.
pub const RESUME_TOKEN_BYTES: usize = 32;

/// Session id pattern.
pub const SESSION_ID_PATTERN: &str = r"^[0-9a-f]{32}$";
