//! Session ids, resume tokens, and keyed token hashing.

use std::fmt;
use std::sync::LazyLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use rand::RngCore;
use regex::Regex;
use sha2::Sha256;

use crate::limits::{RESUME_TOKEN_BYTES, SESSION_ID_BYTES, SESSION_ID_PATTERN};

type HmacSha256 = Hmac<Sha256>;

static SESSION_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(SESSION_ID_PATTERN).expect("invalid session id pattern"));

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// New unguessable session id: 32 lowercase hex chars.
pub fn new_session_id() -> String {
    HEXLOWER.encode(&random_bytes::<SESSION_ID_BYTES>())
}

/// New resume token. URL-safe base64, so it can never collide with the
/// hex session id alphabet-wise and length-wise.
pub fn new_resume_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes::<RESUME_TOKEN_BYTES>())
}

/// Strict session id shape check, run before any lookup.
pub fn is_valid_session_id(id: &str) -> bool {
    SESSION_ID_REGEX.is_match(id)
}

/// Keyed hash over resume tokens.
///
/// Only the hash is stored or compared; the raw token exists transiently at
/// issuance and on each authorized request.
#[derive(Clone)]
pub struct TokenHasher {
    key: Vec<u8>,
}

impl TokenHasher {
    /// Hasher with a caller-provided secret (stable across restarts).
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    /// Hasher with a random per-process secret.
    pub fn random() -> Self {
        Self {
            key: random_bytes::<32>().to_vec(),
        }
    }

    /// HMAC-SHA256 of the token, hex-encoded.
    pub fn hash(&self, token: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(token.as_bytes());
        HEXLOWER.encode(&mac.finalize().into_bytes())
    }
}

impl fmt::Debug for TokenHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenHasher").finish_non_exhaustive()
    }
}
