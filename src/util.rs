//! Clock, hashing, hex and version helpers.

use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::error::{MemberIdError, Result};

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

// ---------------------------------------------------------------------------
// Hex
// ---------------------------------------------------------------------------

/// Strict hex body (no prefix, no separators).
static HEX_RE: std::sync::LazyLock<regex::Regex> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"^[0-9a-fA-F]+$").unwrap());

/// Decode a hex string as served by the key endpoint.
///
/// Surrounding whitespace and an optional `0x` prefix are stripped first.
pub fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if !HEX_RE.is_match(body) {
        return Err(MemberIdError::KeyFormat("not a valid hex string".into()));
    }
    if body.len() % 2 != 0 {
        return Err(MemberIdError::KeyFormat(format!(
            "invalid hex string length: {} (must be even)",
            body.len()
        )));
    }
    hex::decode(body).map_err(|e| MemberIdError::KeyFormat(e.to_string()))
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Current Unix time in whole seconds.
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

// ---------------------------------------------------------------------------
// Version constants (set by build.rs)
// ---------------------------------------------------------------------------

pub const GIT_HASH: &str = env!("MEMBERID_GIT_HASH");
pub const BUILD_TS: &str = env!("MEMBERID_BUILD_TS");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line version string for display.
pub fn version_string() -> String {
    format!("memberid v{VERSION} (git {GIT_HASH}, built {BUILD_TS})")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = sha256(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hex_accepts_prefix_and_whitespace() {
        assert_eq!(decode_hex(" 0x0aFF\n").unwrap(), vec![0x0a, 0xff]);
        assert_eq!(decode_hex("00").unwrap(), vec![0x00]);
    }

    #[test]
    fn hex_rejects_garbage() {
        assert!(matches!(
            decode_hex("zz"),
            Err(MemberIdError::KeyFormat(_))
        ));
        assert!(decode_hex("").is_err());
        assert!(decode_hex("0x").is_err());
        assert!(decode_hex("abc").unwrap_err().to_string().contains("must be even"));
    }

    #[test]
    fn now_is_after_2020() {
        assert!(now_unix() > 1_577_836_800);
    }

    #[test]
    fn version_string_non_empty() {
        assert!(version_string().contains("memberid"));
    }
}
