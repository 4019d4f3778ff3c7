//! Structured error types for the member-ID verifier.
//!
//! Every fallible library function returns [`Result<T>`] carrying a
//! [`MemberIdError`].  The `Display` text of each variant is exactly the
//! reason string an operator sees in a
//! [`VerificationOutcome`](crate::verifier::VerificationOutcome).

use thiserror::Error;

use crate::payload::CredentialClass;

// ---------------------------------------------------------------------------
// Primary error enum
// ---------------------------------------------------------------------------

/// Domain-specific error type for the verifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemberIdError {
    /// No verification key has been loaded yet (or the last load failed).
    #[error("Public key not available. Please check your connection and try again.")]
    KeyUnavailable,

    #[error("Failed to fetch public key: {0}")]
    KeyFetch(String),

    #[error("Invalid public key format: {0}")]
    KeyFormat(String),

    #[error("Invalid Member ID: {0}")]
    Input(String),

    #[error("Base45 decoding failed: {0}")]
    Base45(String),

    #[error("Zlib decompression failed: {0}")]
    Inflate(String),

    #[error("Data too short to contain signature. Length: {actual}, required: >= {required}")]
    Truncated { actual: usize, required: usize },

    #[error("CBOR parsing failed: {0}")]
    Payload(#[from] PayloadError),

    #[error("{0}")]
    Policy(#[from] PolicyViolation),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Signature expired")]
    Expired,

    #[error("Signature verification failed: {0}")]
    Crypto(String),

    #[error("config: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit a specific domain.
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, MemberIdError>;

// ---------------------------------------------------------------------------
// Payload and policy errors
// ---------------------------------------------------------------------------

/// Field-level failures while turning CBOR bytes into a credential.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("{0}")]
    Syntax(String),

    #[error("payload is not a map")]
    NotAMap,

    #[error("Missing '{0}' field")]
    Missing(&'static str),

    #[error("Invalid '{field}' field: expected {expected}")]
    Mistyped {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Invalid type code: {0}")]
    UnknownClass(String),
}

/// A credential that is cryptographically fine but rejected by policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("Only app Member IDs are allowed. Found: {0}")]
    ClassNotAllowed(CredentialClass),

    #[error("Member ID issued in the future (possible clock skew)")]
    IssuedInFuture,

    #[error("Member ID expires too far in the future")]
    ExpiresTooFar,

    #[error("Member ID has expired")]
    Expired,
}

// ---------------------------------------------------------------------------
// Context extension trait
// ---------------------------------------------------------------------------

/// Extension trait that tags any foreign `Result<T, E>` with the subsystem it
/// came from.
///
/// ```ignore
/// ZlibDecoder::new(data).read_to_end(&mut out).ctx_inflate("inflate")?;
/// ```
pub trait ResultExt<T> {
    fn ctx_inflate(self, msg: &str) -> Result<T>;
    fn ctx_crypto(self, msg: &str) -> Result<T>;
    fn ctx_key(self, msg: &str) -> Result<T>;
    fn ctx_config(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ctx_inflate(self, msg: &str) -> Result<T> {
        self.map_err(|e| MemberIdError::Inflate(format!("{msg}: {e}")))
    }
    fn ctx_crypto(self, msg: &str) -> Result<T> {
        self.map_err(|e| MemberIdError::Crypto(format!("{msg}: {e}")))
    }
    fn ctx_key(self, msg: &str) -> Result<T> {
        self.map_err(|e| MemberIdError::KeyFetch(format!("{msg}: {e}")))
    }
    fn ctx_config(self, msg: &str) -> Result<T> {
        self.map_err(|e| MemberIdError::Config(format!("{msg}: {e}")))
    }
}
