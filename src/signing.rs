//! ECDSA P-256 / SHA-256 verification of credential payloads, plus the dev
//! helpers that mint credentials for tests and local tooling.

use p256::ecdsa::{
    signature::{Signer as _, Verifier as _},
    Signature, SigningKey, VerifyingKey,
};
use secrecy::{ExposeSecret as _, SecretString};

use crate::error::{MemberIdError, Result, ResultExt as _};
use crate::payload::{self, CredentialPayload};
use crate::transport::{self, SIGNATURE_LEN};
use crate::util;

// ---------------------------------------------------------------------------
// Public key
// ---------------------------------------------------------------------------

/// The issuer's verification key.
#[derive(Clone)]
pub struct PublicKey {
    key: VerifyingKey,
    /// SHA-256 hex of the uncompressed SEC1 point.
    fingerprint: String,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for PublicKey {}

impl PublicKey {
    /// Parse the hex text served by the key endpoint (SEC1 point, optional
    /// `0x` prefix).
    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = util::decode_hex(text)?;
        let key = VerifyingKey::from_sec1_bytes(&bytes)
            .map_err(|e| MemberIdError::KeyFormat(format!("not a P-256 point: {e}")))?;
        Ok(Self::from(key))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.key
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Uncompressed SEC1 encoding as lowercase hex, the format the issuer
    /// publishes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.key.to_encoded_point(false).as_bytes())
    }
}

impl From<VerifyingKey> for PublicKey {
    fn from(key: VerifyingKey) -> Self {
        let fingerprint = util::sha256_hex(key.to_encoded_point(false).as_bytes());
        Self { key, fingerprint }
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Verify `signature` over `payload_bytes` exactly as decoded.
///
/// Returns `Ok(false)` for anything that cannot be a valid signature (wrong
/// length, out-of-range scalars, mismatch).  Only a missing key is an error.
pub fn verify_signature(
    payload_bytes: &[u8],
    signature: &[u8],
    key: Option<&PublicKey>,
) -> Result<bool> {
    if signature.len() != SIGNATURE_LEN {
        return Ok(false);
    }
    let key = key.ok_or(MemberIdError::KeyUnavailable)?;
    let Ok(sig) = Signature::from_slice(signature) else {
        return Ok(false);
    };
    Ok(key.key.verify(payload_bytes, &sig).is_ok())
}

// ---------------------------------------------------------------------------
// Dev / test credential minting
// ---------------------------------------------------------------------------

/// Generate a fresh P-256 signing key.
pub fn generate_keypair() -> SigningKey {
    SigningKey::random(&mut rand_core::OsRng)
}

/// Parse a 32-byte private scalar from hex.
pub fn signing_key_from_hex(secret: &SecretString) -> Result<SigningKey> {
    let bytes = util::decode_hex(secret.expose_secret())
        .map_err(|_| MemberIdError::Crypto("signing key is not valid hex".into()))?;
    if bytes.len() != 32 {
        return Err(MemberIdError::Crypto(
            "signing key must decode to 32 bytes".into(),
        ));
    }
    SigningKey::from_slice(&bytes).ctx_crypto("parse P-256 private key")
}

/// Produce QR text for `payload`, signed with `signing_key`.
pub fn mint_credential(signing_key: &SigningKey, payload: &CredentialPayload) -> Result<String> {
    let cbor = payload::encode_payload(payload)?;
    let sig: Signature = signing_key.sign(&cbor);
    transport::encode_transport(&cbor, &sig.to_bytes())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
