//! The verification pipeline: QR text in, [`VerificationOutcome`] out.
//!
//! Stage order: key availability → transport decode → payload parse →
//! policy → signature → freshness.  Every failure becomes an outcome with
//! `success = false` and exactly one reason string; nothing escapes as an
//! error or a panic.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MemberIdError, Result};
use crate::key::KeyProvider;
use crate::payload::{self, CredentialPayload};
use crate::policy::{self, Policy, PolicyChecks};
use crate::signing::{self, PublicKey};
use crate::transport::{self, StageLengths};
use crate::util;

/// Reason used when something inside the pipeline panicked.
const UNEXPECTED_FAILURE: &str = "Unknown error during QR verification";

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub stages: StageLengths,
    pub checks: PolicyChecks,
}

/// Result of one verification call.  Never mutated after construction.
///
/// `payload` is filled whenever the payload parsed, even on failure, so an
/// operator can see who presented a rejected credential.  It is only
/// trustworthy when [`payload_trusted`](Self::payload_trusted) is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub success: bool,
    pub payload: Option<CredentialPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

impl VerificationOutcome {
    fn key_unavailable() -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(MemberIdError::KeyUnavailable.to_string()),
            diagnostics: None,
        }
    }

    pub fn payload_trusted(&self) -> bool {
        self.success && self.payload.is_some()
    }

    /// Subject of a successfully verified credential; the duplicate key.
    pub fn verified_subject(&self) -> Option<&str> {
        if self.success {
            self.payload.as_ref().map(|p| p.subject.as_str())
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// Runs the pipeline against the key held by a shared [`KeyProvider`].
#[derive(Debug, Clone)]
pub struct Verifier {
    keys: Arc<KeyProvider>,
}

impl Verifier {
    pub fn new(keys: Arc<KeyProvider>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &KeyProvider {
        &self.keys
    }

    /// Verify scanned text at the current time.
    pub fn verify(&self, raw_text: &str, policy: &Policy) -> VerificationOutcome {
        self.verify_at(raw_text, policy, util::now_unix())
    }

    /// Verify scanned text as of Unix time `now`.
    ///
    /// Never fetches the key: if none is loaded the fixed "public key not
    /// available" outcome is returned without decoding anything.
    pub fn verify_at(&self, raw_text: &str, policy: &Policy, now: i64) -> VerificationOutcome {
        let Some(key) = self.keys.public_key() else {
            warn!("verification attempted without a loaded key");
            return VerificationOutcome::key_unavailable();
        };

        let mut stages = StageLengths::default();
        let mut checks = PolicyChecks::default();
        let mut parsed = None;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            run_pipeline(raw_text, policy, now, &key, &mut stages, &mut checks, &mut parsed)
        }));

        let diagnostics = Some(Diagnostics { stages, checks });
        let error = match result {
            Ok(Ok(())) => {
                debug!(subject = ?parsed.as_ref().map(|p| &p.subject), "credential verified");
                return VerificationOutcome {
                    success: true,
                    payload: parsed,
                    error: None,
                    diagnostics,
                };
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => UNEXPECTED_FAILURE.to_string(),
        };

        warn!(reason = %error, "credential rejected");
        VerificationOutcome {
            success: false,
            payload: parsed,
            error: Some(error),
            diagnostics,
        }
    }
}

fn run_pipeline(
    raw_text: &str,
    policy: &Policy,
    now: i64,
    key: &PublicKey,
    stages: &mut StageLengths,
    checks: &mut PolicyChecks,
    parsed: &mut Option<CredentialPayload>,
) -> Result<()> {
    let decoded = transport::decode_transport(raw_text, stages)?;
    let credential = parsed.insert(payload::parse_payload(&decoded.payload_bytes)?);

    policy::apply_policy(credential, policy, now, checks)?;

    if !signing::verify_signature(&decoded.payload_bytes, &decoded.signature, Some(key))? {
        return Err(MemberIdError::InvalidSignature);
    }

    // Enforced regardless of `policy.strict`.
    if credential.expires_at < now {
        return Err(MemberIdError::Expired);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use p256::ecdsa::{SigningKey, VerifyingKey};

    use super::*;
    use crate::payload::CredentialClass;
    use crate::transport::SIGNATURE_LEN;

    const NOW: i64 = 1_750_000_000;

    fn setup() -> (SigningKey, Verifier) {
        let sk = signing::generate_keypair();
        let pk = PublicKey::from(VerifyingKey::from(&sk));
        (sk, Verifier::new(Arc::new(KeyProvider::preloaded(pk))))
    }

    fn credential(class: CredentialClass, exp: i64) -> CredentialPayload {
        CredentialPayload {
            subject: "member-0815".into(),
            display_name: "Grace".into(),
            issued_at: NOW - 60,
            expires_at: exp,
            class,
        }
    }

    #[test]
    fn valid_credential_verifies() {
        let (sk, v) = setup();
        let c = credential(CredentialClass::AppIssued, NOW + 3600);
        let text = signing::mint_credential(&sk, &c).unwrap();

        let out = v.verify_at(&text, &Policy::default(), NOW);
        assert!(out.success, "{:?}", out.error);
        assert!(out.payload_trusted());
        assert_eq!(out.payload.as_ref(), Some(&c));
        assert_eq!(out.verified_subject(), Some("member-0815"));
        let d = out.diagnostics.unwrap();
        assert_eq!(d.stages.signature_len, SIGNATURE_LEN);
        assert!(d.checks.is_empty());
    }

    #[test]
    fn expiry_boundary() {
        let (sk, v) = setup();
        let at_now = signing::mint_credential(&sk, &credential(CredentialClass::AppIssued, NOW)).unwrap();
        assert!(v.verify_at(&at_now, &Policy::default(), NOW).success);

        let past = signing::mint_credential(&sk, &credential(CredentialClass::AppIssued, NOW - 1)).unwrap();
        let out = v.verify_at(&past, &Policy::default(), NOW);
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("Signature expired"));
        assert!(out.payload.is_some());
        assert!(!out.payload_trusted());
        assert_eq!(out.verified_subject(), None);
    }

    #[test]
    fn foreign_signer_rejected() {
        let (_, v) = setup();
        let other = signing::generate_keypair();
        let text =
            signing::mint_credential(&other, &credential(CredentialClass::AppIssued, NOW + 60)).unwrap();
        let out = v.verify_at(&text, &Policy::default(), NOW);
        assert_eq!(out.error.as_deref(), Some("Invalid signature"));
    }

    #[test]
    fn policy_failure_keeps_diagnostics() {
        let (sk, v) = setup();
        let text = signing::mint_credential(
            &sk,
            &credential(CredentialClass::AndroidWalletPass, NOW + 60),
        )
        .unwrap();
        let out = v.verify_at(
            &text,
            &Policy {
                restrict_to_app_issued: true,
                strict: false,
            },
            NOW,
        );
        assert!(!out.success);
        assert_eq!(
            out.error.as_deref(),
            Some("Only app Member IDs are allowed. Found: android_wallet")
        );
        let d = out.diagnostics.unwrap();
        assert_eq!(d.checks.app_only, Some(false));
        assert!(d.stages.payload_len > 0);
    }

    #[test]
    fn no_key_short_circuits() {
        let v = Verifier::new(Arc::new(KeyProvider::new(crate::key::StaticKeySource(
            String::new(),
        ))));
        let out = v.verify_at("anything at all", &Policy::default(), NOW);
        assert!(!out.success);
        assert_eq!(
            out.error.as_deref(),
            Some("Public key not available. Please check your connection and try again.")
        );
        assert!(out.diagnostics.is_none());
        assert!(out.payload.is_none());
    }

    #[test]
    fn short_text_has_zero_stages() {
        let (_, v) = setup();
        let out = v.verify_at("123", &Policy::default(), NOW);
        assert_eq!(out.error.as_deref(), Some("Invalid Member ID: string too short"));
        assert_eq!(out.diagnostics.unwrap().stages, StageLengths::default());
    }
}
