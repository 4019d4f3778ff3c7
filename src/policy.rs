//! Operator policy applied to a parsed credential before signature checks.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PolicyViolation, Result};
use crate::payload::{CredentialClass, CredentialPayload};

/// Clock-skew tolerance for strict temporal checks (5 minutes).
pub const CLOCK_SKEW_SECS: i64 = 300;

/// Longest lifetime a credential may still have under strict mode (365 days).
pub const MAX_FUTURE_EXPIRY_SECS: i64 = 86_400 * 365;

/// Per-call verification policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Accept only credentials issued by the app itself (no wallet passes).
    pub restrict_to_app_issued: bool,
    /// Add temporal sanity checks on top of plain expiry.
    pub strict: bool,
}

/// Which policy checks ran, and for the class check, whether it passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyChecks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

impl PolicyChecks {
    pub fn is_empty(&self) -> bool {
        self.app_only.is_none() && self.strict.is_none()
    }
}

/// Apply `policy` to `payload` at Unix time `now`.
///
/// `checks` records every check attempted, including the one that failed.
pub fn apply_policy(
    payload: &CredentialPayload,
    policy: &Policy,
    now: i64,
    checks: &mut PolicyChecks,
) -> Result<()> {
    if policy.restrict_to_app_issued {
        let is_app = payload.class == CredentialClass::AppIssued;
        checks.app_only = Some(is_app);
        if !is_app {
            return Err(PolicyViolation::ClassNotAllowed(payload.class).into());
        }
    }

    if policy.strict {
        checks.strict = Some(true);
        if payload.issued_at > now.saturating_add(CLOCK_SKEW_SECS) {
            return Err(PolicyViolation::IssuedInFuture.into());
        }
        if payload.expires_at > now.saturating_add(MAX_FUTURE_EXPIRY_SECS) {
            return Err(PolicyViolation::ExpiresTooFar.into());
        }
        if payload.expires_at < now.saturating_sub(CLOCK_SKEW_SECS) {
            return Err(PolicyViolation::Expired.into());
        }
    }

    debug!(?checks, "policy passed");
    Ok(())
}
