//! Credential payload: the CBOR record carried inside a member-ID QR code.
//!
//! On the wire the payload is a CBOR map with five text keys:
//!
//! | key    | meaning                  | CBOR type        |
//! |--------|--------------------------|------------------|
//! | `sub`  | subject (holder id)      | non-empty text   |
//! | `name` | display name             | non-empty text   |
//! | `iat`  | issued at, Unix seconds  | number           |
//! | `exp`  | expires at, Unix seconds | number           |
//! | `t`    | credential class code    | text (`a`/`wi`/`wa`) |
//!
//! Unknown keys are ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_cbor::Value;

use crate::error::{MemberIdError, PayloadError, Result};

// ---------------------------------------------------------------------------
// Credential class
// ---------------------------------------------------------------------------

/// Which channel issued the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialClass {
    #[serde(rename = "app")]
    AppIssued,
    #[serde(rename = "apple_wallet")]
    AppleWalletPass,
    #[serde(rename = "android_wallet")]
    AndroidWalletPass,
}

struct ClassEntry {
    class: CredentialClass,
    code: &'static str,
    ident: &'static str,
    label: &'static str,
}

/// The one place class codes, identifiers and labels are defined.
const CLASS_TABLE: [ClassEntry; 3] = [
    ClassEntry {
        class: CredentialClass::AppIssued,
        code: "a",
        ident: "app",
        label: "App Member ID",
    },
    ClassEntry {
        class: CredentialClass::AppleWalletPass,
        code: "wi",
        ident: "apple_wallet",
        label: "Apple Wallet Pass",
    },
    ClassEntry {
        class: CredentialClass::AndroidWalletPass,
        code: "wa",
        ident: "android_wallet",
        label: "Android Wallet Pass",
    },
];

impl CredentialClass {
    pub const ALL: [CredentialClass; 3] = [
        CredentialClass::AppIssued,
        CredentialClass::AppleWalletPass,
        CredentialClass::AndroidWalletPass,
    ];

    fn entry(self) -> &'static ClassEntry {
        // The table holds one row per variant, in declaration order.
        &CLASS_TABLE[self as usize]
    }

    /// Map a wire type code to a class.
    pub fn from_code(code: &str) -> Option<Self> {
        CLASS_TABLE.iter().find(|e| e.code == code).map(|e| e.class)
    }

    /// Wire type code (`a`, `wi`, `wa`).
    pub fn code(self) -> &'static str {
        self.entry().code
    }

    /// Stable identifier used in reason strings and JSON output.
    pub fn as_str(self) -> &'static str {
        self.entry().ident
    }

    /// Label shown to the operator.
    pub fn display_name(self) -> &'static str {
        self.entry().label
    }
}

impl std::fmt::Display for CredentialClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CredentialClass {
    type Err = MemberIdError;

    fn from_str(s: &str) -> Result<Self> {
        CLASS_TABLE
            .iter()
            .find(|e| e.ident == s)
            .map(|e| e.class)
            .ok_or_else(|| MemberIdError::Other(format!("unknown credential class '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A parsed credential.  Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPayload {
    pub subject: String,
    pub display_name: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub class: CredentialClass,
}

/// Field order mirrors what the issuer emits.
#[derive(Serialize)]
struct WirePayload<'a> {
    sub: &'a str,
    name: &'a str,
    t: &'a str,
    iat: i64,
    exp: i64,
}

/// Decode CBOR bytes into a [`CredentialPayload`].
pub fn parse_payload(bytes: &[u8]) -> Result<CredentialPayload> {
    let value: Value =
        serde_cbor::from_slice(bytes).map_err(|e| PayloadError::Syntax(e.to_string()))?;
    let map = match value {
        Value::Map(m) => m,
        _ => return Err(PayloadError::NotAMap.into()),
    };

    let subject = required_text(&map, "sub")?;
    let display_name = required_text(&map, "name")?;
    let issued_at = required_number(&map, "iat")?;
    let expires_at = required_number(&map, "exp")?;
    let code = required_text(&map, "t")?;
    let class = CredentialClass::from_code(&code).ok_or(PayloadError::UnknownClass(code))?;

    Ok(CredentialPayload {
        subject,
        display_name,
        issued_at,
        expires_at,
        class,
    })
}

/// Encode a payload the way the issuer does.  Used by tests and the dev
/// `mint` command.
pub fn encode_payload(payload: &CredentialPayload) -> Result<Vec<u8>> {
    let wire = WirePayload {
        sub: &payload.subject,
        name: &payload.display_name,
        t: payload.class.code(),
        iat: payload.issued_at,
        exp: payload.expires_at,
    };
    serde_cbor::to_vec(&wire).map_err(|e| MemberIdError::Other(format!("encode payload: {e}")))
}

fn field<'a>(map: &'a BTreeMap<Value, Value>, key: &'static str) -> Option<&'a Value> {
    map.get(&Value::Text(key.to_string()))
}

fn required_text(
    map: &BTreeMap<Value, Value>,
    key: &'static str,
) -> std::result::Result<String, PayloadError> {
    match field(map, key) {
        None | Some(Value::Null) => Err(PayloadError::Missing(key)),
        Some(Value::Text(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(PayloadError::Mistyped {
            field: key,
            expected: "non-empty text",
        }),
    }
}

fn required_number(
    map: &BTreeMap<Value, Value>,
    key: &'static str,
) -> std::result::Result<i64, PayloadError> {
    let mistyped = PayloadError::Mistyped {
        field: key,
        expected: "a number",
    };
    match field(map, key) {
        None | Some(Value::Null) => Err(PayloadError::Missing(key)),
        Some(Value::Integer(n)) => i64::try_from(*n).map_err(|_| mistyped),
        Some(Value::Float(f)) if f.is_finite() => Ok(f.trunc() as i64),
        Some(_) => Err(mistyped),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
