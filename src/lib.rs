//! Offline verifier for member-ID QR credentials.
//!
//! This crate provides:
//! - A single-flight loader for the issuer's P-256 verification key
//! - The QR transport decoder (base45 → zlib → payload || signature)
//! - CBOR payload parsing with per-field errors
//! - Operator policy checks (class restriction, strict temporal checks)
//! - ECDSA P-256 / SHA-256 signature and freshness verification
//! - A session ledger that flags repeat presentations of the same member
//!
//! The CLI wrapper lives in `src/main.rs`.

#![deny(unsafe_code)]

pub mod error;
pub mod config;

pub mod key;
pub mod ledger;
pub mod payload;
pub mod policy;
pub mod session;
pub mod signing;
pub mod transport;
pub mod util;
pub mod verifier;
