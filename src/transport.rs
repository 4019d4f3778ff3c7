//! QR text transport: base45 text → zlib stream → payload bytes || signature.
//!
//! The signature is a fixed-size raw P-256 `r || s` pair appended to the
//! CBOR payload before compression.  There is no length prefix; the last
//! [`SIGNATURE_LEN`] bytes are always the signature.

use std::io::{Read as _, Write as _};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MemberIdError, Result, ResultExt as _};

/// Raw fixed-size ECDSA P-256 signature length.
pub const SIGNATURE_LEN: usize = 64;

/// Inputs shorter than this (after trimming) are rejected without decoding.
pub const MIN_TEXT_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Byte lengths observed at each decode stage.  Zero means the stage was not
/// reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLengths {
    pub base45_decoded_len: usize,
    pub decompressed_len: usize,
    pub payload_len: usize,
    pub signature_len: usize,
}

/// A successfully split transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransport {
    pub payload_bytes: Vec<u8>,
    pub signature: Vec<u8>,
    pub stages: StageLengths,
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Reverse the QR text encoding.
///
/// `stages` is filled in as far as decoding gets, so callers keep the
/// diagnostics even when this returns `Err`.
pub fn decode_transport(raw_text: &str, stages: &mut StageLengths) -> Result<DecodedTransport> {
    let text = raw_text.trim();
    if text.is_empty() {
        return Err(MemberIdError::Input("empty or null string".into()));
    }
    if text.chars().count() < MIN_TEXT_LEN {
        return Err(MemberIdError::Input("string too short".into()));
    }

    let compressed = base45::decode(text)
        .map_err(|e| MemberIdError::Base45(format!("{e:?}")))?;
    if compressed.is_empty() {
        return Err(MemberIdError::Base45("invalid or empty result".into()));
    }
    stages.base45_decoded_len = compressed.len();

    let inflated = inflate(&compressed)?;
    stages.decompressed_len = inflated.len();

    if inflated.len() < SIGNATURE_LEN {
        return Err(MemberIdError::Truncated {
            actual: inflated.len(),
            required: SIGNATURE_LEN,
        });
    }

    let split_at = inflated.len() - SIGNATURE_LEN;
    let (payload, signature) = inflated.split_at(split_at);
    stages.payload_len = payload.len();
    stages.signature_len = signature.len();
    debug!(
        base45 = stages.base45_decoded_len,
        inflated = stages.decompressed_len,
        payload = stages.payload_len,
        "transport decoded"
    );

    Ok(DecodedTransport {
        payload_bytes: payload.to_vec(),
        signature: signature.to_vec(),
        stages: *stages,
    })
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .ctx_inflate("inflate")?;
    if out.is_empty() {
        return Err(MemberIdError::Inflate(
            "Decompression resulted in empty data".into(),
        ));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Encode (inverse, for fixtures and the dev `mint` command)
// ---------------------------------------------------------------------------

/// Build QR text from payload bytes and a raw signature.
pub fn encode_transport(payload_bytes: &[u8], signature: &[u8]) -> Result<String> {
    let mut combined = Vec::with_capacity(payload_bytes.len() + signature.len());
    combined.extend_from_slice(payload_bytes);
    combined.extend_from_slice(signature);

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&combined)
        .map_err(|e| MemberIdError::Other(format!("deflate: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| MemberIdError::Other(format!("deflate: {e}")))?;
    Ok(base45::encode(compressed))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> (Result<DecodedTransport>, StageLengths) {
        let mut stages = StageLengths::default();
        let r = decode_transport(text, &mut stages);
        (r, stages)
    }

    #[test]
    fn split_keeps_last_64_bytes_as_signature() {
        let payload = b"payload-bytes-of-some-length".to_vec();
        let sig = [7u8; SIGNATURE_LEN];
        let text = encode_transport(&payload, &sig).unwrap();

        let (r, stages) = decode(&text);
        let t = r.unwrap();
        assert_eq!(t.payload_bytes, payload);
        assert_eq!(t.signature, sig.to_vec());
        assert_eq!(stages.decompressed_len, payload.len() + SIGNATURE_LEN);
        assert_eq!(stages.signature_len, SIGNATURE_LEN);
        assert_eq!(t.stages, stages);
    }

    #[test]
    fn exactly_signature_sized_gives_empty_payload() {
        let text = encode_transport(&[], &[1u8; SIGNATURE_LEN]).unwrap();
        let t = decode(&text).0.unwrap();
        assert!(t.payload_bytes.is_empty());
    }

    #[test]
    fn short_input_rejected_before_decoding() {
        let (r, stages) = decode("ABC");
        assert_eq!(r.unwrap_err().to_string(), "Invalid Member ID: string too short");
        assert_eq!(stages, StageLengths::default());

        let (r, _) = decode("   \n\t ");
        assert_eq!(
            r.unwrap_err().to_string(),
            "Invalid Member ID: empty or null string"
        );
    }

    #[test]
    fn bad_alphabet_rejected() {
        let (r, stages) = decode("~~~~~~~~~~~~");
        assert!(matches!(r, Err(MemberIdError::Base45(_))));
        assert_eq!(stages.base45_decoded_len, 0);
    }

    #[test]
    fn non_zlib_bytes_rejected() {
        let text = base45::encode(b"definitely not a zlib stream");
        let (r, stages) = decode(&text);
        assert!(matches!(r, Err(MemberIdError::Inflate(_))));
        assert!(stages.base45_decoded_len > 0);
        assert_eq!(stages.decompressed_len, 0);
    }

    #[test]
    fn undersized_buffer_cites_lengths() {
        let text = encode_transport(b"tiny", &[0u8; 10]).unwrap();
        let (r, stages) = decode(&text);
        assert_eq!(
            r.unwrap_err(),
            MemberIdError::Truncated {
                actual: 14,
                required: SIGNATURE_LEN
            }
        );
        assert_eq!(stages.decompressed_len, 14);
        assert_eq!(stages.payload_len, 0);
    }
}
