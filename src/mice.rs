//! Merkle Integrity Content Encoding (`mi-sha256-03`), `spec.md` §4.7.
//!
//! Frames a body into fixed-size records prefixed by the big-endian record
//! size, and computes a cumulative SHA-256 integrity proof per
//! `draft-thomson-http-mice-03`. The handler only ever needs the
//! "last proof is the root" forward-encoding direction (no later record
//! reads the root of an earlier one), which lets the encoder work strictly
//! in one pass from the end of the body to the start.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest as _, Sha256};

pub const DEFAULT_RECORD_SIZE: usize = 16384;

/// `mi-sha256-03=<base64>` proof plus the framed byte stream, ready to be
/// attached to the response as `Digest` / body.
pub struct MiceEncoded {
    pub encoded_body: Vec<u8>,
    pub digest_base64: String,
}

/// Encode `body` with record size `record_size`, per the MICE draft:
///
/// - Split `body` into records of at most `record_size` bytes, last-to-first.
/// - `proof[last] = SHA256(record[last] || 0x00)`.
/// - `proof[i] = SHA256(record[i] || proof[i+1] || 0x01)` for all earlier
///   records.
/// - The `Digest` header carries `proof[0]` (the root).
/// - The wire payload is `be64(record_size) || record[0] || record[1] || ...`.
pub fn encode(body: &[u8], record_size: usize) -> MiceEncoded {
    assert!(record_size > 0, "MICE record size must be positive");

    let records: Vec<&[u8]> = if body.is_empty() {
        vec![&[]]
    } else {
        body.chunks(record_size).collect()
    };

    let mut proof = {
        let mut hasher = Sha256::new();
        hasher.update(records[records.len() - 1]);
        hasher.update([0x00]);
        hasher.finalize().to_vec()
    };

    for record in records[..records.len() - 1].iter().rev() {
        let mut hasher = Sha256::new();
        hasher.update(record);
        hasher.update(&proof);
        hasher.update([0x01]);
        proof = hasher.finalize().to_vec();
    }

    let mut encoded_body = Vec::with_capacity(8 + body.len());
    encoded_body.extend_from_slice(&(record_size as u64).to_be_bytes());
    for record in &records {
        encoded_body.extend_from_slice(record);
    }

    MiceEncoded {
        encoded_body,
        digest_base64: STANDARD.encode(proof),
    }
}

/// The `Digest` header value for an encoded payload, per `spec.md` §4.7.
pub fn digest_header_value(encoded: &MiceEncoded) -> String {
    format!("mi-sha256-03={}", encoded.digest_base64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_record_body_is_prefix_plus_body() {
        let body = b"hello world";
        let encoded = encode(body, DEFAULT_RECORD_SIZE);
        let mut expected = (DEFAULT_RECORD_SIZE as u64).to_be_bytes().to_vec();
        expected.extend_from_slice(body);
        assert_eq!(encoded.encoded_body, expected);
    }

    #[test]
    fn empty_body_still_gets_the_length_prefix() {
        let encoded = encode(b"", DEFAULT_RECORD_SIZE);
        assert_eq!(encoded.encoded_body.len(), 8);
    }

    #[test]
    fn multi_record_body_frames_each_chunk() {
        let body = vec![7u8; DEFAULT_RECORD_SIZE + 100];
        let encoded = encode(&body, DEFAULT_RECORD_SIZE);
        assert_eq!(encoded.encoded_body.len(), 8 + body.len());
        assert_eq!(&encoded.encoded_body[8..8 + DEFAULT_RECORD_SIZE], &body[..DEFAULT_RECORD_SIZE]);
    }

    #[test]
    fn digest_header_value_has_mi_sha256_prefix() {
        let encoded = encode(b"x", DEFAULT_RECORD_SIZE);
        assert!(digest_header_value(&encoded).starts_with("mi-sha256-03="));
    }

    #[test]
    fn proof_is_deterministic() {
        let a = encode(b"same bytes", DEFAULT_RECORD_SIZE);
        let b = encode(b"same bytes", DEFAULT_RECORD_SIZE);
        assert_eq!(a.digest_base64, b.digest_base64);
    }

    #[test]
    fn different_bodies_produce_different_proofs() {
        let a = encode(b"one", DEFAULT_RECORD_SIZE);
        let b = encode(b"two", DEFAULT_RECORD_SIZE);
        assert_ne!(a.digest_base64, b.digest_base64);
    }
}
