//! Exchange signer (`spec.md` §4.8, `SPEC_FULL.md` §4.8): builds the
//! `application/signed-exchange;v=b2` byte layout — magic string, fallback
//! URL, signature-header-block length, signature CBOR, response-header
//! CBOR, payload — and signs the webpackage draft's "message to sign"
//! construction with ECDSA P-256 over SHA-256.

use crate::cbor::DataItem;
use crate::crypto::CertificateChain;
use crate::model::EncodeParams;
use std::sync::Arc;

/// 8-byte magic string identifying the signed-exchange format version this
/// encoder emits.
const MAGIC: &[u8] = b"sxg1-b3\0";

/// 64 leading space bytes, followed by the format-version string, that
/// prefix every "message to sign" per the webpackage draft — intended to
/// make a signed-exchange message unusable as a valid TLS 1.3 handshake
/// signature or vice versa.
const SIGNING_CONTEXT: &[u8] = b"HTTP Exchange 1 b3";

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("payload too large to encode into a single exchange ({0} bytes)")]
    PayloadTooLarge(usize),
}

/// `EncodeExchange(requestURI, status, headers, payload, signParams) -> bytes`
/// from `spec.md` §6.
pub trait ExchangeEncoder: Send + Sync {
    fn encode(&self, params: &EncodeParams) -> Result<Vec<u8>, SignerError>;
}

/// The concrete encoder: canonical-CBOR header maps signed with the
/// process's loaded certificate chain.
pub struct Cbor1SxgEncoder {
    pub cert_chain: Arc<CertificateChain>,
}

impl Cbor1SxgEncoder {
    pub fn new(cert_chain: Arc<CertificateChain>) -> Self {
        Self { cert_chain }
    }

    fn response_headers_item(params: &EncodeParams) -> DataItem {
        let mut entries = vec![(
            DataItem::bytes(b":status".to_vec()),
            DataItem::bytes(params.status.to_string().into_bytes()),
        )];
        for (name, value) in params.response_headers {
            entries.push((
                DataItem::bytes(name.to_ascii_lowercase().into_bytes()),
                DataItem::bytes(value.clone().into_bytes()),
            ));
        }
        DataItem::Map(entries)
    }

    fn signature_item(params: &EncodeParams, signature: &[u8]) -> DataItem {
        DataItem::Array(vec![DataItem::Map(vec![
            (DataItem::bytes(b"label".to_vec()), DataItem::bytes(b"sig1".to_vec())),
            (
                DataItem::bytes(b"cert-sha256".to_vec()),
                DataItem::bytes(params.cert_sha256.to_vec()),
            ),
            (
                DataItem::bytes(b"cert-url".to_vec()),
                DataItem::bytes(params.cert_url.clone().into_bytes()),
            ),
            (
                DataItem::bytes(b"validity-url".to_vec()),
                DataItem::bytes(params.validity_url.clone().into_bytes()),
            ),
            (
                DataItem::bytes(b"date".to_vec()),
                DataItem::Int(params.date.timestamp()),
            ),
            (
                DataItem::bytes(b"expires".to_vec()),
                DataItem::Int(params.expires.timestamp()),
            ),
            (
                DataItem::bytes(b"integrity".to_vec()),
                DataItem::bytes(b"digest/mi-sha256-03".to_vec()),
            ),
            (DataItem::bytes(b"sig".to_vec()), DataItem::bytes(signature.to_vec())),
        ])])
    }

    fn message_to_sign(params: &EncodeParams, response_headers_cbor: &[u8]) -> Vec<u8> {
        let mut message = vec![0x20u8; 64];
        message.extend_from_slice(SIGNING_CONTEXT);
        message.push(0);
        message.extend_from_slice(&params.cert_sha256);
        message.extend_from_slice(&(params.date.timestamp() as u64).to_be_bytes());
        message.extend_from_slice(&(params.expires.timestamp() as u64).to_be_bytes());
        message.extend_from_slice(params.cert_url.as_bytes());
        message.extend_from_slice(params.validity_url.as_bytes());
        message.extend_from_slice(response_headers_cbor);
        message
    }
}

impl ExchangeEncoder for Cbor1SxgEncoder {
    fn encode(&self, params: &EncodeParams) -> Result<Vec<u8>, SignerError> {
        let headers_cbor = Self::response_headers_item(params).encode();
        let message = Self::message_to_sign(params, &headers_cbor);
        let signature = self
            .cert_chain
            .sign(&message)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        let signature_cbor = Self::signature_item(params, &signature).encode();

        if signature_cbor.len() > 0xFF_FFFF || headers_cbor.len() > 0xFF_FFFF {
            return Err(SignerError::PayloadTooLarge(
                signature_cbor.len() + headers_cbor.len(),
            ));
        }

        let fallback = params.request_uri.as_bytes();
        if fallback.len() > u16::MAX as usize {
            return Err(SignerError::PayloadTooLarge(fallback.len()));
        }

        let mut out = Vec::with_capacity(
            MAGIC.len() + 2 + fallback.len() + 6 + signature_cbor.len() + headers_cbor.len() + params.payload.len(),
        );
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(fallback.len() as u16).to_be_bytes());
        out.extend_from_slice(fallback);
        write_u24(&mut out, signature_cbor.len());
        write_u24(&mut out, headers_cbor.len());
        out.extend_from_slice(&signature_cbor);
        out.extend_from_slice(&headers_cbor);
        out.extend_from_slice(params.payload);
        Ok(out)
    }
}

fn write_u24(out: &mut Vec<u8>, value: usize) {
    let bytes = (value as u32).to_be_bytes();
    out.extend_from_slice(&bytes[1..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ring::rand::SystemRandom;
    use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};

    fn test_chain() -> Arc<CertificateChain> {
        let rng = SystemRandom::new();
        let key = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        Arc::new(CertificateChain::from_der(vec![b"fixture cert".to_vec()], key.as_ref()).unwrap())
    }

    fn params<'a>(headers: &'a [(String, String)], payload: &'a [u8], chain: &CertificateChain) -> EncodeParams<'a> {
        EncodeParams {
            request_uri: "https://example.com/amp/x.html",
            status: 200,
            response_headers: headers,
            payload,
            cert_url: "https://pkg.example.com/amppkg/cert/abc".to_string(),
            cert_sha256: chain.cert_sha256(),
            validity_url: "https://pkg.example.com/amppkg/validity".to_string(),
            date: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            expires: Utc.timestamp_opt(1_700_000_000 + 518_400, 0).unwrap(),
        }
    }

    #[test]
    fn encoded_exchange_starts_with_magic_and_embeds_fallback_url() {
        let chain = test_chain();
        let headers = vec![("content-type".to_string(), "text/html".to_string())];
        let payload = b"payload bytes";
        let p = params(&headers, payload, &chain);
        let encoder = Cbor1SxgEncoder::new(chain.clone());
        let bytes = encoder.encode(&p).unwrap();

        assert!(bytes.starts_with(MAGIC));
        let fallback_len = u16::from_be_bytes([bytes[8], bytes[9]]) as usize;
        let fallback = &bytes[10..10 + fallback_len];
        assert_eq!(fallback, p.request_uri.as_bytes());
        assert!(bytes.ends_with(payload));
    }

    #[test]
    fn encoding_is_deterministic_for_fixed_inputs() {
        // The signature itself is randomized (ECDSA nonce), so compare
        // everything except the trailing signature/header/payload region
        // that depends on it — specifically the fixed-size prefix.
        let chain = test_chain();
        let headers = vec![("content-type".to_string(), "text/html".to_string())];
        let payload = b"payload bytes";
        let p = params(&headers, payload, &chain);
        let encoder = Cbor1SxgEncoder::new(chain.clone());
        let a = encoder.encode(&p).unwrap();
        let b = encoder.encode(&p).unwrap();
        assert_eq!(&a[..10 + p.request_uri.len()], &b[..10 + p.request_uri.len()]);
    }
}
