//! Certificate loader (`SPEC_FULL.md` §2): reads a PEM certificate chain and
//! a PEM private key from disk, fingerprints the chain, and exposes signing
//! over the "message to sign" the exchange encoder builds. Chain
//! *validation* (expiry, trust path) stays a collaborator concern per
//! `spec.md` §1 — this module loads and fingerprints the chain but does not
//! implement a trust store.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use sha2::{Digest, Sha256};
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CertLoadError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0}")]
    EmptyChain(String),
    #[error("no private key found in {0}")]
    MissingKey(String),
    #[error("private key is not a valid ECDSA P-256 PKCS#8 key: {0}")]
    InvalidKey(String),
}

/// An ordered DER certificate chain plus the parsed ECDSA P-256 private
/// key, loaded once at startup and held behind an `Arc`.
pub struct CertificateChain {
    der_chain: Vec<Vec<u8>>,
    sha256: [u8; 32],
    key_pair: EcdsaKeyPair,
    rng: SystemRandom,
}

impl CertificateChain {
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CertLoadError> {
        let der_chain = read_pem_certs(cert_path)?;
        let leaf = der_chain
            .first()
            .ok_or_else(|| CertLoadError::EmptyChain(cert_path.display().to_string()))?;
        let sha256: [u8; 32] = Sha256::digest(leaf).into();

        let key_der = read_pem_private_key(key_path)?;
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(
            &ECDSA_P256_SHA256_ASN1_SIGNING,
            key_der.as_ref(),
            &rng,
        )
        .map_err(|e| CertLoadError::InvalidKey(e.to_string()))?;

        Ok(Self {
            der_chain,
            sha256,
            key_pair,
            rng,
        })
    }

    /// Construct a chain directly from already-loaded DER bytes, for tests
    /// and for any caller that already has PEM parsed.
    pub fn from_der(der_chain: Vec<Vec<u8>>, key_der: &[u8]) -> Result<Self, CertLoadError> {
        let leaf = der_chain
            .first()
            .ok_or_else(|| CertLoadError::EmptyChain("<in-memory>".to_string()))?;
        let sha256: [u8; 32] = Sha256::digest(leaf).into();
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, key_der, &rng)
            .map_err(|e| CertLoadError::InvalidKey(e.to_string()))?;
        Ok(Self {
            der_chain,
            sha256,
            key_pair,
            rng,
        })
    }

    pub fn cert_sha256(&self) -> [u8; 32] {
        self.sha256
    }

    /// Conventional (non-URL-safe) base64 of the leaf certificate's
    /// SHA-256, as used in `cert-sha256=*<base64>*` (`spec.md` §4.8).
    pub fn cert_sha256_base64(&self) -> String {
        STANDARD.encode(self.sha256)
    }

    /// Base64url (no padding) of the leaf certificate's SHA-256, as used in
    /// the `/amppkg/cert/<fingerprint>` path (`spec.md` §4.8, §6).
    pub fn cert_sha256_base64url(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.sha256)
    }

    pub fn cert_url(&self, forward_proxy_host: &str) -> String {
        format!(
            "{}/amppkg/cert/{}",
            forward_proxy_host.trim_end_matches('/'),
            self.cert_sha256_base64url()
        )
    }

    pub fn validity_url(&self, forward_proxy_host: &str) -> String {
        format!("{}/amppkg/validity", forward_proxy_host.trim_end_matches('/'))
    }

    /// DER-encoded certificate chain, leaf first, as served by the
    /// cert-serving endpoint (`SPEC_FULL.md` §6).
    pub fn der_chain(&self) -> &[Vec<u8>] {
        &self.der_chain
    }

    /// ECDSA P-256 / SHA-256 signature over `message`, per the webpackage
    /// draft's "message to sign" construction (`SPEC_FULL.md` §4.8).
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ring::error::Unspecified> {
        self.key_pair
            .sign(&self.rng, message)
            .map(|sig| sig.as_ref().to_vec())
    }

    pub fn public_key_bytes(&self) -> &[u8] {
        self.key_pair.public_key().as_ref()
    }
}

fn read_pem_certs(path: &Path) -> Result<Vec<Vec<u8>>, CertLoadError> {
    let file = std::fs::File::open(path).map_err(|e| CertLoadError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);
    let certs: Vec<Vec<u8>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|r| r.ok())
        .map(|c| c.as_ref().to_vec())
        .collect();
    if certs.is_empty() {
        return Err(CertLoadError::EmptyChain(path.display().to_string()));
    }
    Ok(certs)
}

fn read_pem_private_key(path: &Path) -> Result<Vec<u8>, CertLoadError> {
    let file = std::fs::File::open(path).map_err(|e| CertLoadError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);
    for item in std::iter::from_fn(|| rustls_pemfile::read_one(&mut reader).transpose()) {
        match item {
            Ok(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(key.secret_pkcs8_der().to_vec()),
            Ok(rustls_pemfile::Item::Sec1Key(_)) => {
                return Err(CertLoadError::InvalidKey(
                    "SEC1 (EC PRIVATE KEY) format is not supported, convert to PKCS#8".to_string(),
                ))
            }
            Ok(_) => continue,
            Err(e) => {
                return Err(CertLoadError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        }
    }
    Err(CertLoadError::MissingKey(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test certs don't need to be parseable X.509 — `CertificateChain`
    // never parses the cert bytes, only hashes them. The key, however, does
    // need to be a real PKCS#8 ECDSA P-256 key, so it's generated fresh per
    // test with `ring`'s own key-generation API rather than checked in as a
    // fixture.
    fn test_key_pkcs8() -> ring::pkcs8::Document {
        let rng = SystemRandom::new();
        EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap()
    }

    #[test]
    fn fingerprint_matches_sha256_of_leaf_der() {
        let key = test_key_pkcs8();
        let cert_der = b"not a real certificate, just bytes to hash".to_vec();
        let chain = CertificateChain::from_der(vec![cert_der.clone()], key.as_ref()).unwrap();
        let expected: [u8; 32] = Sha256::digest(&cert_der).into();
        assert_eq!(chain.cert_sha256(), expected);
    }

    #[test]
    fn cert_url_embeds_base64url_fingerprint() {
        let key = test_key_pkcs8();
        let cert_der = b"another fixture cert".to_vec();
        let chain = CertificateChain::from_der(vec![cert_der], key.as_ref()).unwrap();
        let url = chain.cert_url("https://pkg.example.com");
        assert!(url.starts_with("https://pkg.example.com/amppkg/cert/"));
        assert!(!url.contains('+') && !url.contains('/'));
    }

    #[test]
    fn sign_produces_verifiable_signature() {
        let key = test_key_pkcs8();
        let cert_der = b"yet another fixture cert".to_vec();
        let chain = CertificateChain::from_der(vec![cert_der], key.as_ref()).unwrap();
        let sig = chain.sign(b"message to sign").unwrap();
        let public_key = ring::signature::UnparsedPublicKey::new(
            &ring::signature::ECDSA_P256_SHA256_ASN1,
            chain.public_key_bytes(),
        );
        assert!(public_key.verify(b"message to sign", &sig).is_ok());
    }
}
