//! Upstream fetcher (`spec.md` §4.3): a single non-redirect-following GET
//! against the resolved fetch URL.

use crate::config::FetchTimeouts;
use crate::model::UpstreamResponse;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::BufReader;
use std::path::Path;

const USER_AGENT: &str = concat!("sxg-signer/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("connect error: {0}")]
    Connect(String),
    #[error("timed out")]
    Timeout,
    #[error("response body exceeds the configured size cap ({0} bytes)")]
    TooLarge(usize),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid TLS trust anchor at {path}: {message}")]
    InvalidTrustAnchor { path: String, message: String },
}

/// Behind a trait so tests can substitute a canned responder instead of a
/// real network call (`SPEC_FULL.md` §4.3).
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    async fn fetch(&self, url: &url::Url) -> Result<UpstreamResponse, FetchError>;
}

/// `reqwest`-backed fetcher: no redirect following, no cookie jar, a fixed
/// `User-Agent`, and a body size cap enforced both from `Content-Length`
/// and while streaming.
pub struct ReqwestFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ReqwestFetcher {
    /// `trust_anchor_path`, when set, names a PEM file of extra root
    /// certificates trusted for the upstream fetch in addition to the
    /// platform roots `rustls-tls` bundles — an operator-provided private CA,
    /// or a test's self-signed server certificate (`spec.md` §4.3).
    pub fn new(
        timeouts: FetchTimeouts,
        max_body_bytes: usize,
        trust_anchor_path: Option<&Path>,
    ) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .cookie_store(false)
            .user_agent(USER_AGENT)
            .connect_timeout(timeouts.connect())
            .timeout(timeouts.total());

        if let Some(path) = trust_anchor_path {
            for der in read_pem_roots(path)? {
                let cert = reqwest::Certificate::from_der(&der).map_err(|e| {
                    FetchError::InvalidTrustAnchor {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    }
                })?;
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            max_body_bytes,
        })
    }
}

/// Parse a PEM bundle into DER-encoded certificates, the same way
/// `crypto::read_pem_certs` parses the signing certificate chain.
fn read_pem_roots(path: &Path) -> Result<Vec<Vec<u8>>, FetchError> {
    let file = std::fs::File::open(path).map_err(|e| FetchError::InvalidTrustAnchor {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let mut reader = BufReader::new(file);
    let certs: Vec<Vec<u8>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|r| r.ok())
        .map(|c| c.as_ref().to_vec())
        .collect();
    if certs.is_empty() {
        return Err(FetchError::InvalidTrustAnchor {
            path: path.display().to_string(),
            message: "no certificates found".to_string(),
        });
    }
    Ok(certs)
}

#[async_trait]
impl UpstreamFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &url::Url) -> Result<UpstreamResponse, FetchError> {
        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else if e.is_connect() {
                FetchError::Connect(e.to_string())
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        if let Some(len) = response.content_length() {
            if len as usize > self.max_body_bytes {
                return Err(FetchError::TooLarge(self.max_body_bytes));
            }
        }

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or("").to_string(),
                )
            })
            .collect();

        let body = read_bounded_body(response, self.max_body_bytes).await?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

async fn read_bounded_body(
    response: reqwest::Response,
    max_body_bytes: usize,
) -> Result<Bytes, FetchError> {
    use futures::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;
        buf.extend_from_slice(&chunk);
        if buf.len() > max_body_bytes {
            return Err(FetchError::TooLarge(max_body_bytes));
        }
    }
    Ok(Bytes::from(buf))
}
