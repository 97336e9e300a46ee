//! Core data types for the signing pipeline: URL policy, the parsed request
//! envelope, the upstream response snapshot, and the signing parameters
//! handed to the exchange encoder.

use regex::Regex;
use std::collections::HashSet;

/// A single operator-configured URL policy entry.
///
/// `scheme` must be non-empty for every pattern an operator wires up — this
/// is enforced in [`URLSet::new`], not here, so tests can still construct
/// partially-invalid patterns to exercise the matcher's rejection paths.
#[derive(Debug, Clone)]
pub struct URLPattern {
    pub allowed_schemes: HashSet<String>,
    pub domain: Option<String>,
    pub host: Option<String>,
    pub path_re: Regex,
    pub disallowed_query_params: Vec<String>,
    pub query_re: Option<Regex>,
    pub error_on_stateful_headers: bool,
    pub same_path: Option<bool>,
}

impl URLPattern {
    /// Convenience constructor for the common case: scheme + host + path.
    pub fn new(schemes: &[&str], host: Option<&str>, path_re: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            allowed_schemes: schemes.iter().map(|s| s.to_string()).collect(),
            domain: None,
            host: host.map(|h| h.to_string()),
            path_re: Regex::new(path_re)?,
            disallowed_query_params: Vec::new(),
            query_re: None,
            error_on_stateful_headers: false,
            same_path: None,
        })
    }

    pub fn with_disallowed_query_params(mut self, params: &[&str]) -> Self {
        self.disallowed_query_params = params.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_query_regex(mut self, re: &str) -> Result<Self, regex::Error> {
        self.query_re = Some(Regex::new(re)?);
        Ok(self)
    }

    pub fn error_on_stateful_headers(mut self, flag: bool) -> Self {
        self.error_on_stateful_headers = flag;
        self
    }
}

/// Operator policy tuple naming the URL shapes allowed for signing and for
/// upstream fetching. `fetch` is optional: when absent, the sign pattern
/// also names the fetch target (the upstream origin IS the signed origin).
#[derive(Debug, Clone)]
pub struct URLSet {
    pub sign: URLPattern,
    pub fetch: Option<URLPattern>,
}

impl URLSet {
    pub fn new(sign: URLPattern, fetch: Option<URLPattern>) -> Result<Self, InvalidURLSet> {
        if sign.allowed_schemes.is_empty() {
            return Err(InvalidURLSet::EmptySchemeSet("sign"));
        }
        if let Some(ref fetch) = fetch {
            if fetch.allowed_schemes.is_empty() {
                return Err(InvalidURLSet::EmptySchemeSet("fetch"));
            }
        }
        Ok(Self { sign, fetch })
    }

    /// The pattern to use when validating the fetch URL: the explicit
    /// `fetch` pattern if present, otherwise `sign` itself.
    pub fn fetch_pattern(&self) -> &URLPattern {
        self.fetch.as_ref().unwrap_or(&self.sign)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidURLSet {
    #[error("URLPattern for {0} has an empty scheme set")]
    EmptySchemeSet(&'static str),
}

/// Parsed `{fetchURL, signURL}` request envelope, after defaulting and
/// before policy matching.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub fetch_url: url::Url,
    pub sign_url: url::Url,
}

/// Snapshot of the upstream response the fetcher returns to the gate.
/// Body is bounded by `AppConfig::max_body_bytes`.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: bytes::Bytes,
}

impl UpstreamResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers_named(&self, name: &str) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Why the handler fell through to a verbatim proxy. Never changes the wire
/// response — purely for logs and metrics cardinality (`spec.md` §4.4, §9
/// open question on `errorOnStatefulHeaders`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyReason {
    NotRequestingSxg,
    PackagingDisabled,
    UpstreamNotOk,
    CacheControlForbidsSharedCaching,
    NotHtml,
    NotAmpDocument,
    StatefulHeaderPresent,
    TransformFailed,
}

impl ProxyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequestingSxg => "not_requesting_sxg",
            Self::PackagingDisabled => "packaging_disabled",
            Self::UpstreamNotOk => "upstream_not_ok",
            Self::CacheControlForbidsSharedCaching => "cache_control_forbids_shared_caching",
            Self::NotHtml => "not_html",
            Self::NotAmpDocument => "not_amp_document",
            Self::StatefulHeaderPresent => "stateful_header_present",
            Self::TransformFailed => "transform_failed",
        }
    }
}

/// Internal result of running the full pipeline, before it is turned into
/// an HTTP response (`SPEC_FULL.md` §3). `ProxiedVerbatim` carries the
/// upstream snapshot to echo; `Signed` carries the encoded exchange bytes.
pub enum PackagingOutcome {
    Signed(Vec<u8>),
    ProxiedVerbatim {
        reason: ProxyReason,
        upstream: UpstreamResponse,
    },
    BadRequest(String),
    FetchError(String),
    SignerError(String),
}

/// Resource the document's renderer should fetch early, surfaced as a
/// `Link: rel=preload` response header entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preload {
    pub url: String,
    pub as_: String,
}

/// Output of the transformer adapter (`spec.md` §4.6).
#[derive(Debug, Clone)]
pub struct TransformedDocument {
    pub html: String,
    pub preloads: Vec<Preload>,
}

/// Parameters the handler hands to the exchange encoder (`spec.md` §4.8).
pub struct EncodeParams<'a> {
    pub request_uri: &'a str,
    pub status: u16,
    pub response_headers: &'a [(String, String)],
    pub payload: &'a [u8],
    pub cert_url: String,
    pub cert_sha256: [u8; 32],
    pub validity_url: String,
    pub date: chrono::DateTime<chrono::Utc>,
    pub expires: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlset_requires_nonempty_sign_schemes() {
        let sign = URLPattern {
            allowed_schemes: HashSet::new(),
            domain: None,
            host: None,
            path_re: Regex::new(".*").unwrap(),
            disallowed_query_params: vec![],
            query_re: None,
            error_on_stateful_headers: false,
            same_path: None,
        };
        assert!(matches!(
            URLSet::new(sign, None),
            Err(InvalidURLSet::EmptySchemeSet("sign"))
        ));
    }

    #[test]
    fn urlset_fetch_pattern_defaults_to_sign() {
        let sign = URLPattern::new(&["https"], Some("example.com"), "^/amp/.*$").unwrap();
        let set = URLSet::new(sign, None).unwrap();
        assert_eq!(set.fetch_pattern().allowed_schemes.len(), 1);
    }

    #[test]
    fn upstream_response_header_lookup_is_case_insensitive() {
        let resp = UpstreamResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/html".to_string())],
            body: bytes::Bytes::new(),
        };
        assert_eq!(resp.header("content-type"), Some("text/html"));
    }
}
