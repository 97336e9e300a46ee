//! Handler entrypoint (`spec.md` §2, §4): composes the matcher, fetcher,
//! gate, transformer, header rewriter, MICE encoder, and exchange signer
//! into the single linear pipeline described by the handler state machine
//! in `spec.md` §4.8.

use crate::config::AppConfig;
use crate::crypto::CertificateChain;
use crate::fetcher::{FetchError, UpstreamFetcher};
use crate::gate::{self, GateDecision};
use crate::headers::{build_link_header, rewrite_headers};
use crate::mice::{self, DEFAULT_RECORD_SIZE};
use crate::model::{EncodeParams, PackagingOutcome, ProxyReason, RequestEnvelope};
use crate::metrics::Metrics;
use crate::sxg::ExchangeEncoder;
use crate::transform::DocumentTransformer;
use crate::url_match::{match_url, same_path_satisfied};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub struct Handler {
    pub config: Arc<AppConfig>,
    pub cert_chain: Arc<CertificateChain>,
    pub fetcher: Arc<dyn UpstreamFetcher>,
    pub transformer: Arc<dyn DocumentTransformer>,
    pub encoder: Arc<dyn ExchangeEncoder>,
    pub metrics: Arc<Metrics>,
}

impl Handler {
    /// Find the first configured `URLSet` whose `sign` pattern matches
    /// `request.sign_url`, whose fetch pattern (explicit or sign-defaulted)
    /// matches `request.fetch_url`, and whose `samePath` constraint (if set
    /// on either pattern) is satisfied by the pair.
    fn matching_url_set(&self, request: &RequestEnvelope) -> bool {
        self.config.url_sets.iter().any(|(_, set)| {
            let fetch_pattern = set.fetch_pattern();
            match_url(&set.sign, &request.sign_url).is_ok()
                && match_url(fetch_pattern, &request.fetch_url).is_ok()
                && same_path_satisfied(&set.sign, &request.sign_url, &request.fetch_url)
                && same_path_satisfied(fetch_pattern, &request.sign_url, &request.fetch_url)
        })
    }

    pub async fn handle(
        &self,
        request: RequestEnvelope,
        requested_sxg: bool,
    ) -> PackagingOutcome {
        if !self.matching_url_set(&request) {
            info!(outcome = "bad_request", reason = "no_matching_url_set");
            return PackagingOutcome::BadRequest("URL does not match any configured URLSet".to_string());
        }

        let fetch_started = Instant::now();
        let fetch_result = self.fetcher.fetch(&request.fetch_url).await;
        self.metrics
            .fetch_duration_seconds
            .observe(fetch_started.elapsed().as_secs_f64());
        let upstream = match fetch_result {
            Ok(resp) => resp,
            Err(err) => {
                info!(outcome = "fetch_error", error = %err);
                return PackagingOutcome::FetchError(fetch_error_message(&err));
            }
        };

        let html = std::str::from_utf8(&upstream.body).ok();
        let decision = gate::evaluate(requested_sxg, self.config.packaging_enabled(), &upstream, html);

        if let GateDecision::ProxyVerbatim(reason) = decision {
            info!(outcome = "proxy_verbatim", reason = reason.as_str());
            return PackagingOutcome::ProxiedVerbatim { reason, upstream };
        }

        // Condition 7: the transformer can still fail after every other
        // gate condition has passed, and that failure is a fallback to
        // verbatim proxying, not an error (`spec.md` §4.4 condition 7, §9).
        let html = html.expect("gate only proceeds when html decoded successfully");
        let transformed = match self.transformer.transform(html, request.sign_url.as_str()) {
            Ok(doc) => doc,
            Err(err) => {
                info!(outcome = "proxy_verbatim", reason = "transform_failed", error = %err);
                return PackagingOutcome::ProxiedVerbatim {
                    reason: ProxyReason::TransformFailed,
                    upstream,
                };
            }
        };

        let mut response_headers = rewrite_headers(&upstream);
        if let Some(link) = build_link_header(&transformed.preloads) {
            response_headers.push(("link".to_string(), link));
        }

        let encoded = mice::encode(transformed.html.as_bytes(), DEFAULT_RECORD_SIZE);
        self.metrics
            .mice_payload_bytes
            .observe(encoded.encoded_body.len() as f64);
        response_headers.push(("content-encoding".to_string(), "mi-sha256-03".to_string()));
        response_headers.push(("digest".to_string(), mice::digest_header_value(&encoded)));
        response_headers.push((
            "content-length".to_string(),
            encoded.encoded_body.len().to_string(),
        ));

        let now = Utc::now();
        let params = EncodeParams {
            request_uri: request.sign_url.as_str(),
            status: 200,
            response_headers: &response_headers,
            payload: &encoded.encoded_body,
            cert_url: self.cert_chain.cert_url(&self.config.forward_proxy_host),
            cert_sha256: self.cert_chain.cert_sha256(),
            validity_url: self.cert_chain.validity_url(&self.config.forward_proxy_host),
            date: now - ChronoDuration::hours(24),
            expires: now + ChronoDuration::days(6),
        };

        match self.encoder.encode(&params) {
            Ok(bytes) => {
                info!(outcome = "signed", bytes = bytes.len());
                PackagingOutcome::Signed(bytes)
            }
            Err(err) => {
                info!(outcome = "signer_error", error = %err);
                PackagingOutcome::SignerError(err.to_string())
            }
        }
    }
}

fn fetch_error_message(err: &FetchError) -> String {
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;
    use crate::model::UpstreamResponse;
    use crate::sxg::Cbor1SxgEncoder;
    use crate::transform::AmpPreloadTransformer;
    use async_trait::async_trait;
    use bytes::Bytes;
    use ring::rand::SystemRandom;
    use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};

    struct CannedFetcher(UpstreamResponse);

    #[async_trait]
    impl UpstreamFetcher for CannedFetcher {
        async fn fetch(&self, _url: &url::Url) -> Result<UpstreamResponse, FetchError> {
            Ok(self.0.clone())
        }
    }

    fn test_handler(upstream: UpstreamResponse) -> Handler {
        let rng = SystemRandom::new();
        let key = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        let cert_chain =
            Arc::new(CertificateChain::from_der(vec![b"fixture".to_vec()], key.as_ref()).unwrap());
        let toml = r#"
            [[url_sets]]
            label = "amp"

            [url_sets.sign]
            schemes = ["https"]
            path_regex = "^/amp/.*$"

            [url_sets.fetch]
            schemes = ["http", "https"]
            path_regex = "^/amp/.*$"
        "#;
        let file: FileConfig = toml::from_str(toml).unwrap();
        let config = AppConfig::compile(file).unwrap();

        Handler {
            config,
            cert_chain: cert_chain.clone(),
            fetcher: Arc::new(CannedFetcher(upstream)),
            transformer: Arc::new(AmpPreloadTransformer),
            encoder: Arc::new(Cbor1SxgEncoder::new(cert_chain)),
            metrics: Arc::new(Metrics::new()),
        }
    }

    fn sign_request() -> RequestEnvelope {
        RequestEnvelope {
            fetch_url: url::Url::parse("https://example.com/amp/x.html").unwrap(),
            sign_url: url::Url::parse("https://example.com/amp/x.html").unwrap(),
        }
    }

    #[tokio::test]
    async fn signs_eligible_amp_document() {
        let upstream = UpstreamResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "text/html".to_string())],
            body: Bytes::from_static(b"<html amp><body>hi</body></html>"),
        };
        let handler = test_handler(upstream);
        let outcome = handler.handle(sign_request(), true).await;
        assert!(matches!(outcome, PackagingOutcome::Signed(_)));
    }

    #[tokio::test]
    async fn proxies_non_amp_document_verbatim() {
        let upstream = UpstreamResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "text/html".to_string())],
            body: Bytes::from_static(b"<html><body>no amp marker</body></html>"),
        };
        let handler = test_handler(upstream);
        let outcome = handler.handle(sign_request(), true).await;
        assert!(matches!(
            outcome,
            PackagingOutcome::ProxiedVerbatim { reason: ProxyReason::NotAmpDocument, .. }
        ));
    }

    #[tokio::test]
    async fn proxies_redirect_verbatim() {
        let upstream = UpstreamResponse {
            status: 301,
            headers: vec![
                ("location".to_string(), "/login".to_string()),
                ("set-cookie".to_string(), "a=b".to_string()),
            ],
            body: Bytes::new(),
        };
        let handler = test_handler(upstream);
        let outcome = handler.handle(sign_request(), true).await;
        assert!(matches!(
            outcome,
            PackagingOutcome::ProxiedVerbatim { reason: ProxyReason::UpstreamNotOk, .. }
        ));
    }

    #[tokio::test]
    async fn not_requesting_sxg_proxies_verbatim_without_touching_gate_conditions() {
        let upstream = UpstreamResponse {
            status: 500,
            headers: vec![],
            body: Bytes::new(),
        };
        let handler = test_handler(upstream);
        let outcome = handler.handle(sign_request(), false).await;
        assert!(matches!(
            outcome,
            PackagingOutcome::ProxiedVerbatim { reason: ProxyReason::NotRequestingSxg, .. }
        ));
    }

    #[tokio::test]
    async fn url_not_matching_any_url_set_is_bad_request() {
        let upstream = UpstreamResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "text/html".to_string())],
            body: Bytes::from_static(b"<html amp></html>"),
        };
        let handler = test_handler(upstream);
        let request = RequestEnvelope {
            fetch_url: url::Url::parse("https://example.com/not-amp/x.html").unwrap(),
            sign_url: url::Url::parse("https://example.com/not-amp/x.html").unwrap(),
        };
        let outcome = handler.handle(request, true).await;
        assert!(matches!(outcome, PackagingOutcome::BadRequest(_)));
    }
}
