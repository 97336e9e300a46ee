//! HTTP handlers: the signing endpoint (`spec.md` §6) plus the
//! certificate-serving, validity-serving, and health-check collaborator
//! endpoints added in `SPEC_FULL.md` §2.

use crate::api::errors::ApiError;
use crate::config::AppConfig;
use crate::crypto::CertificateChain;
use crate::gate::client_requested_sxg;
use crate::handler::Handler;
use crate::metrics::Metrics;
use crate::model::{ProxyReason, RequestEnvelope};
use crate::parser::{self, ParseError};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// Shared, read-only-after-startup state handed to every handler.
pub struct AppState {
    pub handler: Arc<Handler>,
    pub config: Arc<AppConfig>,
    pub cert_chain: Arc<CertificateChain>,
    pub metrics: Arc<Metrics>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `GET|POST /priv/doc` — query-string and POST-form request shapes
/// (`spec.md` §4.2, recognised shapes 2 and 3).
pub async fn doc_query_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let is_form_post = method == Method::POST
        && header_str(&headers, "content-type")
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);

    let parsed = if is_form_post {
        parser::parse_form_body(&body)
    } else {
        parser::parse_query(uri.query().unwrap_or(""))
    };

    respond(&state, &headers, parsed).await
}

/// `GET /priv/doc/*sign_url` — path-parameter request shape
/// (`spec.md` §4.2, recognised shape 1).
pub async fn doc_path_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(sign_url): Path<String>,
) -> Response {
    let parsed = parser::parse_path_param(&sign_url);
    respond(&state, &headers, parsed).await
}

async fn respond(
    state: &AppState,
    headers: &HeaderMap,
    parsed: Result<RequestEnvelope, ParseError>,
) -> Response {
    let envelope = match parsed {
        Ok(envelope) => envelope,
        Err(err) => return ApiError::BadRequest(err.to_string()).into_response(),
    };

    let requested_sxg = client_requested_sxg(
        header_str(headers, "amp-cache-transform"),
        header_str(headers, "accept"),
    );

    let outcome = state.handler.handle(envelope, requested_sxg).await;
    state
        .metrics
        .packaging_outcomes_total
        .with_label_values(&[outcome_label(&outcome)])
        .inc();
    outcome_to_response(outcome)
}

fn outcome_label(outcome: &crate::model::PackagingOutcome) -> &'static str {
    use crate::model::PackagingOutcome::*;
    match outcome {
        Signed(_) => "signed",
        ProxiedVerbatim { reason, .. } => reason.as_str(),
        BadRequest(_) => "bad_request",
        FetchError(_) => "fetch_error",
        SignerError(_) => "signer_error",
    }
}

fn outcome_to_response(outcome: crate::model::PackagingOutcome) -> Response {
    use crate::model::PackagingOutcome::*;
    match outcome {
        Signed(bytes) => (
            StatusCode::OK,
            [
                ("content-type", "application/signed-exchange;v=b2"),
                ("amp-cache-transform", "google"),
                ("x-content-type-options", "nosniff"),
                ("cache-control", "no-transform, private, max-age=600"),
            ],
            bytes,
        )
            .into_response(),
        ProxiedVerbatim { upstream, reason: _ } => {
            let status =
                StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut response = (status, upstream.body.to_vec()).into_response();
            let resp_headers = response.headers_mut();
            for (name, value) in &upstream.headers {
                if let (Ok(name), Ok(value)) = (
                    axum::http::HeaderName::try_from(name.as_str()),
                    axum::http::HeaderValue::try_from(value.as_str()),
                ) {
                    resp_headers.append(name, value);
                }
            }
            response
        }
        BadRequest(msg) => ApiError::BadRequest(msg).into_response(),
        FetchError(msg) => ApiError::FetchFailed(msg).into_response(),
        SignerError(msg) => ApiError::SignerFailed(msg).into_response(),
    }
}

/// `GET /amppkg/cert/:cert_sha256` — serves the loaded certificate chain as
/// `application/cert-chain+cbor` (`SPEC_FULL.md` §6). 404 if the requested
/// fingerprint does not match the loaded chain.
pub async fn cert_handler(
    State(state): State<Arc<AppState>>,
    Path(cert_sha256): Path<String>,
) -> Response {
    if cert_sha256 != state.cert_chain.cert_sha256_base64url() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let body = encode_cert_chain_cbor(state.cert_chain.der_chain());
    (
        StatusCode::OK,
        [("content-type", "application/cert-chain+cbor")],
        body,
    )
        .into_response()
}

/// Canonical CBOR array of `{cert: bytes}` maps, one per chain entry, per
/// the webpackage draft's `application/cert-chain+cbor` format.
fn encode_cert_chain_cbor(der_chain: &[Vec<u8>]) -> Vec<u8> {
    use crate::cbor::DataItem;
    let magic = DataItem::bytes(b"\xF0\x9F\x93\x9C\x00".to_vec());
    let mut items = vec![magic];
    for der in der_chain {
        items.push(DataItem::Map(vec![(
            DataItem::bytes(b"cert".to_vec()),
            DataItem::bytes(der.clone()),
        )]));
    }
    DataItem::Array(items).encode()
}

/// `GET /amppkg/validity` — serves an empty CBOR validity map
/// (`SPEC_FULL.md` §6).
pub async fn validity_handler() -> Response {
    use crate::cbor::DataItem;
    let body = DataItem::Map(vec![]).encode();
    (StatusCode::OK, [("content-type", "application/cbor")], body).into_response()
}

/// `GET /healthz` — liveness probe, no auth, not logged at info level.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
