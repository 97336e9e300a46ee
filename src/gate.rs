//! Packaging gate (`spec.md` §4.4): decides, from the upstream response and
//! the inbound request's negotiation headers, whether to proxy verbatim or
//! to proceed to transform + sign. Conditions 1-6 are evaluated here, in
//! order, with the first true condition winning; condition 7 (transformer
//! failure) is evaluated by the caller after it has invoked the
//! transformer, since that step needs the HTML body in hand.

use crate::headers::is_stateful_header;
use crate::model::{ProxyReason, UpstreamResponse};
use crate::transform::detect_amp_format;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    ProxyVerbatim(ProxyReason),
}

/// The request-side signal the gate needs: did the client send both
/// `AMP-Cache-Transform: google` and `Accept: application/signed-exchange;v=b2`?
pub fn client_requested_sxg(amp_cache_transform: Option<&str>, accept: Option<&str>) -> bool {
    let requested_transform = amp_cache_transform
        .map(|v| v.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case("google"))
        .unwrap_or(false);
    let accepts_sxg = accept
        .map(|v| v.split(',').any(|part| {
            let media = part.split(';').next().unwrap_or("").trim();
            media.eq_ignore_ascii_case("application/signed-exchange")
        }))
        .unwrap_or(false);
    requested_transform && accepts_sxg
}

/// Does the `Cache-Control` header value contain a directive forbidding
/// shared caching?
fn forbids_shared_caching(cache_control: &str) -> bool {
    cache_control.split(',').any(|directive| {
        let d = directive.trim().to_ascii_lowercase();
        d == "no-store" || d == "private" || d.starts_with("private=")
    })
}

/// Is the `Content-Type` header value an HTML media type? Parameters
/// (`;charset=...`) are ignored for this check.
fn is_html_content_type(content_type: &str) -> bool {
    let media = content_type.split(';').next().unwrap_or("").trim();
    media.eq_ignore_ascii_case("text/html")
}

/// Conditions 1-6 of `spec.md` §4.4, checked in order. Condition 7
/// (transformer failure) is not evaluated here.
pub fn evaluate(
    requested_sxg: bool,
    packaging_enabled: bool,
    upstream: &UpstreamResponse,
    html: Option<&str>,
) -> GateDecision {
    use GateDecision::*;
    use ProxyReason::*;

    if !requested_sxg {
        return ProxyVerbatim(NotRequestingSxg);
    }
    if !packaging_enabled {
        return ProxyVerbatim(PackagingDisabled);
    }
    if upstream.status != 200 {
        return ProxyVerbatim(UpstreamNotOk);
    }
    if let Some(cc) = upstream.header("cache-control") {
        if forbids_shared_caching(cc) {
            return ProxyVerbatim(CacheControlForbidsSharedCaching);
        }
    }
    let Some(content_type) = upstream.header("content-type") else {
        return ProxyVerbatim(NotHtml);
    };
    if !is_html_content_type(content_type) {
        return ProxyVerbatim(NotHtml);
    }
    if upstream.headers.iter().any(|(name, _)| is_stateful_header(name)) {
        return ProxyVerbatim(StatefulHeaderPresent);
    }
    match html {
        Some(html) if detect_amp_format(html) => Proceed,
        _ => ProxyVerbatim(NotAmpDocument),
    }
}
