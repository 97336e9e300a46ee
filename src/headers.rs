//! Header rewriter (`spec.md` §4.5) and the stateful/hop-by-hop header sets
//! the packaging gate and the rewriter both consult.

use crate::model::{Preload, UpstreamResponse};
use chrono::Utc;

/// Response headers whose presence implies per-user state and therefore
/// disqualify a response from signing (`spec.md` §4.4, glossary).
pub const STATEFUL_HEADERS: &[&str] = &[
    "set-cookie",
    "set-cookie2",
    "clear-site-data",
    "public-key-pins",
    "www-authenticate",
    "authentication-info",
    "sec-websocket-accept",
    "setprofile",
    "strict-transport-security",
];

/// Hop-by-hop headers stripped before the signed response is assembled
/// (`spec.md` §4.5 step 2). `connection` itself is in this list; its named
/// field(s) are stripped separately by [`connection_named_fields`].
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers recomputed by the payload encoder / `Link` builder and therefore
/// dropped from the upstream copy regardless of what upstream sent
/// (`spec.md` §4.5 step 3).
const RECOMPUTED_HEADERS: &[&str] = &["content-length", "content-encoding", "digest", "link"];

pub fn is_stateful_header(name: &str) -> bool {
    STATEFUL_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
        || name.to_ascii_lowercase().starts_with("proxy-")
}

fn is_recomputed(name: &str) -> bool {
    RECOMPUTED_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Field names listed inside a `Connection:` header value — these are
/// themselves hop-by-hop and must also be stripped.
fn connection_named_fields(upstream: &UpstreamResponse) -> Vec<String> {
    upstream
        .headers_named("connection")
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// The default Content-Security-Policy injected for AMP documents. AMP
/// documents are allowed to load the AMP runtime and extension scripts
/// from the AMP CDN and to execute inline styles, which this policy
/// reflects.
pub const DEFAULT_AMP_CSP: &str = "script-src https://cdn.ampproject.org/rtv/ https://cdn.ampproject.org/v0.js https://cdn.ampproject.org/v0/ https://cdn.ampproject.org/viewer/; object-src 'none'; base-uri 'self'; style-src 'unsafe-inline' https://cdn.ampproject.org/rtv/; report-uri https://csp-collector.example.com/r";

/// Build the signed-response header set from the upstream snapshot, per
/// `spec.md` §4.5 steps 1-5. Step 6 (`Link`) and the MICE-derived
/// `content-encoding`/`content-length`/`digest` are appended by the caller
/// once the payload has been encoded (`spec.md` §4.7).
pub fn rewrite_headers(upstream: &UpstreamResponse) -> Vec<(String, String)> {
    let named_fields = connection_named_fields(upstream);
    let mut out = Vec::with_capacity(upstream.headers.len() + 3);

    for (name, value) in &upstream.headers {
        if is_stateful_header(name) {
            continue;
        }
        if is_hop_by_hop(name) {
            continue;
        }
        if is_recomputed(name) {
            continue;
        }
        if named_fields.iter().any(|f| f.eq_ignore_ascii_case(name)) {
            continue;
        }
        out.push((name.clone(), value.clone()));
    }

    out.push(("x-content-type-options".to_string(), "nosniff".to_string()));
    out.push(("content-security-policy".to_string(), DEFAULT_AMP_CSP.to_string()));
    out.push(("date".to_string(), Utc::now().to_rfc3339()));

    out
}

/// Percent-escape a preload URL so that `<` and `>` cannot appear literally
/// inside the angle-bracketed form of a `Link` entry — a literal comma
/// inside the brackets is unambiguous (the bracket, not the comma, delimits
/// one entry from the next) and is left as-is, matching the worked example
/// in `spec.md` §4.5 step 6 (`a,b>c` becomes `a,b%3Ec`).
fn escape_link_url(url: &str) -> String {
    use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
    const LINK_UNSAFE: &AsciiSet = &CONTROLS.add(b'<').add(b'>');
    utf8_percent_encode(url, LINK_UNSAFE).to_string()
}

/// Build the `Link: rel=preload` header value from the transformer's
/// extracted preloads (`spec.md` §4.5 step 6, §4.6). Returns `None` if
/// there are no preloads, since an empty `Link` header is not meaningful.
pub fn build_link_header(preloads: &[Preload]) -> Option<String> {
    if preloads.is_empty() {
        return None;
    }
    let entries: Vec<String> = preloads
        .iter()
        .map(|p| format!("<{}>;rel=preload;as={}", escape_link_url(&p.url), p.as_))
        .collect();
    Some(entries.join(","))
}
