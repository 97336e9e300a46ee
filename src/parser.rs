//! Request parser (`spec.md` §4.2): extract `fetch`/`sign` URLs from the
//! query string, a URL-encoded POST body, or a path parameter, in that
//! priority order, and apply the `fetch` defaults-to-`sign` rule.

use crate::model::RequestEnvelope;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("missing required `sign` parameter")]
    MissingSign,
    #[error("`sign` is not a valid URL")]
    InvalidSignUrl,
    #[error("`fetch` is not a valid URL")]
    InvalidFetchUrl,
    #[error("sign URL must use the https scheme")]
    SignNotHttps,
    #[error("fetch URL must use http or https")]
    FetchBadScheme,
}

/// Raw, unvalidated strings pulled from one of the three request shapes.
struct RawParams {
    sign: Option<String>,
    fetch: Option<String>,
}

/// Path-parameter form: `GET /priv/doc/*sign_url`. The leading slash that
/// axum's wildcard capture leaves in place is stripped before the value is
/// treated as `sign` (and therefore also `fetch`, since no second
/// parameter is available in this shape).
pub fn parse_path_param(sign_url_suffix: &str) -> Result<RequestEnvelope, ParseError> {
    let stripped = sign_url_suffix.strip_prefix('/').unwrap_or(sign_url_suffix);
    if stripped.is_empty() {
        return Err(ParseError::MissingSign);
    }
    build_envelope(RawParams {
        sign: Some(stripped.to_string()),
        fetch: None,
    })
}

/// Query-string form: `GET /priv/doc?sign=...&fetch=...`.
pub fn parse_query(query: &str) -> Result<RequestEnvelope, ParseError> {
    build_envelope(extract_form_params(query))
}

/// POST body form: `application/x-www-form-urlencoded` body with the same
/// two field names as the query form.
pub fn parse_form_body(body: &[u8]) -> Result<RequestEnvelope, ParseError> {
    let body_str = String::from_utf8_lossy(body);
    build_envelope(extract_form_params(&body_str))
}

fn extract_form_params(encoded: &str) -> RawParams {
    let mut sign = None;
    let mut fetch = None;
    for (key, value) in url::form_urlencoded::parse(encoded.as_bytes()) {
        match key.as_ref() {
            "sign" => sign = Some(value.into_owned()),
            "fetch" => fetch = Some(value.into_owned()),
            _ => {}
        }
    }
    RawParams { sign, fetch }
}

fn build_envelope(raw: RawParams) -> Result<RequestEnvelope, ParseError> {
    let sign_str = raw.sign.filter(|s| !s.is_empty()).ok_or(ParseError::MissingSign)?;
    let sign_url = Url::parse(&sign_str).map_err(|_| ParseError::InvalidSignUrl)?;
    if sign_url.scheme() != "https" {
        return Err(ParseError::SignNotHttps);
    }

    let fetch_str = raw.fetch.filter(|s| !s.is_empty()).unwrap_or(sign_str);
    let fetch_url = Url::parse(&fetch_str).map_err(|_| ParseError::InvalidFetchUrl)?;
    if fetch_url.scheme() != "http" && fetch_url.scheme() != "https" {
        return Err(ParseError::FetchBadScheme);
    }

    Ok(RequestEnvelope {
        fetch_url,
        sign_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_form_defaults_fetch_to_sign() {
        let env = parse_query("sign=https%3A%2F%2Fexample.com%2Famp%2Fx.html").unwrap();
        assert_eq!(env.sign_url.as_str(), env.fetch_url.as_str());
    }

    #[test]
    fn query_form_honors_explicit_fetch() {
        let env = parse_query(
            "sign=https%3A%2F%2Fexample.com%2Famp%2Fx.html&fetch=http%3A%2F%2Forigin.internal%2Famp%2Fx.html",
        )
        .unwrap();
        assert_eq!(env.sign_url.as_str(), "https://example.com/amp/x.html");
        assert_eq!(env.fetch_url.as_str(), "http://origin.internal/amp/x.html");
    }

    #[test]
    fn missing_sign_is_an_error() {
        assert_eq!(parse_query("fetch=https://example.com/"), Err(ParseError::MissingSign));
    }

    #[test]
    fn sign_must_be_https() {
        let err = parse_query("sign=http%3A%2F%2Fexample.com%2Fx.html").unwrap_err();
        assert_eq!(err, ParseError::SignNotHttps);
    }

    #[test]
    fn post_body_parses_like_query() {
        let env = parse_form_body(b"sign=https%3A%2F%2Fexample.com%2Famp%2Fx.html").unwrap();
        assert_eq!(env.sign_url.as_str(), "https://example.com/amp/x.html");
    }

    #[test]
    fn path_param_strips_leading_slash_and_defaults_fetch() {
        let env = parse_path_param("/https://example.com/amp/x.html").unwrap();
        assert_eq!(env.sign_url.as_str(), "https://example.com/amp/x.html");
        assert_eq!(env.fetch_url.as_str(), "https://example.com/amp/x.html");
    }

    #[test]
    fn empty_path_param_is_missing_sign() {
        assert_eq!(parse_path_param("/"), Err(ParseError::MissingSign));
    }
}
