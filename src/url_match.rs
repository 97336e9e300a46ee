//! URL matcher (`spec.md` §4.1): decide whether a candidate `fetch`/`sign`
//! URL is admitted by an operator-configured [`URLPattern`].

use crate::model::URLPattern;
use url::Url;

/// Why a URL was rejected by a pattern. Returned instead of a bare `bool` so
/// callers (and their logs) can tell the seven distinct reasons apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFailure {
    SchemeNotAllowed,
    HostMismatch,
    DomainMismatch,
    PathMismatch,
    DisallowedQueryParam,
    QueryMismatch,
}

impl MatchFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemeNotAllowed => "scheme_not_allowed",
            Self::HostMismatch => "host_mismatch",
            Self::DomainMismatch => "domain_mismatch",
            Self::PathMismatch => "path_mismatch",
            Self::DisallowedQueryParam => "disallowed_query_param",
            Self::QueryMismatch => "query_mismatch",
        }
    }
}

/// `match(urlPattern, url) -> ok | reason` from `spec.md` §4.1.
///
/// Path and query comparisons are case-sensitive; host comparison is
/// case-insensitive (URLs are already lower-cased by `url::Url` for the
/// host component, but we normalize the pattern side too so config authors
/// don't have to think about it).
pub fn match_url(pattern: &URLPattern, url: &Url) -> Result<(), MatchFailure> {
    if !pattern.allowed_schemes.contains(url.scheme()) {
        return Err(MatchFailure::SchemeNotAllowed);
    }

    if let Some(ref host) = pattern.host {
        let actual = url.host_str().unwrap_or("");
        if !actual.eq_ignore_ascii_case(host) {
            return Err(MatchFailure::HostMismatch);
        }
    }

    if let Some(ref domain) = pattern.domain {
        let actual = url.host_str().unwrap_or("");
        let suffix_ok = actual.eq_ignore_ascii_case(domain)
            || actual
                .to_ascii_lowercase()
                .ends_with(&format!(".{}", domain.to_ascii_lowercase()));
        if !suffix_ok {
            return Err(MatchFailure::DomainMismatch);
        }
    }

    if !pattern.path_re.is_match(url.path()) {
        return Err(MatchFailure::PathMismatch);
    }

    let query = url.query().unwrap_or("");
    for (name, _) in url::form_urlencoded::parse(query.as_bytes()) {
        if pattern
            .disallowed_query_params
            .iter()
            .any(|p| p == name.as_ref())
        {
            return Err(MatchFailure::DisallowedQueryParam);
        }
    }

    if let Some(ref qre) = pattern.query_re {
        if !qre.is_match(query) {
            return Err(MatchFailure::QueryMismatch);
        }
    }

    Ok(())
}

/// `samePath` constraint (`spec.md` §3): when a pattern sets it, the fetch
/// URL's path must be byte-identical to the sign URL's path. Checked
/// separately from [`match_url`] since it compares two URLs, not one.
pub fn same_path_satisfied(pattern: &URLPattern, sign_url: &Url, fetch_url: &Url) -> bool {
    match pattern.same_path {
        Some(true) => sign_url.path() == fetch_url.path(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::URLPattern;

    fn pattern() -> URLPattern {
        URLPattern::new(&["https"], Some("example.com"), r"^/amp/.*$").unwrap()
    }

    #[test]
    fn accepts_matching_url() {
        let url = Url::parse("https://example.com/amp/x.html").unwrap();
        assert!(match_url(&pattern(), &url).is_ok());
    }

    #[test]
    fn rejects_wrong_scheme() {
        let url = Url::parse("http://example.com/amp/x.html").unwrap();
        assert_eq!(
            match_url(&pattern(), &url),
            Err(MatchFailure::SchemeNotAllowed)
        );
    }

    #[test]
    fn host_match_is_case_insensitive() {
        let url = Url::parse("https://EXAMPLE.com/amp/x.html").unwrap();
        assert!(match_url(&pattern(), &url).is_ok());
    }

    #[test]
    fn rejects_wrong_path() {
        let url = Url::parse("https://example.com/other/x.html").unwrap();
        assert_eq!(
            match_url(&pattern(), &url),
            Err(MatchFailure::PathMismatch)
        );
    }

    #[test]
    fn rejects_disallowed_query_param() {
        let p = pattern().with_disallowed_query_params(&["stateful"]);
        let url = Url::parse("https://example.com/amp/x.html?stateful=1").unwrap();
        assert_eq!(match_url(&p, &url), Err(MatchFailure::DisallowedQueryParam));
    }

    #[test]
    fn query_regex_must_match_whole_query() {
        let p = pattern().with_query_regex(r"^v=\d+$").unwrap();
        assert!(match_url(
            &p,
            &Url::parse("https://example.com/amp/x.html?v=5").unwrap()
        )
        .is_ok());
        assert_eq!(
            match_url(
                &p,
                &Url::parse("https://example.com/amp/x.html?v=abc").unwrap()
            ),
            Err(MatchFailure::QueryMismatch)
        );
    }

    #[test]
    fn domain_matches_subdomains() {
        let mut p = pattern();
        p.domain = Some("example.com".to_string());
        p.host = None;
        let url = Url::parse("https://cdn.example.com/amp/x.html").unwrap();
        assert!(match_url(&p, &url).is_ok());
    }

    #[test]
    fn same_path_unset_is_always_satisfied() {
        let p = pattern();
        let sign = Url::parse("https://example.com/amp/a.html").unwrap();
        let fetch = Url::parse("https://example.com/amp/b.html").unwrap();
        assert!(same_path_satisfied(&p, &sign, &fetch));
    }

    #[test]
    fn same_path_true_requires_identical_paths() {
        let mut p = pattern();
        p.same_path = Some(true);
        let sign = Url::parse("https://example.com/amp/a.html").unwrap();
        let matching_fetch = Url::parse("https://origin.example.com/amp/a.html").unwrap();
        let mismatched_fetch = Url::parse("https://origin.example.com/amp/b.html").unwrap();
        assert!(same_path_satisfied(&p, &sign, &matching_fetch));
        assert!(!same_path_satisfied(&p, &sign, &mismatched_fetch));
    }
}
