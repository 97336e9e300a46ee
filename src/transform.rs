//! Transformer adapter (`spec.md` §4.6): hands HTML to the document
//! transformer and recovers on failure by letting the gate fall back to a
//! verbatim proxy. The transformer itself is a collaborator per `spec.md`
//! §1 ("Non-goals: ... the document transformation engine itself"); the
//! concrete [`AmpPreloadTransformer`] fulfills the documented interface
//! with a bounded, content-preserving preload scan rather than claiming to
//! be a full AMP optimizing engine.

use crate::model::{Preload, TransformedDocument};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformError {
    #[error("transformer failed: {0}")]
    Failed(String),
}

/// `Transform(html, docURL, cfg) -> (html', preloads[], err)` from
/// `spec.md` §6. `document_url` is always the sign URL (`spec.md` §4.6).
pub trait DocumentTransformer: Send + Sync {
    fn transform(
        &self,
        html: &str,
        document_url: &str,
    ) -> Result<TransformedDocument, TransformError>;
}

/// Content-preserving pass: returns the original HTML unchanged and
/// extracts preload candidates from `<script async src="...">` (AMP
/// runtime/extension scripts) and `<link rel="preload" href="...">`
/// elements found in `<head>`.
pub struct AmpPreloadTransformer;

impl DocumentTransformer for AmpPreloadTransformer {
    fn transform(
        &self,
        html: &str,
        _document_url: &str,
    ) -> Result<TransformedDocument, TransformError> {
        let preloads = extract_preloads(html);
        Ok(TransformedDocument {
            html: html.to_string(),
            preloads,
        })
    }
}

fn script_src_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<script\b[^>]*\bsrc\s*=\s*"([^"]+)"[^>]*>"#).unwrap()
    })
}

fn link_preload_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<link\b[^>]*\brel\s*=\s*"preload"[^>]*\bhref\s*=\s*"([^"]+)"[^>]*\bas\s*=\s*"([^"]+)"[^>]*>"#)
            .unwrap()
    })
}

fn extract_preloads(html: &str) -> Vec<Preload> {
    let head_end = html.find("</head>").unwrap_or(html.len());
    let head = &html[..head_end];

    let mut preloads = Vec::new();
    for cap in script_src_re().captures_iter(head) {
        preloads.push(Preload {
            url: cap[1].to_string(),
            as_: "script".to_string(),
        });
    }
    for cap in link_preload_re().captures_iter(head) {
        preloads.push(Preload {
            url: cap[1].to_string(),
            as_: cap[2].to_string(),
        });
    }
    preloads
}

/// The root-element AMP-format predicate from `spec.md` §4.4 condition 6:
/// the root element must carry the bare `amp` (or `⚡`) attribute;
/// `amp4email`, `amp4ads`, or no marker at all disqualify.
pub fn detect_amp_format(html: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"(?is)<html\b([^>]*)>"#).unwrap()
    });

    let Some(cap) = re.captures(html) else {
        return false;
    };
    let attrs = &cap[1];

    // Reject amp4email / amp4ads variants before accepting the bare marker.
    if has_bare_attr(attrs, "amp4email") || has_bare_attr(attrs, "amp4ads") {
        return false;
    }
    has_bare_attr(attrs, "amp") || attrs.contains('\u{26A1}')
}

/// Whether `attrs` (the raw attribute string of a tag) contains a bare
/// boolean attribute named `name`, i.e. `name`, `name=""`, or `name="name"`
/// — but not as a substring of a longer attribute name.
fn has_bare_attr(attrs: &str, name: &str) -> bool {
    let re = Regex::new(&format!(r#"(?i)(^|\s){}(\s|=|$)"#, regex::escape(name))).unwrap();
    re.is_match(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_bare_amp_attribute() {
        assert!(detect_amp_format("<html amp><body>hi</body></html>"));
    }

    #[test]
    fn detects_lightning_bolt_marker() {
        assert!(detect_amp_format("<html \u{26A1}><body>hi</body></html>"));
    }

    #[test]
    fn rejects_amp4email() {
        assert!(!detect_amp_format("<html amp4email><body>hi</body></html>"));
    }

    #[test]
    fn rejects_amp4ads() {
        assert!(!detect_amp_format("<html amp4ads><body>hi</body></html>"));
    }

    #[test]
    fn rejects_no_marker() {
        assert!(!detect_amp_format("<html><body>hi</body></html>"));
    }

    #[test]
    fn extracts_script_and_link_preloads() {
        let html = r#"<html amp><head>
            <script async src="https://cdn.ampproject.org/v0.js"></script>
            <link rel="preload" href="https://foo.com/a.css" as="style">
        </head><body></body></html>"#;
        let doc = AmpPreloadTransformer.transform(html, "https://example.com/x.html").unwrap();
        assert_eq!(doc.html, html);
        assert_eq!(doc.preloads.len(), 2);
        assert_eq!(doc.preloads[0].as_, "script");
        assert_eq!(doc.preloads[1].as_, "style");
    }

    #[test]
    fn ignores_scripts_outside_head() {
        let html = r#"<html amp><head></head><body><script src="https://x.com/a.js"></script></body></html>"#;
        let doc = AmpPreloadTransformer.transform(html, "https://example.com/x.html").unwrap();
        assert!(doc.preloads.is_empty());
    }
}
