//! Literal text substitution for plain-text responses.

use axum::http::{header, HeaderMap, StatusCode};

/// The only content type whose bodies are rewritten. Compared byte for byte.
pub const PLAIN_TEXT_UTF8: &str = "text/plain; charset=utf-8";

/// Result of a substitution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub body: Vec<u8>,
    pub replacements: usize,
}

/// Whether a response qualifies for substitution: exactly 200 with exactly
/// [`PLAIN_TEXT_UTF8`] as its first `Content-Type`.
pub fn applies(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::OK
        && headers
            .get(header::CONTENT_TYPE)
            .is_some_and(|ct| ct.as_bytes() == PLAIN_TEXT_UTF8.as_bytes())
}

/// Replace every non-overlapping occurrence of `from` with `to`, scanning left to right.
///
/// An empty `from` leaves the body unchanged.
pub fn replace_literal(body: &[u8], from: &[u8], to: &[u8]) -> Rewritten {
    if from.is_empty() {
        return Rewritten {
            body: body.to_vec(),
            replacements: 0,
        };
    }

    let mut out = Vec::with_capacity(body.len());
    let mut replacements = 0;
    let mut rest = body;

    while let Some(pos) = rest.windows(from.len()).position(|window| window == from) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(to);
        rest = &rest[pos + from.len()..];
        replacements += 1;
    }
    out.extend_from_slice(rest);

    Rewritten {
        body: out,
        replacements,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn content_type(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn replaces_every_occurrence() {
        let body = b"backend:9000 and backend:9000/path, again backend:9000";
        let out = replace_literal(body, b"backend:9000", b"example.com");

        assert_eq!(out.replacements, 3);
        assert_eq!(
            out.body,
            b"example.com and example.com/path, again example.com".to_vec()
        );
    }

    #[test]
    fn replacement_does_not_overlap() {
        let out = replace_literal(b"aaaa", b"aa", b"b");
        assert_eq!(out.body, b"bb".to_vec());
        assert_eq!(out.replacements, 2);

        let out = replace_literal(b"aaa", b"aa", b"b");
        assert_eq!(out.body, b"ba".to_vec());
    }

    #[test]
    fn replacement_is_not_rescanned() {
        let out = replace_literal(b"ab", b"a", b"aa");
        assert_eq!(out.body, b"aab".to_vec());
        assert_eq!(out.replacements, 1);
    }

    #[test]
    fn empty_needle_is_a_no_op() {
        let out = replace_literal(b"unchanged", b"", b"x");
        assert_eq!(out.body, b"unchanged".to_vec());
        assert_eq!(out.replacements, 0);
    }

    #[test]
    fn matching_is_case_sensitive() {
        let out = replace_literal(b"BACKEND:9000", b"backend:9000", b"example.com");
        assert_eq!(out.body, b"BACKEND:9000".to_vec());
        assert_eq!(out.replacements, 0);
    }

    #[test]
    fn applies_only_to_exact_plain_text_ok() {
        assert!(applies(StatusCode::OK, &content_type("text/plain; charset=utf-8")));
        assert!(!applies(StatusCode::OK, &content_type("text/plain")));
        assert!(!applies(StatusCode::OK, &content_type("text/plain; charset=UTF-8")));
        assert!(!applies(StatusCode::OK, &content_type("text/html; charset=utf-8")));
        assert!(!applies(StatusCode::CREATED, &content_type("text/plain; charset=utf-8")));
        assert!(!applies(StatusCode::OK, &HeaderMap::new()));
    }
}
