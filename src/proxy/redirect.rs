//! Redirect-location blocklist.

use axum::http::{header, HeaderMap, StatusCode};

/// Ordered list of forbidden redirect-target prefixes.
///
/// Matching is a case-sensitive byte prefix test against the whole `Location`
/// value; the first matching prefix wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForbiddenPrefixSet {
    prefixes: Vec<String>,
}

impl ForbiddenPrefixSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a prefix; it is checked after every prefix already present.
    pub fn push(&mut self, prefix: impl Into<String>) {
        self.prefixes.push(prefix.into());
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    /// First prefix that `location` starts with.
    pub fn first_match(&self, location: &[u8]) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|prefix| location.starts_with(prefix.as_bytes()))
            .map(String::as_str)
    }

    /// The blocked `Location` value when `status` is a filtered redirect pointing at a
    /// forbidden prefix.
    ///
    /// Only the first `Location` value is considered.
    pub fn blocked_redirect(&self, status: StatusCode, headers: &HeaderMap) -> Option<String> {
        if !is_filtered_redirect(status) {
            return None;
        }
        let location = headers.get(header::LOCATION)?;
        self.first_match(location.as_bytes())?;
        Some(String::from_utf8_lossy(location.as_bytes()).into_owned())
    }
}

impl<S: Into<String>> FromIterator<S> for ForbiddenPrefixSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            prefixes: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// 301, 302 and 307 are inspected; 303 and 308 pass through untouched.
pub fn is_filtered_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::TEMPORARY_REDIRECT
    )
}
