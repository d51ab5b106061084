//! Header manipulation.
//!
//! # Responsibilities
//! - Add X-Forwarded-For
//! - Strip hop-by-hop headers in both directions
//!
//! # Design Decisions
//! - X-Forwarded-For is overwritten, never appended to: client-supplied values are not trusted
//! - Headers named in a `Connection` value are hop-by-hop too (RFC 7230 §6.1)

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// `X-Forwarded-For`
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

static KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
static PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");

/// Headers that only describe the current connection and must not be forwarded.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == KEEP_ALIVE
        || name == PROXY_CONNECTION
        || name == header::PROXY_AUTHENTICATE
        || name == header::PROXY_AUTHORIZATION
        || name == header::TE
        || name == header::TRAILER
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }

    let hop: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();

    for name in hop {
        headers.remove(name);
    }
}

/// Append every end-to-end header of `src` onto `dst`, keeping all values of repeated headers.
pub fn copy_end_to_end(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        if !is_hop_by_hop(name) {
            dst.append(name.clone(), value.clone());
        }
    }
}

/// Record the caller's address, replacing whatever the client sent.
///
/// Hosts that are not valid header values are skipped.
pub fn set_forwarded_for(headers: &mut HeaderMap, client_host: &str) {
    match HeaderValue::from_str(client_host) {
        Ok(value) => {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
        Err(_) => {
            headers.remove(&X_FORWARDED_FOR);
        }
    }
}
