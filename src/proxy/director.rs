//! Inbound → outbound request rewriting.
//!
//! # Responsibilities
//! - Deep-copy the inbound request head into an [`OutboundRequest`]
//! - Point it at the backend (scheme, authority, joined path, query)
//! - Normalize protocol and connection headers, record the caller's IP
//!
//! # Design Decisions
//! - Pure: no I/O, no logging, the inbound request is only borrowed
//! - The configurable part is a [`Director`] closure; the policy around it
//!   (version, hop-by-hop, X-Forwarded-For, forced authority) always applies

use std::sync::Arc;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Uri, Version};
use url::Url;

use crate::security::headers;

/// Rewrites an outbound request in place before it is sent.
pub type Director = Arc<dyn Fn(&mut OutboundRequest) + Send + Sync>;

/// Head of the request sent to the backend.
///
/// The body is attached separately with [`OutboundRequest::into_request`] since it
/// is moved, not copied, from the inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl OutboundRequest {
    /// Copy the inbound head. The header map is always cloned, never shared.
    pub fn from_inbound(inbound: &Parts) -> Self {
        Self {
            method: inbound.method.clone(),
            uri: inbound.uri.clone(),
            version: inbound.version,
            headers: inbound.headers.clone(),
        }
    }

    /// Attach the body and produce the request handed to the transport.
    pub fn into_request(self, body: Body) -> Request<Body> {
        let mut request = Request::new(body);
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers;
        request
    }

    /// Point the URI and `Host` header at `authority`, keeping path and query.
    pub fn force_authority(&mut self, authority: &Authority) {
        let mut parts = self.uri.clone().into_parts();
        parts.authority = Some(authority.clone());
        if parts.scheme.is_none() {
            parts.scheme = Some(Scheme::HTTP);
        }
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        if let Ok(uri) = Uri::from_parts(parts) {
            self.uri = uri;
        }

        if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
            self.headers.insert(header::HOST, host);
        }
    }
}

/// Join two path segments so exactly one `/` separates them.
pub fn join_paths(base: &str, path: &str) -> String {
    let base_slash = base.ends_with('/');
    let path_slash = path.starts_with('/');
    match (base_slash, path_slash) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Director sending every request to `target`, with its path used as a base.
///
/// A target of `http://backend:9000/base` turns `/dir?q=1` into
/// `http://backend:9000/base/dir?q=1`. The target's query is used only when the
/// inbound request has none.
pub fn single_host(target: &Url) -> Director {
    let scheme = target.scheme().to_string();
    let authority = match (target.host_str(), target.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };
    let base_path = target.path().to_string();
    let base_query = target.query().map(str::to_string);

    Arc::new(move |req: &mut OutboundRequest| {
        let path = join_paths(&base_path, req.uri.path());
        let path_and_query = match req.uri.query().or(base_query.as_deref()) {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        };

        // An unbuildable URI leaves the request untouched; the forced authority still applies.
        if let Ok(uri) = Uri::builder()
            .scheme(scheme.as_str())
            .authority(authority.as_str())
            .path_and_query(path_and_query)
            .build()
        {
            req.uri = uri;
        }
    })
}

/// Host part of a raw `host:port` remote address, `[v6]:port` included.
///
/// Returns `None` when there is no port separator or brackets are unbalanced.
pub fn split_host_port(remote_addr: &str) -> Option<&str> {
    if let Some(rest) = remote_addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return tail.strip_prefix(':').map(|_| host);
    }

    let (host, _port) = remote_addr.rsplit_once(':')?;
    if host.contains(':') || host.contains('[') || host.contains(']') {
        return None;
    }
    Some(host)
}

/// Build the request for the backend from an inbound head.
///
/// Runs `director`, then applies the relay's fixed policy: HTTP/1.1, no
/// hop-by-hop headers, `X-Forwarded-For` from `remote_addr` when it parses,
/// and `backend` as the authority.
pub fn prepare_outbound(
    inbound: &Parts,
    remote_addr: &str,
    director: &Director,
    backend: &Authority,
) -> OutboundRequest {
    let mut outbound = OutboundRequest::from_inbound(inbound);

    director(&mut outbound);

    outbound.version = Version::HTTP_11;
    headers::strip_hop_by_hop(&mut outbound.headers);

    if let Some(client_host) = split_host_port(remote_addr) {
        headers::set_forwarded_for(&mut outbound.headers, client_host);
    }

    outbound.force_authority(backend);
    outbound
}
