//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the backend authority is a usable `host[:port]`
//! - Validate addresses and policy values
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::str::FromStr;

use axum::http::uri::Authority;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a socket address")]
    BindAddress(String),

    #[error("upstream.backend_authority must not be empty")]
    EmptyBackendAuthority,

    #[error("upstream.backend_authority '{0}' is not a valid host[:port]")]
    BackendAuthority(String),

    #[error("upstream.forbidden_prefixes[{0}] is empty and would block every redirect")]
    EmptyForbiddenPrefix(usize),

    #[error("upstream.max_rewrite_bytes must be greater than zero")]
    ZeroRewriteLimit,

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),
}

/// Check a parsed configuration, collecting every error found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let authority = config.upstream.backend_authority.as_str();
    if authority.is_empty() {
        errors.push(ValidationError::EmptyBackendAuthority);
    } else if !is_plain_authority(authority) {
        errors.push(ValidationError::BackendAuthority(authority.to_string()));
    }

    for (index, prefix) in config.upstream.forbidden_prefixes.iter().enumerate() {
        if prefix.is_empty() {
            errors.push(ValidationError::EmptyForbiddenPrefix(index));
        }
    }

    if config.upstream.max_rewrite_bytes == 0 {
        errors.push(ValidationError::ZeroRewriteLimit);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `host[:port]` with no userinfo; the same form the relay forces onto outbound requests.
fn is_plain_authority(value: &str) -> bool {
    match Authority::from_str(value) {
        Ok(authority) => !authority.as_str().contains('@') && !authority.host().is_empty(),
        Err(_) => false,
    }
}
