//! Error types for the X-Road gateway.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gateway errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Unknown service: {group}/{service}")]
    ServiceNotFound { group: String, service: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Upstream timed out: {0}")]
    Timeout(String),

    #[error("Upstream returned HTTP {status}")]
    Upstream { status: u16, body: String },

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("Upstream SOAP fault: {0}")]
    Fault(String),

    #[error("Remote template sources are disabled: {0}")]
    RemoteSourceDisabled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes surfaced in the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// TLS handshake or trust failure
    SslError,
    /// Upstream unreachable
    ConnectionError,
    /// Upstream returned an error or unusable response
    XroadError,
    /// Bad caller input or unknown service
    InvalidRequest,
    /// Anything else
    InternalError,
}

impl ErrorCode {
    /// Get the string code for this error.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SslError => "SSL_ERROR",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::XroadError => "XROAD_ERROR",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Caller-facing message. Never carries internal detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::SslError => "Secure connection to X-Road Security Server failed",
            Self::ConnectionError => "Could not connect to X-Road Security Server",
            Self::XroadError => "X-Road Security Server returned an error",
            Self::InvalidRequest => "Invalid request",
            Self::InternalError => "An unexpected error occurred",
        }
    }
}

impl GatewayError {
    /// Map to the wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Tls(_) => ErrorCode::SslError,
            Self::Connection(_) | Self::Timeout(_) => ErrorCode::ConnectionError,
            Self::Upstream { .. } | Self::MalformedResponse(_) | Self::Fault(_) => {
                ErrorCode::XroadError
            }
            Self::InvalidRequest(_) | Self::Render(_) | Self::ServiceNotFound { .. } => {
                ErrorCode::InvalidRequest
            }
            Self::Config(_)
            | Self::Template(_)
            | Self::RemoteSourceDisabled(_)
            | Self::Io(_)
            | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// HTTP status returned to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Tls(_) | Self::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Self::MalformedResponse(_) | Self::Fault(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest(_) | Self::Render(_) => StatusCode::BAD_REQUEST,
            Self::ServiceNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller-safe detail. Only input problems and upstream status text are exposed.
    pub fn public_details(&self) -> Option<String> {
        match self {
            Self::InvalidRequest(msg) | Self::Render(msg) | Self::Fault(msg) => Some(msg.clone()),
            Self::ServiceNotFound { group, service } => {
                Some(format!("No service registered at /{}/{}", group, service))
            }
            Self::Upstream { status, .. } => Some(
                StatusCode::from_u16(*status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::SslError.as_str(), "SSL_ERROR");
        assert_eq!(ErrorCode::ConnectionError.as_str(), "CONNECTION_ERROR");
        assert_eq!(ErrorCode::XroadError.as_str(), "XROAD_ERROR");
    }

    #[test]
    fn test_transport_errors_map_to_distinct_codes() {
        assert_eq!(GatewayError::Tls("bad cert".into()).code(), ErrorCode::SslError);
        assert_eq!(
            GatewayError::Connection("refused".into()).code(),
            ErrorCode::ConnectionError
        );
        assert_eq!(
            GatewayError::Upstream { status: 500, body: String::new() }.code(),
            ErrorCode::XroadError
        );
        assert_eq!(
            GatewayError::Connection("refused".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_upstream_status_passthrough() {
        let err = GatewayError::Upstream { status: 404, body: String::new() };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.public_details().as_deref(), Some("Not Found"));

        // A non-error upstream status is still a gateway failure.
        let err = GatewayError::Upstream { status: 302, body: String::new() };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = GatewayError::Config("/secret/path/keystore.p12 missing".into());
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert!(err.public_details().is_none());
    }
}
