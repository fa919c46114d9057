use std::fmt;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// Errors returned by the gateway itself (as opposed to upstream
/// responses, which are relayed as-is).
///
/// Each variant maps to a specific HTTP status code at the outermost
/// handler, with a JSON body of shape `{error, message?, code?}`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GatewayError {
    /// No enabled route matched the request. Maps to 404.
    RouteNotFound,
    /// A token was required and absent. Maps to 401.
    AuthMissing,
    /// The token failed verification. Maps to 401 with the reason.
    AuthInvalid { reason: String },
    /// Authenticated but lacking a required role or scope. Maps to 403.
    Forbidden { message: String },
    /// The rate limit window is exhausted. Maps to 429 with `Retry-After`.
    RateLimited { retry_after: u64 },
    /// The upstream did not answer within the route timeout. Maps to 504.
    UpstreamTimeout { backend: String },
    /// The upstream could not be reached. Maps to 502.
    UpstreamUnavailable { backend: String, message: String },
    /// Anything else. Maps to 500.
    Internal { message: String },
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RouteNotFound => write!(f, "no route matched the request"),
            Self::AuthMissing => write!(f, "Authentication required"),
            Self::AuthInvalid { reason } => write!(f, "invalid token: {reason}"),
            Self::Forbidden { message } => write!(f, "{message}"),
            Self::RateLimited { retry_after } => {
                write!(f, "rate limit exceeded, retry after {retry_after}s")
            }
            Self::UpstreamTimeout { backend } => {
                write!(f, "upstream '{backend}' timed out")
            }
            Self::UpstreamUnavailable { backend, message } => {
                write!(f, "upstream '{backend}' unavailable: {message}")
            }
            Self::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// Returns the HTTP status code for this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::AuthMissing | Self::AuthInvalid { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error class used by the metrics counters.
    pub fn class(&self) -> &'static str {
        match self {
            Self::RouteNotFound => "route_not_found",
            Self::AuthMissing | Self::AuthInvalid { .. } => "auth",
            Self::Forbidden { .. } => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::RouteNotFound => "Not found",
            Self::AuthMissing => "Authentication required",
            Self::AuthInvalid { .. } => "Authentication failed",
            Self::Forbidden { .. } => "Forbidden",
            Self::RateLimited { .. } => "Rate limit exceeded",
            Self::UpstreamTimeout { .. } => "Gateway timeout",
            Self::UpstreamUnavailable { .. } => "Bad gateway",
            Self::Internal { .. } => "Internal server error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::AuthMissing => serde_json::json!({ "error": "Authentication required" }),
            Self::RateLimited { retry_after } => serde_json::json!({
                "error": self.label(),
                "retry_after": retry_after,
            }),
            other => serde_json::json!({
                "error": other.label(),
                "message": other.to_string(),
                "code": other.class(),
            }),
        };
        let mut response = (status, axum::Json(body)).into_response();
        if let Self::RateLimited { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}
