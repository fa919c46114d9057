//! Upstream forwarding: header and path transforms, bounded retries, and
//! upstream error translation.
//!
//! Transform and header logic is pure and tested directly; only
//! [`ProxyClient::forward`] performs I/O.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode};
use std::time::Duration;

use crate::auth::AuthContext;
use crate::config::TransformConfig;
use crate::error::GatewayError;
use crate::router::GatewayRoute;

/// Hop-by-hop headers, stripped in both directions.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Response headers the gateway never relays from upstreams.
const SCRUBBED_RESPONSE: &[&str] = &["server", "x-powered-by"];

/// Idle-pool sizing for the upstream connection pool.
const POOL_MAX_IDLE_PER_HOST: usize = 10;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Everything the proxy needs to know about the inbound request.
pub struct ProxyRequest<'a> {
    pub method: Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub body: axum::body::Bytes,
    pub client_ip: &'a str,
    pub scheme: &'a str,
    pub host: Option<&'a str>,
    pub request_id: &'a str,
    pub auth: Option<&'a AuthContext>,
    pub tenant: Option<&'a str>,
    /// The request-path bytes consumed by the route's prefix match.
    pub matched_prefix: &'a str,
}

// ---------------------------------------------------------------------------
// Pure transform helpers
// ---------------------------------------------------------------------------

/// Applies the route's path transform. `rewrite_path` replaces the path
/// wholesale; `strip_prefix` removes the matched prefix, leaving `/` when
/// nothing remains.
pub fn transform_path(
    transform: Option<&TransformConfig>,
    path: &str,
    matched_prefix: &str,
) -> String {
    if let Some(t) = transform {
        if let Some(rewrite) = t.rewrite_path.as_deref() {
            return rewrite.to_string();
        }
        if t.strip_prefix && !matched_prefix.is_empty() {
            if let Some(rest) = path.strip_prefix(matched_prefix) {
                if rest.is_empty() {
                    return "/".to_string();
                }
                if !rest.starts_with('/') {
                    return format!("/{rest}");
                }
                return rest.to_string();
            }
        }
    }
    path.to_string()
}

/// Builds the outgoing header map: inbound headers minus hop-by-hop and
/// removed names, plus forwarding metadata, identity headers from the
/// auth context, the request id, and the route's additions.
pub fn build_upstream_headers(
    transform: Option<&TransformConfig>,
    request: &ProxyRequest<'_>,
) -> HeaderMap {
    let removed: Vec<String> = transform
        .map(|t| t.remove_headers.iter().map(|h| h.to_lowercase()).collect())
        .unwrap_or_default();

    let mut out = HeaderMap::new();
    for (name, value) in request.headers {
        let lower = name.as_str().to_lowercase();
        if lower == "host" || HOP_BY_HOP.contains(&lower.as_str()) || removed.contains(&lower) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    insert_str(&mut out, "x-forwarded-for", request.client_ip);
    insert_str(&mut out, "x-forwarded-proto", request.scheme);
    if let Some(host) = request.host {
        insert_str(&mut out, "x-forwarded-host", host);
    }
    insert_str(&mut out, "x-request-id", request.request_id);

    if let Some(auth) = request.auth {
        if let Some(user_id) = auth.user_id.as_deref() {
            insert_str(&mut out, "x-user-id", user_id);
        }
        if !auth.roles.is_empty() {
            insert_str(&mut out, "x-user-roles", &auth.roles.join(","));
        }
    }
    if let Some(tenant) = request.tenant {
        insert_str(&mut out, "x-tenant-id", tenant);
    }

    if let Some(t) = transform {
        for (name, value) in &t.add_headers {
            insert_str(&mut out, name, value);
        }
    }
    out
}

/// Filters an upstream response's headers: hop-by-hop and identification
/// headers go, the route's response edits apply.
pub fn filter_response_headers(
    transform: Option<&TransformConfig>,
    upstream: &HeaderMap,
) -> HeaderMap {
    let removed: Vec<String> = transform
        .map(|t| {
            t.remove_response_headers
                .iter()
                .map(|h| h.to_lowercase())
                .collect()
        })
        .unwrap_or_default();

    let mut out = HeaderMap::new();
    for (name, value) in upstream {
        let lower = name.as_str().to_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str())
            || SCRUBBED_RESPONSE.contains(&lower.as_str())
            || removed.contains(&lower)
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    if let Some(t) = transform {
        for (name, value) in &t.add_response_headers {
            insert_str(&mut out, name, value);
        }
    }
    out
}

fn insert_str(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}

/// Transport retries apply only to methods safe to replay.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE
    )
}

// ---------------------------------------------------------------------------
// ProxyClient
// ---------------------------------------------------------------------------

/// The shared upstream HTTP client with its bounded connection pool.
#[derive(Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
}

impl ProxyClient {
    pub fn new() -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Internal {
                message: format!("failed to build upstream client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Probes a backend's health path. Used by the aggregate health
    /// endpoint; bounded by its own short timeout.
    pub async fn probe(&self, base: &str, path: &str) -> bool {
        let url = format!("{}{}", base.trim_end_matches('/'), path);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Forwards the request to the chosen upstream, retrying connection
    /// failures for idempotent methods up to the route's budget. POST is
    /// never retried.
    pub async fn forward(
        &self,
        route: &GatewayRoute,
        upstream: &str,
        request: ProxyRequest<'_>,
    ) -> Result<Response<Body>, GatewayError> {
        let transform = route.config.transform.as_ref();
        let path = transform_path(transform, request.path, request.matched_prefix);
        let mut url = format!("{}{}", upstream.trim_end_matches('/'), path);
        if let Some(query) = request.query {
            url.push('?');
            url.push_str(query);
        }

        let headers = build_upstream_headers(transform, &request);
        let timeout = Duration::from_secs(route.config.backend.timeout);
        let retries = if is_idempotent(&request.method) {
            route.config.backend.max_retries
        } else {
            0
        };

        let mut attempt = 0;
        let response = loop {
            let result = self
                .client
                .request(request.method.clone(), &url)
                .headers(headers.clone())
                .body(request.body.clone())
                .timeout(timeout)
                .send()
                .await;
            match result {
                Ok(response) => break response,
                Err(e) if e.is_timeout() => {
                    return Err(GatewayError::UpstreamTimeout {
                        backend: upstream.to_string(),
                    });
                }
                Err(e) if e.is_connect() && attempt < retries => {
                    attempt += 1;
                    tracing::debug!(
                        backend = %upstream,
                        attempt,
                        error = %e,
                        "retrying idempotent request after connect failure"
                    );
                }
                Err(e) => {
                    return Err(GatewayError::UpstreamUnavailable {
                        backend: upstream.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        };

        let status = response.status();
        let response_headers = filter_response_headers(transform, response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable {
                backend: upstream.to_string(),
                message: format!("failed to read upstream body: {e}"),
            })?;

        let mut out = Response::new(Body::from(bytes));
        *out.status_mut() = StatusCode::from_u16(status.as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        *out.headers_mut() = response_headers;
        Ok(out)
    }
}
