//! Gateway composition: the per-request pipeline (match, authenticate,
//! rate-limit, proxy) plus the response-finalizing middleware that stamps
//! every reply -- including locally produced errors -- with the request
//! id and the security headers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, Method, Response};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::auth::{authenticate, AuthContext};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::health;
use crate::metrics::Metrics;
use crate::proxy::{ProxyClient, ProxyRequest};
use crate::ratelimit::{derive_key, resolve_limit, RateDecision, RateLimiter};
use crate::router::{RouteMatch, RouteTable};

/// Value of the `X-Gateway` response header.
const GATEWAY_ID: &str = "backsaas-gateway";

/// One immutable view of the gateway's configuration and matching table.
/// Held behind an `ArcSwap` so a future reload can swap it without a lock
/// on the hot path.
pub struct Snapshot {
    pub config: GatewayConfig,
    pub table: RouteTable,
}

impl Snapshot {
    pub fn new(config: GatewayConfig) -> Self {
        let table = RouteTable::new(config.routes.clone());
        Self { config, table }
    }
}

/// Shared state for the gateway's handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub snapshot: Arc<ArcSwap<Snapshot>>,
    pub limiter: Arc<RateLimiter>,
    pub proxy: ProxyClient,
    pub metrics: Arc<Metrics>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, limiter: RateLimiter) -> Result<Self, GatewayError> {
        Ok(Self {
            snapshot: Arc::new(ArcSwap::from_pointee(Snapshot::new(config))),
            limiter: Arc::new(limiter),
            proxy: ProxyClient::new()?,
            metrics: Arc::new(Metrics::new()),
        })
    }
}

/// What the pipeline learned about a request, stashed on the response for
/// the finalizing middleware to log and count.
#[derive(Debug, Clone, Default)]
struct RequestOutcome {
    route: Option<String>,
    tenant: Option<String>,
    user_id: Option<String>,
    upstream_path: Option<String>,
    error_class: Option<&'static str>,
}

/// Builds the gateway router: metrics and health endpoints (when
/// monitoring is enabled), the catch-all proxy pipeline, CORS, and the
/// finalizing middleware.
pub fn build_router(state: GatewayState) -> Router {
    let snapshot = state.snapshot.load();
    let monitoring = snapshot.config.monitoring.clone();
    let cors = snapshot.config.cors.clone();
    drop(snapshot);

    let mut router = Router::new();
    if monitoring.enabled {
        router = router
            .route(&monitoring.metrics_path, get(metrics_endpoint))
            .route(&monitoring.health_path, get(health_endpoint));
    }
    let mut router = router.fallback(pipeline);

    if cors.enabled {
        router = router.layer(cors_layer(&cors));
    }
    router
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            finalize,
        ))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Monitoring endpoints
// ---------------------------------------------------------------------------

async fn metrics_endpoint(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(state.metrics.snapshot())
}

async fn health_endpoint(State(state): State<GatewayState>) -> impl IntoResponse {
    let snapshot = state.snapshot.load_full();
    let (code, body) = health::aggregate(&state.limiter, &snapshot.table, &state.proxy).await;
    (code, Json(body))
}

// ---------------------------------------------------------------------------
// The request pipeline
// ---------------------------------------------------------------------------

/// Catch-all handler: match, authenticate, rate-limit, proxy.
async fn pipeline(State(state): State<GatewayState>, request: Request) -> Response<Body> {
    match run_pipeline(&state, request).await {
        Ok(response) => response,
        Err((error, outcome)) => {
            let class = error.class();
            let mut response = error.into_response();
            let mut outcome = outcome;
            outcome.error_class = Some(class);
            response.extensions_mut().insert(outcome);
            response
        }
    }
}

async fn run_pipeline(
    state: &GatewayState,
    request: Request,
) -> Result<Response<Body>, (GatewayError, RequestOutcome)> {
    let snapshot = state.snapshot.load_full();
    let (parts, body) = request.into_parts();

    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(str::to_string);
    let host = parts
        .headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let client_ip = client_ip(&parts);

    let mut outcome = RequestOutcome::default();

    let Some(matched) =
        snapshot
            .table
            .find(host.as_deref(), &path, &parts.headers, query.as_deref())
    else {
        return Err((GatewayError::RouteNotFound, outcome));
    };
    let route = Arc::clone(&matched.route);
    outcome.route = Some(route.config.description.clone());

    // Authentication.
    let auth = match route.config.auth.as_ref() {
        Some(policy) => authenticate(
            policy,
            snapshot.config.jwt_secret(),
            &path,
            &parts.headers,
            query.as_deref(),
        )
        .map_err(|e| (e, outcome.clone()))?,
        None => None,
    };
    let tenant = effective_tenant(&matched, auth.as_ref());
    outcome.tenant = tenant.clone();
    outcome.user_id = auth.as_ref().and_then(|a| a.user_id.clone());

    // Rate limiting.
    let decision = check_rate_limit(
        state,
        &route.config,
        route.index,
        &client_ip,
        auth.as_ref(),
        tenant.as_deref(),
        &parts.headers,
        query.as_deref(),
    )
    .await;
    if let Some(decision) = decision {
        if !decision.allowed {
            state.metrics.record_rate_limited();
            let mut response = GatewayError::RateLimited {
                retry_after: decision.retry_after,
            }
            .into_response();
            apply_rate_headers(&mut response, &decision);
            outcome.error_class = Some("rate_limited");
            response.extensions_mut().insert(outcome);
            return Ok(response);
        }
    }

    // Read the body; POST bodies are forwarded as-is, never replayed.
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| {
            (
                GatewayError::Internal {
                    message: format!("failed to read request body: {e}"),
                },
                outcome.clone(),
            )
        })?;

    let upstream = route.next_upstream().ok_or_else(|| {
        (
            GatewayError::Internal {
                message: "route has no backend".to_string(),
            },
            outcome.clone(),
        )
    })?;

    let request_id = parts
        .headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let proxy_request = ProxyRequest {
        method: parts.method.clone(),
        path: &path,
        query: query.as_deref(),
        headers: &parts.headers,
        body: bytes,
        client_ip: &client_ip,
        scheme: "http",
        host: host.as_deref(),
        request_id: &request_id,
        auth: auth.as_ref(),
        tenant: tenant.as_deref(),
        matched_prefix: &matched.matched_prefix,
    };
    outcome.upstream_path = Some(crate::proxy::transform_path(
        route.config.transform.as_ref(),
        &path,
        &matched.matched_prefix,
    ));

    let result = state.proxy.forward(&route, &upstream, proxy_request).await;
    state.metrics.record_backend(&upstream, result.is_err());

    let mut response = result.map_err(|e| (e, outcome.clone()))?;
    if let Some(decision) = decision {
        apply_rate_headers(&mut response, &decision);
    }
    response.extensions_mut().insert(outcome);
    Ok(response)
}

/// Tenant context for downstream use: the route match first, then the
/// token's tenant claim.
fn effective_tenant(matched: &RouteMatch, auth: Option<&AuthContext>) -> Option<String> {
    matched
        .tenant_id
        .clone()
        .or_else(|| auth.and_then(|a| a.tenant_id.clone()))
}

#[allow(clippy::too_many_arguments)]
async fn check_rate_limit(
    state: &GatewayState,
    config: &crate::config::RouteConfig,
    route_index: usize,
    client_ip: &str,
    auth: Option<&AuthContext>,
    tenant: Option<&str>,
    headers: &axum::http::HeaderMap,
    query: Option<&str>,
) -> Option<RateDecision> {
    let policy = config.rate_limit.as_ref()?;
    if !policy.enabled {
        return None;
    }
    let roles: Vec<String> = auth.map(|a| a.roles.clone()).unwrap_or_default();
    let (limit, burst) = resolve_limit(Some(policy), tenant, &roles);
    let key = derive_key(
        Some(policy),
        route_index,
        client_ip,
        auth,
        tenant,
        headers,
        query,
    );
    Some(state.limiter.check(&key, limit, burst).await)
}

fn apply_rate_headers(response: &mut Response<Body>, decision: &RateDecision) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.retry_after.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
}

fn client_ip(parts: &axum::http::request::Parts) -> String {
    if let Some(info) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        return info.0.ip().to_string();
    }
    parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// ---------------------------------------------------------------------------
// Finalizing middleware
// ---------------------------------------------------------------------------

/// Assigns or propagates the request id, stamps the standard response
/// headers on every reply, and records metrics and the request log.
async fn finalize(
    State(state): State<GatewayState>,
    mut request: Request,
    next: Next,
) -> Response<Body> {
    let started = Instant::now();

    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert("x-request-id", value);
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .or_else(|| {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let response = next.run(request).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let mut response = response;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert("X-Request-ID", value);
    }
    headers.insert("X-Gateway", HeaderValue::from_static(GATEWAY_ID));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-XSS-Protection",
        HeaderValue::from_static("1; mode=block"),
    );

    let outcome = response
        .extensions()
        .get::<RequestOutcome>()
        .cloned()
        .unwrap_or_default();
    let status = response.status().as_u16();

    state.metrics.record_request(
        outcome.route.as_deref(),
        outcome.tenant.as_deref(),
        status,
        latency_ms,
        outcome.error_class,
    );

    if state.snapshot.load().config.monitoring.log_requests {
        tracing::info!(
            method = %method,
            path = %path,
            upstream_path = outcome.upstream_path.as_deref().unwrap_or(""),
            status,
            latency_ms,
            client_ip = %client,
            user_agent = %user_agent,
            user_id = outcome.user_id.as_deref().unwrap_or(""),
            tenant_id = outcome.tenant.as_deref().unwrap_or(""),
            route = outcome.route.as_deref().unwrap_or(""),
            request_id = %request_id,
            "request"
        );
    }

    response
}

// ---------------------------------------------------------------------------
// CORS
// ---------------------------------------------------------------------------

fn cors_layer(config: &crate::config::CorsConfig) -> CorsLayer {
    let mut layer = CorsLayer::new();

    let any_origin = config.allowed_origins.is_empty()
        || config.allowed_origins.iter().any(|o| o == "*");
    if any_origin {
        layer = layer.allow_origin(AllowOrigin::any());
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        layer = layer.allow_origin(AllowOrigin::list(origins));
    }

    if config.allowed_methods.is_empty() {
        layer = layer.allow_methods(tower_http::cors::Any);
    } else {
        let methods: Vec<Method> = config
            .allowed_methods
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        layer = layer.allow_methods(methods);
    }

    if config.allowed_headers.is_empty() {
        layer = layer.allow_headers(tower_http::cors::Any);
    } else {
        let names: Vec<axum::http::HeaderName> = config
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        layer = layer.allow_headers(names);
    }

    if !config.exposed_headers.is_empty() {
        let names: Vec<axum::http::HeaderName> = config
            .exposed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        layer = layer.expose_headers(names);
    }

    // Credentials are only legal with explicit origins.
    if config.allow_credentials && !any_origin {
        layer = layer.allow_credentials(true);
    }

    if config.max_age > 0 {
        layer = layer.max_age(std::time::Duration::from_secs(config.max_age));
    }
    layer
}
