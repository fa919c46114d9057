//! Route matching: select at most one enabled route for a request.
//!
//! All declared predicates of a route must hold. Ties are broken by the
//! longest declared path prefix, then by the number of header constraints,
//! then by host specificity (exact > wildcard > unset), then by
//! declaration order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::HeaderMap;

use crate::config::RouteConfig;

/// The wildcard forms the matcher accepts are deliberately small: `*` as a
/// full path segment, and `*.` as a single leading host label. Nothing
/// else in a prefix or host is treated specially.
#[derive(Debug)]
pub struct GatewayRoute {
    /// Declaration position; the final tie-breaker.
    pub index: usize,
    pub config: RouteConfig,
    /// Round-robin cursor over the backend URLs.
    counter: AtomicUsize,
}

impl GatewayRoute {
    fn new(index: usize, config: RouteConfig) -> Self {
        Self {
            index,
            config,
            counter: AtomicUsize::new(0),
        }
    }

    /// Selects the next upstream URL round-robin. Returns `None` when no
    /// backend is configured (rejected earlier by config validation).
    pub fn next_upstream(&self) -> Option<String> {
        let upstreams = self.config.backend.upstreams();
        if upstreams.is_empty() {
            return None;
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(upstreams[n % upstreams.len()].to_string())
    }
}

/// One successful match: the route plus what the match learned about the
/// request.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<GatewayRoute>,
    /// Tenant context, if any source produced one.
    pub tenant_id: Option<String>,
    /// The request-path bytes the prefix consumed; what `strip_prefix`
    /// removes.
    pub matched_prefix: String,
}

/// The gateway's matching table, built once from validated config.
pub struct RouteTable {
    routes: Vec<Arc<GatewayRoute>>,
}

impl RouteTable {
    pub fn new(configs: Vec<RouteConfig>) -> Self {
        let routes = configs
            .into_iter()
            .enumerate()
            .map(|(index, config)| Arc::new(GatewayRoute::new(index, config)))
            .collect();
        Self { routes }
    }

    /// Every route, in declaration order.
    pub fn routes(&self) -> &[Arc<GatewayRoute>] {
        &self.routes
    }

    /// Finds the best enabled route for a request, or `None`.
    pub fn find(
        &self,
        host: Option<&str>,
        path: &str,
        headers: &HeaderMap,
        query: Option<&str>,
    ) -> Option<RouteMatch> {
        let mut best: Option<Candidate> = None;

        for route in &self.routes {
            let Some(candidate) = match_route(route, host, path, headers, query) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some(current) => candidate.rank() > current.rank(),
            };
            if better {
                best = Some(candidate);
            }
        }

        best.map(|c| {
            let tenant_id = extract_tenant(&c, headers, query);
            RouteMatch {
                route: Arc::clone(&c.route),
                tenant_id,
                matched_prefix: c.matched_prefix,
            }
        })
    }
}

struct Candidate {
    route: Arc<GatewayRoute>,
    prefix_len: usize,
    header_count: usize,
    /// 2 exact, 1 wildcard, 0 unset.
    host_specificity: u8,
    matched_prefix: String,
    host_label: Option<String>,
    captured_segment: Option<String>,
}

impl Candidate {
    /// Ordering key: higher ranks win. Declaration order breaks final
    /// ties (earlier wins), hence the reversed index.
    fn rank(&self) -> (usize, usize, u8, std::cmp::Reverse<usize>) {
        (
            self.prefix_len,
            self.header_count,
            self.host_specificity,
            std::cmp::Reverse(self.route.index),
        )
    }
}

fn match_route(
    route: &Arc<GatewayRoute>,
    host: Option<&str>,
    path: &str,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Option<Candidate> {
    let config = &route.config;
    if !config.enabled {
        return None;
    }

    let mut host_specificity = 0u8;
    let mut host_label = None;
    if let Some(pattern) = config.host.as_deref() {
        let (specificity, label) = host_matches(pattern, host?)?;
        host_specificity = specificity;
        host_label = label;
    }

    let mut prefix_len = 0;
    let mut matched_prefix = String::new();
    let mut captured_segment = None;
    if let Some(prefix) = config.path_prefix.as_deref() {
        let (consumed, captured) = prefix_matches(prefix, path)?;
        prefix_len = prefix.len();
        matched_prefix = path[..consumed].to_string();
        captured_segment = captured;
    }

    for (name, expected) in &config.headers {
        let actual = headers.get(name.as_str())?.to_str().ok()?;
        if actual != expected {
            return None;
        }
    }

    let candidate = Candidate {
        route: Arc::clone(route),
        prefix_len,
        header_count: config.headers.len(),
        host_specificity,
        matched_prefix,
        host_label,
        captured_segment,
    };

    // A declared tenant id restricts the route to requests that carry the
    // same tenant, or none at all (the route then supplies the context).
    if let Some(expected) = config.tenant_id.as_deref() {
        match extract_tenant(&candidate, headers, query) {
            Some(found) if found != expected => return None,
            _ => {}
        }
    }

    Some(candidate)
}

/// Exact (case-insensitive, port-stripped) or single-level `*.domain`
/// wildcard host matching. The wildcard consumes exactly one DNS label.
fn host_matches(pattern: &str, host: &str) -> Option<(u8, Option<String>)> {
    let host = strip_port(host).to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();

    if let Some(suffix) = pattern.strip_prefix("*.") {
        let label = host.strip_suffix(&format!(".{suffix}"))?;
        if label.is_empty() || label.contains('.') {
            return None;
        }
        return Some((1, Some(label.to_string())));
    }

    (host == pattern).then_some((2, None))
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Segment-wise prefix matching; `*` matches exactly one path segment.
/// Returns the number of request-path bytes consumed plus the first
/// `*`-captured segment.
fn prefix_matches(prefix: &str, path: &str) -> Option<(usize, Option<String>)> {
    if !prefix.contains('*') {
        return path.starts_with(prefix).then_some((prefix.len(), None));
    }

    let prefix_segments: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if path_segments.len() < prefix_segments.len() {
        return None;
    }

    let mut captured = None;
    let mut consumed = 0usize;
    for (expected, actual) in prefix_segments.iter().zip(&path_segments) {
        if *expected == "*" {
            if captured.is_none() {
                captured = Some((*actual).to_string());
            }
        } else if expected != actual {
            return None;
        }
        consumed += 1 + actual.len();
    }
    Some((consumed, captured))
}

/// Tenant extraction order: explicit header, wildcard host label,
/// `*`-captured path segment, `tenant_id` query parameter, then the
/// route's own declared tenant. The first hit wins; none at all means the
/// route is served without tenant context.
fn extract_tenant(
    candidate: &Candidate,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Option<String> {
    if let Some(value) = headers
        .get("X-Tenant-ID")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return Some(value.to_string());
    }
    if let Some(label) = &candidate.host_label {
        return Some(label.clone());
    }
    if let Some(segment) = &candidate.captured_segment {
        return Some(segment.clone());
    }
    if let Some(value) = query.and_then(query_tenant) {
        return Some(value);
    }
    candidate.route.config.tenant_id.clone()
}

fn query_tenant(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == "tenant_id" && !value.is_empty()).then(|| value.to_string())
    })
}
