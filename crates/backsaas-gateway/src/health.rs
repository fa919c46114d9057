//! Aggregate gateway health: the rate-limit store plus every configured
//! backend's health path.

use std::collections::BTreeMap;

use axum::http::StatusCode;

use crate::proxy::ProxyClient;
use crate::ratelimit::RateLimiter;
use crate::router::RouteTable;

/// Probes every dependency and renders the health document.
///
/// Returns 200 iff the rate-limit store and every distinct backend of an
/// enabled route are healthy; 503 with the degraded payload otherwise.
pub async fn aggregate(
    limiter: &RateLimiter,
    table: &RouteTable,
    proxy: &ProxyClient,
) -> (StatusCode, serde_json::Value) {
    let store_healthy = limiter.store_healthy().await;

    let mut backends: BTreeMap<String, bool> = BTreeMap::new();
    for route in table.routes() {
        if !route.config.enabled {
            continue;
        }
        let health_path = &route.config.backend.health_check_path;
        for upstream in route.config.backend.upstreams() {
            if backends.contains_key(upstream) {
                continue;
            }
            let healthy = proxy.probe(upstream, health_path).await;
            backends.insert(upstream.to_string(), healthy);
        }
    }

    let all_backends_healthy = backends.values().all(|ok| *ok);
    let healthy = store_healthy && all_backends_healthy;

    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "rate_limit_store": if store_healthy { "healthy" } else { "unreachable" },
        "backends": backends
            .iter()
            .map(|(name, ok)| {
                (name.clone(), serde_json::json!(if *ok { "healthy" } else { "unhealthy" }))
            })
            .collect::<serde_json::Map<_, _>>(),
    });

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, RouteConfig};

    #[tokio::test]
    async fn unreachable_everything_is_degraded() {
        let limiter = RateLimiter::disconnected();
        let table = RouteTable::new(vec![RouteConfig {
            description: "api".to_string(),
            path_prefix: Some("/api".to_string()),
            backend: BackendConfig {
                // A closed port; the probe fails fast.
                url: Some("http://127.0.0.1:1".to_string()),
                ..BackendConfig::default()
            },
            ..RouteConfig::default()
        }]);
        let proxy = ProxyClient::new().unwrap();

        let (code, body) = aggregate(&limiter, &table, &proxy).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["rate_limit_store"], "unreachable");
        assert_eq!(body["backends"]["http://127.0.0.1:1"], "unhealthy");
    }

    #[tokio::test]
    async fn disabled_routes_are_not_probed() {
        let limiter = RateLimiter::disconnected();
        let table = RouteTable::new(vec![RouteConfig {
            description: "off".to_string(),
            path_prefix: Some("/api".to_string()),
            enabled: false,
            backend: BackendConfig {
                url: Some("http://127.0.0.1:1".to_string()),
                ..BackendConfig::default()
            },
            ..RouteConfig::default()
        }]);
        let proxy = ProxyClient::new().unwrap();

        let (_, body) = aggregate(&limiter, &table, &proxy).await;
        assert!(body["backends"].as_object().unwrap().is_empty());
    }
}
