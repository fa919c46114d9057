//! In-process request metrics, exposed as a JSON snapshot at `/metrics`.
//!
//! Write-heavy on every request, read-heavy only from the metrics
//! endpoint; a reader/writer lock fits that shape. Latency samples are
//! kept in a ring of fixed size to bound memory.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};

/// Size of the rolling latency window.
const LATENCY_RING: usize = 1_000;

#[derive(Default)]
struct MetricsInner {
    total_requests: u64,
    by_status: BTreeMap<u16, u64>,
    by_route: BTreeMap<String, u64>,
    by_tenant: BTreeMap<String, u64>,
    total_errors: u64,
    errors_by_class: BTreeMap<String, u64>,
    rate_limit_hits: u64,
    backend_requests: BTreeMap<String, u64>,
    backend_errors: BTreeMap<String, u64>,
    latencies_ms: VecDeque<u64>,
    last_request: Option<DateTime<Utc>>,
}

/// Process-wide gateway metrics.
pub struct Metrics {
    inner: RwLock<MetricsInner>,
    started: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MetricsInner::default()),
            started: Instant::now(),
        }
    }

    /// Records one completed request.
    pub fn record_request(
        &self,
        route: Option<&str>,
        tenant: Option<&str>,
        status: u16,
        latency_ms: u64,
        error_class: Option<&str>,
    ) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.total_requests += 1;
        *inner.by_status.entry(status).or_default() += 1;
        if let Some(route) = route {
            *inner.by_route.entry(route.to_string()).or_default() += 1;
        }
        if let Some(tenant) = tenant {
            *inner.by_tenant.entry(tenant.to_string()).or_default() += 1;
        }
        if let Some(class) = error_class {
            inner.total_errors += 1;
            *inner.errors_by_class.entry(class.to_string()).or_default() += 1;
        }
        if inner.latencies_ms.len() == LATENCY_RING {
            inner.latencies_ms.pop_front();
        }
        inner.latencies_ms.push_back(latency_ms);
        inner.last_request = Some(Utc::now());
    }

    /// Records one proxied upstream call.
    pub fn record_backend(&self, backend: &str, errored: bool) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *inner
            .backend_requests
            .entry(backend.to_string())
            .or_default() += 1;
        if errored {
            *inner.backend_errors.entry(backend.to_string()).or_default() += 1;
        }
    }

    /// Counts one 429 produced by the rate limiter.
    pub fn record_rate_limited(&self) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.rate_limit_hits += 1;
    }

    /// Produces the `/metrics` JSON document.
    pub fn snapshot(&self) -> serde_json::Value {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let avg_latency_ms = if inner.latencies_ms.is_empty() {
            0.0
        } else {
            inner.latencies_ms.iter().sum::<u64>() as f64 / inner.latencies_ms.len() as f64
        };
        serde_json::json!({
            "uptime_seconds": self.started.elapsed().as_secs(),
            "total_requests": inner.total_requests,
            "requests_by_status": inner.by_status,
            "requests_by_route": inner.by_route,
            "requests_by_tenant": inner.by_tenant,
            "total_errors": inner.total_errors,
            "errors_by_class": inner.errors_by_class,
            "rate_limit_hits": inner.rate_limit_hits,
            "backend_requests": inner.backend_requests,
            "backend_errors": inner.backend_errors,
            "latency": {
                "samples": inner.latencies_ms.len(),
                "average_ms": avg_latency_ms,
            },
            "last_request": inner
                .last_request
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_request(Some("platform"), Some("acme"), 200, 12, None);
        metrics.record_request(Some("platform"), Some("acme"), 200, 8, None);
        metrics.record_request(Some("tenant"), None, 502, 30, Some("upstream_unavailable"));
        metrics.record_rate_limited();
        metrics.record_backend("http://platform:8080", false);
        metrics.record_backend("http://platform:8080", true);

        let snap = metrics.snapshot();
        assert_eq!(snap["total_requests"], 3);
        assert_eq!(snap["requests_by_status"]["200"], 2);
        assert_eq!(snap["requests_by_status"]["502"], 1);
        assert_eq!(snap["requests_by_route"]["platform"], 2);
        assert_eq!(snap["requests_by_tenant"]["acme"], 2);
        assert_eq!(snap["total_errors"], 1);
        assert_eq!(snap["errors_by_class"]["upstream_unavailable"], 1);
        assert_eq!(snap["rate_limit_hits"], 1);
        assert_eq!(snap["backend_requests"]["http://platform:8080"], 2);
        assert_eq!(snap["backend_errors"]["http://platform:8080"], 1);
        assert!(snap["last_request"].is_string());
    }

    #[test]
    fn latency_window_is_bounded() {
        let metrics = Metrics::new();
        for i in 0..(LATENCY_RING as u64 + 500) {
            metrics.record_request(None, None, 200, i, None);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap["latency"]["samples"], LATENCY_RING as u64);
        // The ring holds the newest samples: 500..1500, averaging 999.5.
        let avg = snap["latency"]["average_ms"].as_f64().unwrap();
        assert!((avg - 999.5).abs() < f64::EPSILON, "avg = {avg}");
    }

    #[test]
    fn empty_snapshot_is_well_formed() {
        let snap = Metrics::new().snapshot();
        assert_eq!(snap["total_requests"], 0);
        assert_eq!(snap["latency"]["samples"], 0);
        assert_eq!(snap["latency"]["average_ms"], 0.0);
        assert!(snap["last_request"].is_null());
    }
}
