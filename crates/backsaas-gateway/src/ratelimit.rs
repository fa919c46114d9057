//! Distributed rate limiting: a sliding window over Redis (authoritative
//! under horizontal scale-out) with a per-process token bucket as the
//! fallback when the store is unreachable.
//!
//! During a store outage each process enforces the limit locally, so the
//! aggregate across nodes may exceed the configured budget.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;

use crate::auth::AuthContext;
use crate::config::{RateLimitPolicy, DEFAULT_REQUESTS_PER_MINUTE};

/// The sliding window width.
const WINDOW: Duration = Duration::from_secs(60);
/// Extra expiry slack so abandoned keys are garbage collected.
const EXPIRY_SLACK: Duration = Duration::from_secs(10);
/// Per-operation budget for talking to the store.
const STORE_TIMEOUT: Duration = Duration::from_secs(5);
/// Fallback buckets idle longer than this are swept.
const BUCKET_IDLE: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// The outcome of one rate-limit check, with everything the response
/// headers need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window opens again; drives `Retry-After`.
    pub retry_after: u64,
    /// True when the shared store answered; false on the local fallback.
    pub shared: bool,
}

// ---------------------------------------------------------------------------
// Limit resolution & key derivation
// ---------------------------------------------------------------------------

/// Selects the effective limit for a request: a tenant-specific override,
/// then the first role-specific override, then the route default, then
/// the global default.
pub fn resolve_limit(
    policy: Option<&RateLimitPolicy>,
    tenant: Option<&str>,
    roles: &[String],
) -> (u32, u32) {
    let Some(policy) = policy else {
        return (DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_REQUESTS_PER_MINUTE);
    };
    if let Some(tenant) = tenant {
        if let Some(entry) = policy.limits.get(tenant) {
            return normalize(entry.requests_per_minute, entry.burst_size);
        }
    }
    for role in roles {
        if let Some(entry) = policy.limits.get(role) {
            return normalize(entry.requests_per_minute, entry.burst_size);
        }
    }
    normalize(policy.requests_per_minute, policy.burst_size)
}

fn normalize(limit: u32, burst: u32) -> (u32, u32) {
    let limit = if limit == 0 {
        DEFAULT_REQUESTS_PER_MINUTE
    } else {
        limit
    };
    let burst = if burst == 0 { limit } else { burst };
    (limit, burst)
}

/// Derives the string the window is counted under. Every strategy falls
/// back to the client IP when its preferred source is absent.
pub fn derive_key(
    policy: Option<&RateLimitPolicy>,
    route_index: usize,
    client_ip: &str,
    auth: Option<&AuthContext>,
    tenant: Option<&str>,
    headers: &axum::http::HeaderMap,
    query: Option<&str>,
) -> String {
    let (strategy, custom) = policy
        .map(|p| (p.key_strategy.as_str(), p.custom_key.as_deref()))
        .unwrap_or(("ip", None));

    let value = match strategy {
        "user" => auth
            .and_then(|a| a.user_id.clone())
            .unwrap_or_else(|| client_ip.to_string()),
        "tenant" => auth
            .and_then(|a| a.tenant_id.clone())
            .or_else(|| tenant.map(str::to_string))
            .unwrap_or_else(|| client_ip.to_string()),
        "custom" => custom
            .and_then(|name| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .or_else(|| query.and_then(|q| query_value(q, name)))
            })
            .unwrap_or_else(|| client_ip.to_string()),
        _ => client_ip.to_string(),
    };
    format!("ratelimit:{route_index}:{strategy}:{value}")
}

fn query_value(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name && !v.is_empty()).then(|| v.to_string())
    })
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    fn new(limit: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: f64::from(limit) / WINDOW.as_secs_f64(),
            last_refill: Instant::now(),
            last_seen: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        self.last_seen = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Sliding-window limiter over a shared Redis store with an in-process
/// token-bucket fallback.
pub struct RateLimiter {
    redis: Option<ConnectionManager>,
    fallback: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    /// Connects to the shared store. A connection failure is logged and
    /// leaves the limiter on the local fallback permanently.
    pub async fn connect(redis_url: &str) -> Self {
        let redis = match redis::Client::open(redis_url) {
            Ok(client) => match tokio::time::timeout(
                STORE_TIMEOUT,
                client.get_connection_manager(),
            )
            .await
            {
                Ok(Ok(manager)) => Some(manager),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "rate-limit store unavailable, using in-process fallback");
                    None
                }
                Err(_) => {
                    tracing::warn!("rate-limit store connection timed out, using in-process fallback");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "invalid redis url, using in-process fallback");
                None
            }
        };
        Self {
            redis,
            fallback: Mutex::new(HashMap::new()),
        }
    }

    /// A limiter with no shared store; every check uses the fallback.
    pub fn disconnected() -> Self {
        Self {
            redis: None,
            fallback: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if the shared store answers a PING within the budget.
    pub async fn store_healthy(&self) -> bool {
        let Some(manager) = self.redis.clone() else {
            return false;
        };
        let mut conn = manager;
        let cmd = redis::cmd("PING");
        let ping = cmd.query_async::<_, String>(&mut conn);
        matches!(
            tokio::time::timeout(STORE_TIMEOUT, ping).await,
            Ok(Ok(ref pong)) if pong == "PONG"
        )
    }

    /// Checks one request against the window for `key`.
    pub async fn check(&self, key: &str, limit: u32, burst: u32) -> RateDecision {
        if let Some(manager) = self.redis.clone() {
            match tokio::time::timeout(
                STORE_TIMEOUT,
                shared_check(manager, key, limit),
            )
            .await
            {
                Ok(Ok(decision)) => return decision,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "rate-limit store error, falling back");
                }
                Err(_) => {
                    tracing::warn!("rate-limit store timed out, falling back");
                }
            }
        }
        self.fallback_check(key, limit, burst)
    }

    fn fallback_check(&self, key: &str, limit: u32, burst: u32) -> RateDecision {
        let mut buckets = match self.fallback.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(limit, burst));
        let allowed = bucket.try_take();
        let remaining = bucket.tokens.floor().max(0.0) as u32;
        RateDecision {
            allowed,
            limit,
            remaining,
            retry_after: WINDOW.as_secs(),
            shared: false,
        }
    }

    /// Drops fallback buckets idle longer than the sweep horizon; bounds
    /// memory growth across many distinct keys.
    pub fn sweep(&self) {
        let mut buckets = match self.fallback.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let horizon = Instant::now();
        buckets.retain(|_, bucket| horizon.duration_since(bucket.last_seen) < BUCKET_IDLE);
    }

    /// Spawns the periodic fallback sweep.
    pub fn start_sweeper(self: &std::sync::Arc<Self>) {
        let limiter = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        });
    }
}

/// The shared-store path: one atomic pipeline per request that trims the
/// window, counts it, records the request, and refreshes expiry.
async fn shared_check(
    mut conn: ConnectionManager,
    key: &str,
    limit: u32,
) -> Result<RateDecision, redis::RedisError> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let window_ms = WINDOW.as_millis() as u64;
    let member = format!("{now_ms}-{}", uuid::Uuid::new_v4());

    let (_, count, _, _, oldest): (i64, i64, i64, i64, Vec<(String, f64)>) = redis::pipe()
        .atomic()
        .cmd("ZREMRANGEBYSCORE")
        .arg(key)
        .arg(0)
        .arg(now_ms.saturating_sub(window_ms))
        .cmd("ZCARD")
        .arg(key)
        .cmd("ZADD")
        .arg(key)
        .arg(now_ms)
        .arg(&member)
        .cmd("PEXPIRE")
        .arg(key)
        .arg((WINDOW + EXPIRY_SLACK).as_millis() as u64)
        .cmd("ZRANGE")
        .arg(key)
        .arg(0)
        .arg(0)
        .arg("WITHSCORES")
        .query_async(&mut conn)
        .await?;

    let used = count.max(0) as u64;
    let allowed = used < u64::from(limit);
    let retry_after = oldest
        .first()
        .map(|(_, score)| {
            let oldest_ms = *score as u64;
            (oldest_ms + window_ms).saturating_sub(now_ms).div_ceil(1000)
        })
        .unwrap_or(WINDOW.as_secs())
        .clamp(1, WINDOW.as_secs());

    Ok(RateDecision {
        allowed,
        limit,
        remaining: u32::try_from(u64::from(limit).saturating_sub(used + 1)).unwrap_or(0),
        retry_after,
        shared: true,
    })
}
