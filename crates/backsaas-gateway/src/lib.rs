//! The BackSaaS front-door gateway.
//!
//! A configuration-driven reverse proxy: route matching by host, path
//! prefix, and headers; bearer-token authentication; distributed rate
//! limiting over a shared store with an in-process fallback; request and
//! response transformation; load-balanced upstream selection; and
//! per-process observability.

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod ratelimit;
pub mod router;
pub mod server;

pub use auth::{AuthContext, Claims};
pub use config::{ConfigError, GatewayConfig};
pub use error::GatewayError;
pub use metrics::Metrics;
pub use proxy::ProxyClient;
pub use ratelimit::{RateDecision, RateLimiter};
pub use router::{RouteMatch, RouteTable};
pub use server::{build_router, GatewayState};
