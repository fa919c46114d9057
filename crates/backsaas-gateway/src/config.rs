//! Gateway configuration: a YAML file merged over process-env defaults,
//! validated before the listener starts.
//!
//! Environment variables (`GATEWAY_PORT`, `REDIS_URL`, `JWT_SECRET`,
//! `ENVIRONMENT`) supply defaults; values present in the file win.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Default backend request timeout in seconds.
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 30;
/// Default transport-level retry budget for idempotent methods.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default per-minute request budget when no limit is configured anywhere.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating the gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    Io { path: String, message: String },
    /// The config file is not valid YAML.
    Parse { message: String },
    /// A route is unmatchable: no host, no path prefix, no tenant id.
    UnmatchableRoute { index: usize, description: String },
    /// A route has no backend URL at all.
    MissingBackend { index: usize, description: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "failed to read config '{path}': {message}")
            }
            Self::Parse { message } => {
                write!(f, "failed to parse config: {message}")
            }
            Self::UnmatchableRoute { index, description } => {
                write!(
                    f,
                    "route #{index} ('{description}') declares no host, path prefix, or tenant id"
                )
            }
            Self::MissingBackend { index, description } => {
                write!(f, "route #{index} ('{description}') declares no backend url")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Route building blocks
// ---------------------------------------------------------------------------

/// Upstream backend settings for one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Single upstream URL; ignored when `urls` is non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Load-balanced upstream URLs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_health_path")]
    pub health_check_path: String,
    #[serde(default = "default_load_balancing")]
    pub load_balancing: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            urls: Vec::new(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            health_check_path: default_health_path(),
            load_balancing: default_load_balancing(),
        }
    }
}

impl BackendConfig {
    /// Every configured upstream, in declaration order.
    pub fn upstreams(&self) -> Vec<&str> {
        if self.urls.is_empty() {
            self.url.iter().map(String::as_str).collect()
        } else {
            self.urls.iter().map(String::as_str).collect()
        }
    }
}

/// Per-route authentication policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// When false, a missing token is tolerated but an invalid one is not.
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default = "default_auth_header")]
    pub header_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_param: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_scopes: Vec<String>,
    /// Path prefixes allowed through without a token.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bypass_paths: Vec<String>,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            required: true,
            header_name: default_auth_header(),
            cookie_name: None,
            query_param: None,
            required_roles: Vec::new(),
            required_scopes: Vec::new(),
            bypass_paths: Vec::new(),
        }
    }
}

/// A tenant- or role-specific rate-limit override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOverride {
    pub requests_per_minute: u32,
    #[serde(default)]
    pub burst_size: u32,
}

/// Per-route rate-limit policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    /// Fallback token-bucket capacity; defaults to the per-minute budget.
    #[serde(default)]
    pub burst_size: u32,
    /// `ip`, `user`, `tenant`, or `custom`.
    #[serde(default = "default_key_strategy")]
    pub key_strategy: String,
    /// Header or query name consulted by the `custom` strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_key: Option<String>,
    /// Overrides keyed by tenant id or role name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, LimitOverride>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_rpm(),
            burst_size: 0,
            key_strategy: default_key_strategy(),
            custom_key: None,
            limits: BTreeMap::new(),
        }
    }
}

/// Request/response edits applied on a matched route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TransformConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_headers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_path: Option<String>,
    #[serde(default)]
    pub strip_prefix: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add_response_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_response_headers: Vec<String>,
}

/// One entry in the gateway's matching table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformConfig>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            description: String::new(),
            host: None,
            path_prefix: None,
            tenant_id: None,
            headers: BTreeMap::new(),
            backend: BackendConfig::default(),
            auth: None,
            rate_limit: None,
            transform: None,
            enabled: default_true(),
        }
    }
}

// ---------------------------------------------------------------------------
// CORS & monitoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_origins: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_headers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default)]
    pub max_age: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `json` or `text`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_true")]
    pub log_requests: bool,
    #[serde(default)]
    pub tracing_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing_service: Option<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_path: default_metrics_path(),
            health_path: default_health_path(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_requests: true,
            tracing_enabled: false,
            tracing_service: None,
        }
    }
}

// ---------------------------------------------------------------------------
// GatewayConfig
// ---------------------------------------------------------------------------

/// The full gateway configuration after env-default resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: None,
            redis_url: None,
            jwt_secret: None,
            environment: None,
            routes: Vec::new(),
            cors: CorsConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Parses a YAML document and fills unset top-level values from the
    /// process environment.
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(input).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.merge_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Reads and parses the config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Fills unset values from an environment lookup. File values win.
    pub fn merge_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if self.port.is_none() {
            self.port = env("GATEWAY_PORT").and_then(|v| v.parse().ok());
        }
        if self.redis_url.is_none() {
            self.redis_url = env("REDIS_URL");
        }
        if self.jwt_secret.is_none() {
            self.jwt_secret = env("JWT_SECRET");
        }
        if self.environment.is_none() {
            self.environment = env("ENVIRONMENT");
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(8080)
    }

    pub fn redis_url(&self) -> &str {
        self.redis_url.as_deref().unwrap_or("redis://127.0.0.1:6379")
    }

    pub fn jwt_secret(&self) -> &str {
        self.jwt_secret.as_deref().unwrap_or_default()
    }

    pub fn environment(&self) -> &str {
        self.environment.as_deref().unwrap_or("development")
    }

    /// Validates every route, returning warnings for suspicious but legal
    /// configurations (e.g. a broad prefix declared before a narrower one;
    /// matching corrects the order, but the shadowing is worth surfacing).
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let mut warnings = Vec::new();
        for (index, route) in self.routes.iter().enumerate() {
            if route.host.is_none() && route.path_prefix.is_none() && route.tenant_id.is_none() {
                return Err(ConfigError::UnmatchableRoute {
                    index,
                    description: route.description.clone(),
                });
            }
            if route.backend.upstreams().is_empty() {
                return Err(ConfigError::MissingBackend {
                    index,
                    description: route.description.clone(),
                });
            }
        }

        for (i, broad) in self.routes.iter().enumerate() {
            let Some(broad_prefix) = broad.path_prefix.as_deref() else {
                continue;
            };
            for (j, narrow) in self.routes.iter().enumerate().skip(i + 1) {
                let Some(narrow_prefix) = narrow.path_prefix.as_deref() else {
                    continue;
                };
                if narrow_prefix.len() > broad_prefix.len()
                    && narrow_prefix.starts_with(broad_prefix)
                {
                    warnings.push(format!(
                        "route #{i} ('{broad_prefix}') is declared before narrower \
                         route #{j} ('{narrow_prefix}'); specificity ordering still applies"
                    ));
                }
            }
        }
        Ok(warnings)
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_BACKEND_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_load_balancing() -> String {
    "round_robin".to_string()
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

fn default_rpm() -> u32 {
    DEFAULT_REQUESTS_PER_MINUTE
}

fn default_key_strategy() -> String {
    "ip".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_YAML: &str = r#"
port: 9000
jwt_secret: sekrit
routes:
  - description: platform api
    path_prefix: /api/platform
    backend:
      url: http://platform:8080
      timeout: 10
    auth:
      required_roles: [platform_admin]
    rate_limit:
      requests_per_minute: 120
      key_strategy: user
      limits:
        acme:
          requests_per_minute: 600
          burst_size: 50
  - description: tenant apis
    path_prefix: /tenant/*/api
    backend:
      urls:
        - http://tenant-a:8080
        - http://tenant-b:8080
    transform:
      strip_prefix: true
      add_headers:
        X-Interface-Type: tenant
cors:
  enabled: true
  allowed_origins: ["https://app.example.com"]
monitoring:
  log_format: text
"#;

    #[test]
    fn parses_full_document() {
        let config = GatewayConfig::from_yaml_str(FULL_YAML).unwrap();
        assert_eq!(config.port(), 9000);
        assert_eq!(config.jwt_secret(), "sekrit");
        assert_eq!(config.routes.len(), 2);

        let platform = &config.routes[0];
        assert_eq!(platform.path_prefix.as_deref(), Some("/api/platform"));
        assert_eq!(platform.backend.timeout, 10);
        assert_eq!(platform.backend.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(
            platform.auth.as_ref().unwrap().required_roles,
            vec!["platform_admin"]
        );
        let rl = platform.rate_limit.as_ref().unwrap();
        assert_eq!(rl.requests_per_minute, 120);
        assert_eq!(rl.limits["acme"].requests_per_minute, 600);

        let tenant = &config.routes[1];
        assert_eq!(tenant.backend.upstreams().len(), 2);
        assert!(tenant.transform.as_ref().unwrap().strip_prefix);
        assert_eq!(config.monitoring.log_format, "text");
        assert!(config.cors.enabled);
    }

    #[test]
    fn defaults_apply() {
        let config = GatewayConfig::from_yaml_str("routes: []").unwrap();
        assert_eq!(config.monitoring.metrics_path, "/metrics");
        assert_eq!(config.monitoring.health_path, "/health");
        assert_eq!(config.monitoring.log_level, "info");
        assert_eq!(config.monitoring.log_format, "json");
        assert!(config.monitoring.enabled);

        let backend = BackendConfig::default();
        assert_eq!(backend.timeout, 30);
        assert_eq!(backend.max_retries, 3);
        assert_eq!(backend.health_check_path, "/health");

        let auth = AuthPolicy::default();
        assert_eq!(auth.header_name, "Authorization");
        assert!(auth.required);
    }

    #[test]
    fn env_fills_unset_values_only() {
        let mut config = GatewayConfig::from_yaml_str("port: 9000").unwrap();
        config.port = Some(9000);
        config.redis_url = None;
        config.merge_env(|name| match name {
            "GATEWAY_PORT" => Some("7777".to_string()),
            "REDIS_URL" => Some("redis://cache:6379".to_string()),
            _ => None,
        });
        // The file value wins; the unset value comes from the env.
        assert_eq!(config.port(), 9000);
        assert_eq!(config.redis_url(), "redis://cache:6379");
    }

    #[test]
    fn hard_defaults_when_nothing_is_set() {
        let config = GatewayConfig::default();
        assert_eq!(config.port(), 8080);
        assert_eq!(config.redis_url(), "redis://127.0.0.1:6379");
        assert_eq!(config.environment(), "development");
    }

    #[test]
    fn unmatchable_route_rejected() {
        let yaml = r#"
routes:
  - description: floats free
    backend:
      url: http://nowhere:1
"#;
        let config = GatewayConfig::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnmatchableRoute { index: 0, .. })
        ));
    }

    #[test]
    fn missing_backend_rejected() {
        let yaml = r#"
routes:
  - description: no upstream
    path_prefix: /api
"#;
        let config = GatewayConfig::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingBackend { index: 0, .. })
        ));
    }

    #[test]
    fn shadowed_prefix_warns() {
        let yaml = r#"
routes:
  - description: broad
    path_prefix: /api
    backend: { url: "http://a:1" }
  - description: narrow
    path_prefix: /api/platform
    backend: { url: "http://b:1" }
"#;
        let config = GatewayConfig::from_yaml_str(yaml).unwrap();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("/api/platform"));
    }

    #[test]
    fn valid_config_has_no_warnings() {
        let config = GatewayConfig::from_yaml_str(FULL_YAML).unwrap();
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        std::fs::write(&path, FULL_YAML).unwrap();
        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.routes.len(), 2);
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = GatewayConfig::from_file(Path::new("/nonexistent/gw.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
