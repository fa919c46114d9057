//! Bearer-token authentication and role/scope authorization.
//!
//! Tokens are HMAC-signed JWTs verified against the configured secret.
//! The token source is configurable per route: the auth header (default),
//! a named cookie, or a named query parameter -- the first source that
//! yields a non-empty value is used.

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthPolicy;
use crate::error::GatewayError;

/// The claim set the gateway understands. Anything else is preserved in
/// `extra` and propagated as raw claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub exp: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// What successful authentication stashes in the request context for
/// downstream middleware (rate-limit key strategies, proxy header
/// injection).
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub tenant_id: Option<String>,
    pub roles: Vec<String>,
    pub scopes: Vec<String>,
    pub claims: serde_json::Value,
}

impl AuthContext {
    fn from_claims(claims: Claims) -> Self {
        let raw = serde_json::to_value(&claims).unwrap_or(serde_json::Value::Null);
        Self {
            user_id: claims.sub,
            user_email: claims.email,
            tenant_id: claims.tenant_id,
            roles: claims.roles,
            scopes: claims.scopes,
            claims: raw,
        }
    }
}

/// Authenticates a request against a route's auth policy.
///
/// Returns `Ok(None)` when the policy is disabled, the path is on the
/// bypass list, or no token is present and none is required.
pub fn authenticate(
    policy: &AuthPolicy,
    secret: &str,
    path: &str,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<Option<AuthContext>, GatewayError> {
    if !policy.enabled {
        return Ok(None);
    }
    if policy
        .bypass_paths
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()))
    {
        return Ok(None);
    }

    let Some(token) = extract_token(policy, headers, query) else {
        if policy.required {
            return Err(GatewayError::AuthMissing);
        }
        return Ok(None);
    };

    let claims = verify(&token, secret)?;
    let context = AuthContext::from_claims(claims);
    authorize(policy, &context)?;
    Ok(Some(context))
}

/// Pulls the token from the first configured source that yields a
/// non-empty value: header, then cookie, then query parameter.
fn extract_token(policy: &AuthPolicy, headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(raw) = headers
        .get(policy.header_name.as_str())
        .and_then(|v| v.to_str().ok())
    {
        let token = raw
            .strip_prefix("Bearer ")
            .or_else(|| raw.strip_prefix("bearer "))
            .unwrap_or(raw)
            .trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    if let Some(name) = policy.cookie_name.as_deref() {
        if let Some(value) = headers
            .get("Cookie")
            .and_then(|v| v.to_str().ok())
            .and_then(|cookies| cookie_value(cookies, name))
        {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }

    if let Some(name) = policy.query_param.as_deref() {
        if let Some(value) = query.and_then(|q| query_value(q, name)) {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }

    None
}

fn cookie_value(cookies: &str, name: &str) -> Option<String> {
    cookies.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

fn query_value(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

/// Verifies signature and expiry. Only the HMAC family is accepted.
fn verify(token: &str, secret: &str) -> Result<Claims, GatewayError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp"]);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| GatewayError::AuthInvalid {
        reason: e.to_string(),
    })
}

/// Role and scope checks: at least one listed entry must be present.
fn authorize(policy: &AuthPolicy, context: &AuthContext) -> Result<(), GatewayError> {
    if !policy.required_roles.is_empty()
        && !policy
            .required_roles
            .iter()
            .any(|role| context.roles.contains(role))
    {
        return Err(GatewayError::Forbidden {
            message: format!(
                "requires one of roles: {}",
                policy.required_roles.join(", ")
            ),
        });
    }
    if !policy.required_scopes.is_empty()
        && !policy
            .required_scopes
            .iter()
            .any(|scope| context.scopes.contains(scope))
    {
        return Err(GatewayError::Forbidden {
            message: format!(
                "requires one of scopes: {}",
                policy.required_scopes.join(", ")
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-secret";

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn token_with(roles: &[&str], exp: u64) -> String {
        let claims = Claims {
            sub: Some("user-1".to_string()),
            email: Some("jo@acme.com".to_string()),
            tenant_id: Some("acme".to_string()),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            scopes: vec!["read".to_string()],
            exp,
            extra: BTreeMap::new(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[test]
    fn valid_token_produces_context() {
        let policy = AuthPolicy::default();
        let headers = bearer(&token_with(&["user"], now() + 600));
        let context = authenticate(&policy, SECRET, "/api/x", &headers, None)
            .unwrap()
            .unwrap();
        assert_eq!(context.user_id.as_deref(), Some("user-1"));
        assert_eq!(context.tenant_id.as_deref(), Some("acme"));
        assert_eq!(context.roles, vec!["user"]);
        assert_eq!(context.claims["email"], "jo@acme.com");
    }

    #[test]
    fn missing_token_when_required_is_401() {
        let policy = AuthPolicy::default();
        let err = authenticate(&policy, SECRET, "/api/x", &HeaderMap::new(), None).unwrap_err();
        assert!(matches!(err, GatewayError::AuthMissing));
    }

    #[test]
    fn missing_token_when_optional_is_anonymous() {
        let policy = AuthPolicy {
            required: false,
            ..AuthPolicy::default()
        };
        let result = authenticate(&policy, SECRET, "/api/x", &HeaderMap::new(), None).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn expired_token_is_401() {
        let policy = AuthPolicy::default();
        let headers = bearer(&token_with(&["user"], now().saturating_sub(600)));
        let err = authenticate(&policy, SECRET, "/api/x", &headers, None).unwrap_err();
        assert!(matches!(err, GatewayError::AuthInvalid { .. }));
    }

    #[test]
    fn wrong_secret_is_401() {
        let policy = AuthPolicy::default();
        let headers = bearer(&token_with(&["user"], now() + 600));
        let err = authenticate(&policy, "other-secret", "/api/x", &headers, None).unwrap_err();
        assert!(matches!(err, GatewayError::AuthInvalid { .. }));
    }

    #[test]
    fn missing_role_is_403() {
        let policy = AuthPolicy {
            required_roles: vec!["platform_admin".to_string()],
            ..AuthPolicy::default()
        };
        let headers = bearer(&token_with(&["user"], now() + 600));
        let err = authenticate(&policy, SECRET, "/api/x", &headers, None).unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { .. }));
    }

    #[test]
    fn matching_role_is_allowed() {
        let policy = AuthPolicy {
            required_roles: vec!["platform_admin".to_string()],
            ..AuthPolicy::default()
        };
        let headers = bearer(&token_with(&["platform_admin"], now() + 600));
        assert!(authenticate(&policy, SECRET, "/api/x", &headers, None)
            .unwrap()
            .is_some());
    }

    #[test]
    fn missing_scope_is_403() {
        let policy = AuthPolicy {
            required_scopes: vec!["admin:write".to_string()],
            ..AuthPolicy::default()
        };
        let headers = bearer(&token_with(&["user"], now() + 600));
        let err = authenticate(&policy, SECRET, "/api/x", &headers, None).unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { .. }));
    }

    #[test]
    fn bypass_path_skips_auth_entirely() {
        let policy = AuthPolicy {
            bypass_paths: vec!["/public".to_string()],
            ..AuthPolicy::default()
        };
        let result =
            authenticate(&policy, SECRET, "/public/anything", &HeaderMap::new(), None).unwrap();
        assert!(result.is_none());

        // Off the bypass list the token is demanded again.
        assert!(authenticate(&policy, SECRET, "/private", &HeaderMap::new(), None).is_err());
    }

    #[test]
    fn disabled_policy_skips_auth() {
        let policy = AuthPolicy {
            enabled: false,
            ..AuthPolicy::default()
        };
        let result = authenticate(&policy, SECRET, "/api/x", &HeaderMap::new(), None).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn cookie_source_is_consulted_after_header() {
        let policy = AuthPolicy {
            cookie_name: Some("session".to_string()),
            ..AuthPolicy::default()
        };
        let token = token_with(&["user"], now() + 600);
        let mut headers = HeaderMap::new();
        headers.insert(
            "Cookie",
            format!("theme=dark; session={token}").parse().unwrap(),
        );
        let context = authenticate(&policy, SECRET, "/api/x", &headers, None)
            .unwrap()
            .unwrap();
        assert_eq!(context.user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn query_param_source() {
        let policy = AuthPolicy {
            query_param: Some("access_token".to_string()),
            ..AuthPolicy::default()
        };
        let token = token_with(&["user"], now() + 600);
        let query = format!("a=1&access_token={token}");
        let context = authenticate(&policy, SECRET, "/api/x", &HeaderMap::new(), Some(&query))
            .unwrap()
            .unwrap();
        assert_eq!(context.user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn token_without_bearer_prefix_is_accepted() {
        let policy = AuthPolicy::default();
        let token = token_with(&["user"], now() + 600);
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", token.parse().unwrap());
        assert!(authenticate(&policy, SECRET, "/api/x", &headers, None)
            .unwrap()
            .is_some());
    }

    #[test]
    fn non_hmac_token_is_rejected() {
        // An RS256 header with an HMAC signature cannot verify.
        let policy = AuthPolicy::default();
        let mut headers = HeaderMap::new();
        // Forged token with alg=RS256 in the header.
        let forged = format!(
            "{}.{}.sig",
            base64url(br#"{"alg":"RS256","typ":"JWT"}"#),
            base64url(br#"{"exp":99999999999}"#),
        );
        headers.insert("Authorization", format!("Bearer {forged}").parse().unwrap());
        let err = authenticate(&policy, SECRET, "/api/x", &headers, None).unwrap_err();
        assert!(matches!(err, GatewayError::AuthInvalid { .. }));
    }

    fn base64url(input: &[u8]) -> String {
        // Minimal unpadded base64url for test fixtures.
        const ALPHABET: &[u8] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
        let mut out = String::new();
        for chunk in input.chunks(3) {
            let b = [
                chunk[0],
                chunk.get(1).copied().unwrap_or(0),
                chunk.get(2).copied().unwrap_or(0),
            ];
            let n = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
            out.push(ALPHABET[(n >> 18) as usize & 63] as char);
            out.push(ALPHABET[(n >> 12) as usize & 63] as char);
            if chunk.len() > 1 {
                out.push(ALPHABET[(n >> 6) as usize & 63] as char);
            }
            if chunk.len() > 2 {
                out.push(ALPHABET[n as usize & 63] as char);
            }
        }
        out
    }
}
