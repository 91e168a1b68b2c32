//! Request-level auth (§1 "Out of scope" as a feature, but the
//! ambient gate every HTTP edge needs): API-key middleware for
//! workflow endpoints, JWT bearer auth for the dashboard.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::{ApiConfig, DashboardAuthConfig};

#[derive(Clone)]
pub struct AuthState {
    pub config: ApiConfig,
}

pub fn create_auth_state(config: ApiConfig) -> Arc<AuthState> {
    Arc::new(AuthState { config })
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response()
}

/// Constant-time API-key check. If no key is configured the gate is a
/// no-op (§6: require the header only "when the key is set").
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let Some(expected_key) = &auth_state.config.api_key else {
        return Ok(next.run(request).await);
    };

    let path = request.uri().path().to_string();
    let provided_key = extract_key(&headers).ok_or_else(|| {
        warn!("missing or malformed api key for path: {}", path);
        unauthorized()
    })?;

    if provided_key.as_bytes().ct_eq(expected_key.as_bytes()).into() {
        Ok(next.run(request).await)
    } else {
        warn!("invalid api key for path: {}", path);
        Err(unauthorized())
    }
}

fn extract_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key") {
        return value.to_str().ok().map(str::to_string);
    }
    if let Some(value) = headers.get("authorization") {
        let value = value.to_str().ok()?;
        return value.strip_prefix("Bearer ").map(str::to_string);
    }
    None
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    iat: i64,
}

/// Mirrors the original dashboard auth service: username/password
/// check against configured values, JWT issuance and verification.
#[derive(Clone)]
pub struct AuthService {
    config: DashboardAuthConfig,
}

impl AuthService {
    pub fn new(config: DashboardAuthConfig) -> Self {
        Self { config }
    }

    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        username.as_bytes().ct_eq(self.config.username.as_bytes()).into()
            && password.as_bytes().ct_eq(self.config.password.as_bytes()).into()
    }

    pub fn create_token(&self, username: &str) -> crate::Result<TokenResponse> {
        let now = chrono::Utc::now();
        let expires_at = now + chrono::Duration::hours(self.config.jwt_expire_hours);
        let claims = Claims {
            sub: username.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()))
            .map_err(|e| crate::OrchestratorError::Internal(e.into()))?;
        Ok(TokenResponse {
            access_token: token,
            token_type: "bearer",
            expires_at: expires_at.to_rfc3339(),
        })
    }

    /// Returns the subject (username) if the token is valid and
    /// unexpired, `None` otherwise — mirrors the original's behaviour
    /// of treating any decode failure as "not authenticated" rather
    /// than surfacing the specific cause.
    pub fn verify_token(&self, token: &str) -> Option<String> {
        decode::<Claims>(token, &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()), &Validation::default())
            .ok()
            .map(|data| data.claims.sub)
    }
}

#[derive(Clone)]
pub struct DashboardAuthState {
    pub service: AuthService,
}

/// Bearer-token middleware for dashboard routes.
pub async fn dashboard_auth_middleware(
    State(state): State<Arc<DashboardAuthState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(unauthorized)?;

    if state.service.verify_token(token).is_some() {
        Ok(next.run(request).await)
    } else {
        Err(unauthorized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DashboardAuthConfig {
        DashboardAuthConfig {
            jwt_secret: "test-secret".to_string(),
            username: "admin".to_string(),
            password: "hunter2".to_string(),
            jwt_expire_hours: 12,
        }
    }

    #[test]
    fn authenticate_checks_both_fields() {
        let service = AuthService::new(config());
        assert!(service.authenticate("admin", "hunter2"));
        assert!(!service.authenticate("admin", "wrong"));
        assert!(!service.authenticate("someone", "hunter2"));
    }

    #[test]
    fn round_trips_a_token() {
        let service = AuthService::new(config());
        let token = service.create_token("admin").unwrap();
        assert_eq!(service.verify_token(&token.access_token), Some("admin".to_string()));
    }

    #[test]
    fn rejects_a_token_signed_with_a_different_secret() {
        let service_a = AuthService::new(config());
        let mut other_config = config();
        other_config.jwt_secret = "different-secret".to_string();
        let service_b = AuthService::new(other_config);

        let token = service_a.create_token("admin").unwrap();
        assert_eq!(service_b.verify_token(&token.access_token), None);
    }
}
