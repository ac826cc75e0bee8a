//! Identity plumbing
//!
//! Password hashing, JWT issue/verify and the [`AuthUser`] extractor that
//! turns a bearer token (header or cookie) into a typed request context.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Seller,
    Buyer,
}

impl Role {
    pub fn parse(raw: &str) -> ApiResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "seller" => Ok(Self::Seller),
            "buyer" => Ok(Self::Buyer),
            other => Err(ApiError::bad_request(format!("unknown role: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Seller => "seller",
            Self::Buyer => "buyer",
        }
    }
}

pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

pub const TOKEN_USE_ACCESS: &str = "access";
pub const TOKEN_USE_REFRESH: &str = "refresh";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: String,
    pub token_use: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_access_token(config: &Config, user_id: Uuid, role: Role) -> ApiResult<String> {
    issue_token(config, user_id, role, TOKEN_USE_ACCESS, Duration::minutes(config.access_token_ttl_minutes))
}

pub fn issue_refresh_token(config: &Config, user_id: Uuid, role: Role) -> ApiResult<String> {
    issue_token(config, user_id, role, TOKEN_USE_REFRESH, Duration::days(config.refresh_token_ttl_days))
}

fn issue_token(config: &Config, user_id: Uuid, role: Role, token_use: &str, ttl: Duration) -> ApiResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        role: role.as_str().to_string(),
        token_use: token_use.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(config.jwt_secret.as_bytes()))
        .map_err(|e| ApiError::internal(format!("token signing failed: {e}")))
}

pub fn decode_token(config: &Config, token: &str, expected_use: &str) -> ApiResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    if data.claims.token_use != expected_use {
        return Err(ApiError::unauthorized("wrong token type"));
    }
    Ok(data.claims)
}

/// Authenticated caller, verified against the current user record so bans
/// and role changes take effect immediately.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn require(&self, allowed: &[Role]) -> ApiResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden("insufficient permissions"))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get(header::AUTHORIZATION) {
        if let Ok(raw) = value.to_str() {
            if let Some(token) = raw.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    // Fallback: `token` cookie.
    let cookies = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "token").then(|| value.to_string())
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| ApiError::unauthorized("missing credentials"))?;
        let claims = decode_token(&state.config, &token, TOKEN_USE_ACCESS)?;

        let row: Option<(String, bool)> =
            sqlx::query_as("SELECT role, banned FROM users WHERE id = $1")
                .bind(claims.sub)
                .fetch_optional(&state.db)
                .await?;
        let (role, banned) = row.ok_or_else(|| ApiError::unauthorized("unknown user"))?;
        if banned {
            return Err(ApiError::forbidden("account is banned"));
        }

        Ok(AuthUser { id: claims.sub, role: Role::parse(&role)? })
    }
}

/// Optional authentication for public routes whose responses widen for
/// privileged callers. Absent credentials resolve to `None`; a credential
/// that is present but invalid is still rejected.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if bearer_token(parts).is_none() {
            return Ok(MaybeAuthUser(None));
        }
        AuthUser::from_request_parts(parts, state).await.map(|user| MaybeAuthUser(Some(user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/test".into(),
            port: 0,
            jwt_secret: "test-secret".into(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 7,
            smtp: None,
            stripe: None,
            paypal: None,
            nats_url: None,
        }
    }

    #[test]
    fn password_roundtrip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(!verify_password("hunter22", "not-a-phc-string"));
    }

    #[test]
    fn token_roundtrip() {
        let config = test_config();
        let id = Uuid::new_v4();
        let token = issue_access_token(&config, id, Role::Seller).unwrap();
        let claims = decode_token(&config, &token, TOKEN_USE_ACCESS).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, "seller");
    }

    #[test]
    fn refresh_token_rejected_as_access() {
        let config = test_config();
        let token = issue_refresh_token(&config, Uuid::new_v4(), Role::Buyer).unwrap();
        let err = decode_token(&config, &token, TOKEN_USE_ACCESS).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Unauthorized);
    }

    #[test]
    fn role_parse_normalizes_case() {
        assert_eq!(Role::parse(" Admin ").unwrap(), Role::Admin);
        assert_eq!(Role::parse("SELLER").unwrap(), Role::Seller);
        assert!(Role::parse("superuser").is_err());
    }
}
