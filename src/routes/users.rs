//! Account routes: registration, verification, sessions, profile and
//! admin moderation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{Duration, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use super::{success, success_message, Paginated, Pagination};
use crate::auth::{
    self, hash_password, verify_password, AuthUser, Role, TOKEN_USE_REFRESH,
};
use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::User;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/verify-email", post(verify_email))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route("/change-password", post(change_password))
        .route("/me", get(me).put(update_me).delete(delete_me))
        .route("/:id/ban", put(ban_user))
        .route("/:id/unban", put(unban_user))
        .route("/", get(list_users))
}

fn six_digit_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

#[derive(Debug, Deserialize, Validate)]
struct RegisterRequest {
    #[validate(length(min = 1, max = 100))]
    name: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 8, max = 128))]
    password: String,
    role: Option<String>,
    address: Option<String>,
}

async fn register(
    State(s): State<AppState>,
    Json(r): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    r.validate()?;
    let role = match r.role.as_deref() {
        None => Role::Buyer,
        Some(raw) => {
            let role = Role::parse(raw)?;
            if role == Role::Admin {
                return Err(ApiError::bad_request("cannot register as admin"));
            }
            role
        }
    };

    let password_hash = hash_password(&r.password)?;
    let code = six_digit_code();
    let expires_at = Utc::now() + Duration::hours(24);

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (id, name, email, password_hash, role, address, verification_code, verification_expires_at)
         VALUES ($1, $2, lower($3), $4, $5, $6, $7, $8) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&r.name)
    .bind(&r.email)
    .bind(&password_hash)
    .bind(role.as_str())
    .bind(&r.address)
    .bind(&code)
    .bind(expires_at)
    .fetch_one(&s.db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::bad_request("email is already registered")
        } else {
            e.into()
        }
    })?;

    s.mailer.send(
        &user.email,
        "Verify your email",
        format!("Your verification code is {code}. It expires in 24 hours."),
        format!("<p>Your verification code is <b>{code}</b>. It expires in 24 hours.</p>"),
    );
    tracing::info!("user registered: {} ({})", user.id, user.role);
    Ok((StatusCode::CREATED, success(user)))
}

#[derive(Debug, Deserialize, Validate)]
struct VerifyEmailRequest {
    #[validate(email)]
    email: String,
    code: String,
}

async fn verify_email(
    State(s): State<AppState>,
    Json(r): Json<VerifyEmailRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    r.validate()?;
    let user = fetch_by_email(&s, &r.email).await?;
    if user.verified {
        return Ok(success_message("email already verified"));
    }
    let valid = user.verification_code.as_deref() == Some(r.code.as_str())
        && user.verification_expires_at.is_some_and(|expiry| expiry > Utc::now());
    if !valid {
        return Err(ApiError::bad_request("invalid or expired verification code"));
    }

    sqlx::query(
        "UPDATE users SET verified = TRUE, verification_code = NULL,
         verification_expires_at = NULL, updated_at = NOW() WHERE id = $1",
    )
    .bind(user.id)
    .execute(&s.db)
    .await?;
    Ok(success_message("email verified"))
}

#[derive(Debug, Deserialize, Validate)]
struct LoginRequest {
    #[validate(email)]
    email: String,
    password: String,
}

async fn login(
    State(s): State<AppState>,
    Json(r): Json<LoginRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    r.validate()?;
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = lower($1)")
        .bind(&r.email)
        .fetch_optional(&s.db)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid credentials"))?;

    if !verify_password(&r.password, &user.password_hash) {
        return Err(ApiError::unauthorized("invalid credentials"));
    }
    if user.banned {
        return Err(ApiError::forbidden("account is banned"));
    }
    if !user.verified {
        return Err(ApiError::forbidden("email is not verified"));
    }

    let role = Role::parse(&user.role)?;
    let access_token = auth::issue_access_token(&s.config, user.id, role)?;
    let refresh_token = auth::issue_refresh_token(&s.config, user.id, role)?;
    Ok(success(json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "user": user,
    })))
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(
    State(s): State<AppState>,
    Json(r): Json<RefreshRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let claims = auth::decode_token(&s.config, &r.refresh_token, TOKEN_USE_REFRESH)?;
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(claims.sub)
        .fetch_optional(&s.db)
        .await?
        .ok_or_else(|| ApiError::unauthorized("unknown user"))?;
    if user.banned {
        return Err(ApiError::forbidden("account is banned"));
    }

    let access_token = auth::issue_access_token(&s.config, user.id, Role::parse(&user.role)?)?;
    Ok(success(json!({ "access_token": access_token })))
}

#[derive(Debug, Deserialize, Validate)]
struct ChangePasswordRequest {
    current_password: String,
    #[validate(length(min = 8, max = 128))]
    new_password: String,
}

async fn change_password(
    State(s): State<AppState>,
    user: AuthUser,
    Json(r): Json<ChangePasswordRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    r.validate()?;
    let current: (String,) = sqlx::query_as("SELECT password_hash FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_one(&s.db)
        .await?;
    if !verify_password(&r.current_password, &current.0) {
        return Err(ApiError::unauthorized("current password is incorrect"));
    }

    let password_hash = hash_password(&r.new_password)?;
    sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
        .bind(user.id)
        .bind(&password_hash)
        .execute(&s.db)
        .await?;
    Ok(success_message("password changed"))
}

#[derive(Debug, Deserialize, Validate)]
struct ForgotPasswordRequest {
    #[validate(email)]
    email: String,
}

async fn forgot_password(
    State(s): State<AppState>,
    Json(r): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    r.validate()?;
    // Same response whether or not the account exists.
    if let Ok(user) = fetch_by_email(&s, &r.email).await {
        let code = six_digit_code();
        let expires_at = Utc::now() + Duration::hours(1);
        sqlx::query(
            "UPDATE users SET reset_code = $2, reset_expires_at = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(user.id)
        .bind(&code)
        .bind(expires_at)
        .execute(&s.db)
        .await?;
        s.mailer.send(
            &user.email,
            "Password reset",
            format!("Your password reset code is {code}. It expires in 1 hour."),
            format!("<p>Your password reset code is <b>{code}</b>. It expires in 1 hour.</p>"),
        );
    }
    Ok(success_message("if the account exists, a reset code has been sent"))
}

#[derive(Debug, Deserialize, Validate)]
struct ResetPasswordRequest {
    #[validate(email)]
    email: String,
    code: String,
    #[validate(length(min = 8, max = 128))]
    new_password: String,
}

async fn reset_password(
    State(s): State<AppState>,
    Json(r): Json<ResetPasswordRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    r.validate()?;
    let user = fetch_by_email(&s, &r.email).await?;
    let valid = user.reset_code.as_deref() == Some(r.code.as_str())
        && user.reset_expires_at.is_some_and(|expiry| expiry > Utc::now());
    if !valid {
        return Err(ApiError::bad_request("invalid or expired reset code"));
    }

    let password_hash = hash_password(&r.new_password)?;
    sqlx::query(
        "UPDATE users SET password_hash = $2, reset_code = NULL, reset_expires_at = NULL,
         updated_at = NOW() WHERE id = $1",
    )
    .bind(user.id)
    .bind(&password_hash)
    .execute(&s.db)
    .await?;
    Ok(success_message("password reset"))
}

async fn me(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    let record = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_one(&s.db)
        .await?;
    Ok(success(record))
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100))]
    name: Option<String>,
    address: Option<String>,
}

async fn update_me(
    State(s): State<AppState>,
    user: AuthUser,
    Json(r): Json<UpdateProfileRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    r.validate()?;
    let record = sqlx::query_as::<_, User>(
        "UPDATE users SET name = COALESCE($2, name), address = COALESCE($3, address),
         updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(user.id)
    .bind(&r.name)
    .bind(&r.address)
    .fetch_one(&s.db)
    .await?;
    Ok(success(record))
}

async fn delete_me(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    sqlx::query("DELETE FROM users WHERE id = $1").bind(user.id).execute(&s.db).await?;
    tracing::info!("user deleted own account: {}", user.id);
    Ok(success_message("account deleted"))
}

async fn ban_user(
    State(s): State<AppState>,
    admin: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    admin.require(&[Role::Admin])?;
    if id == admin.id {
        return Err(ApiError::bad_request("cannot ban yourself"));
    }
    set_banned(&s, id, true).await?;
    tracing::info!("user banned: {id}");
    Ok(success_message("user banned"))
}

async fn unban_user(
    State(s): State<AppState>,
    admin: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    admin.require(&[Role::Admin])?;
    set_banned(&s, id, false).await?;
    tracing::info!("user unbanned: {id}");
    Ok(success_message("user unbanned"))
}

async fn list_users(
    State(s): State<AppState>,
    admin: AuthUser,
    Query(p): Query<Pagination>,
) -> ApiResult<Json<serde_json::Value>> {
    admin.require(&[Role::Admin])?;
    let users = sqlx::query_as::<_, User>(
        "SELECT * FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(p.limit())
    .bind(p.offset())
    .fetch_all(&s.db)
    .await?;
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users").fetch_one(&s.db).await?;
    Ok(success(Paginated { data: users, total: total.0, page: p.page() }))
}

async fn fetch_by_email(s: &AppState, email: &str) -> ApiResult<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = lower($1)")
        .bind(email)
        .fetch_optional(&s.db)
        .await?
        .ok_or_else(|| ApiError::not_found("no such user"))
}

async fn set_banned(s: &AppState, id: Uuid, banned: bool) -> ApiResult<()> {
    let result = sqlx::query("UPDATE users SET banned = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(banned)
        .execute(&s.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("no such user"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_validation() {
        let ok = RegisterRequest {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password: "longenough".into(),
            role: None,
            address: None,
        };
        assert!(ok.validate().is_ok());

        let bad_email = RegisterRequest { email: "not-an-email".into(), ..ok_clone(&ok) };
        assert!(bad_email.validate().is_err());

        let short_password = RegisterRequest { password: "short".into(), ..ok_clone(&ok) };
        assert!(short_password.validate().is_err());
    }

    fn ok_clone(r: &RegisterRequest) -> RegisterRequest {
        RegisterRequest {
            name: r.name.clone(),
            email: r.email.clone(),
            password: r.password.clone(),
            role: r.role.clone(),
            address: r.address.clone(),
        }
    }

    #[test]
    fn reset_request_requires_strong_password() {
        let r = ResetPasswordRequest {
            email: "ada@example.com".into(),
            code: "123456".into(),
            new_password: "short".into(),
        };
        assert!(r.validate().is_err());
    }

    #[test]
    fn code_is_six_digits() {
        for _ in 0..32 {
            let code = six_digit_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
