//! Coupon routes
//!
//! Admins issue marketplace-wide coupons; sellers issue coupons scoped to
//! their own products or categories. `code`, owner and `usage_count` are
//! immutable after creation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use super::{success, success_message};
use crate::auth::{AuthUser, Role};
use crate::domain::value_objects::{Discount, DiscountKind};
use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::Coupon;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_coupons).post(create_coupon))
        .route("/code/:code", get(get_by_code))
        .route("/:id", put(update_coupon).delete(delete_coupon))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateCouponRequest {
    #[validate(length(min = 3, max = 32))]
    code: String,
    kind: String,
    value: Decimal,
    min_order_value: Option<Decimal>,
    usage_limit: Option<i32>,
    expires_at: Option<DateTime<Utc>>,
    seller_id: Option<Uuid>,
    product_specific: Option<bool>,
    product_ids: Option<Vec<Uuid>>,
    category_specific: Option<bool>,
    categories: Option<Vec<String>>,
}

struct CouponScope {
    product_specific: bool,
    product_ids: Vec<Uuid>,
    category_specific: bool,
    categories: Vec<String>,
}

fn check_scope(
    product_specific: Option<bool>,
    product_ids: Option<Vec<Uuid>>,
    category_specific: Option<bool>,
    categories: Option<Vec<String>>,
) -> ApiResult<CouponScope> {
    let scope = CouponScope {
        product_specific: product_specific.unwrap_or(false),
        product_ids: product_ids.unwrap_or_default(),
        category_specific: category_specific.unwrap_or(false),
        categories: categories.unwrap_or_default(),
    };
    if scope.product_specific && scope.product_ids.is_empty() {
        return Err(ApiError::bad_request("product_specific requires product_ids"));
    }
    if scope.category_specific && scope.categories.is_empty() {
        return Err(ApiError::bad_request("category_specific requires categories"));
    }
    Ok(scope)
}

/// Sellers may only scope coupons to products and categories they own.
async fn check_seller_scope(s: &AppState, seller_id: Uuid, scope: &CouponScope) -> ApiResult<()> {
    if !scope.product_ids.is_empty() {
        let owned: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM products WHERE id = ANY($1) AND seller_id = $2",
        )
        .bind(&scope.product_ids)
        .bind(seller_id)
        .fetch_one(&s.db)
        .await?;
        if owned.0 as usize != scope.product_ids.len() {
            return Err(ApiError::forbidden("coupon references products you do not own"));
        }
    }
    if !scope.categories.is_empty() {
        let known: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT category FROM products WHERE seller_id = $1",
        )
        .bind(seller_id)
        .fetch_all(&s.db)
        .await?;
        let missing = scope
            .categories
            .iter()
            .any(|category| !known.iter().any(|(owned, )| owned == category));
        if missing {
            return Err(ApiError::forbidden("coupon references categories you do not sell in"));
        }
    }
    Ok(())
}

async fn create_coupon(
    State(s): State<AppState>,
    user: AuthUser,
    Json(r): Json<CreateCouponRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    user.require(&[Role::Seller, Role::Admin])?;
    r.validate()?;
    Discount::new(DiscountKind::parse(&r.kind)?, r.value)?;
    if r.usage_limit.is_some_and(|limit| limit <= 0) {
        return Err(ApiError::bad_request("usage_limit must be positive"));
    }
    if r.min_order_value.is_some_and(|minimum| minimum < Decimal::ZERO) {
        return Err(ApiError::bad_request("min_order_value must not be negative"));
    }

    let scope = check_scope(r.product_specific, r.product_ids, r.category_specific, r.categories)?;
    let seller_id = if user.is_admin() {
        r.seller_id
    } else {
        check_seller_scope(&s, user.id, &scope).await?;
        Some(user.id)
    };

    let coupon = sqlx::query_as::<_, Coupon>(
        "INSERT INTO coupons (id, code, kind, value, min_order_value, usage_limit, expires_at,
            seller_id, product_specific, product_ids, category_specific, categories)
         VALUES ($1, upper($2), $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(r.code.trim())
    .bind(DiscountKind::parse(&r.kind)?.as_str())
    .bind(r.value)
    .bind(r.min_order_value)
    .bind(r.usage_limit)
    .bind(r.expires_at)
    .bind(seller_id)
    .bind(scope.product_specific)
    .bind(&scope.product_ids)
    .bind(scope.category_specific)
    .bind(&scope.categories)
    .fetch_one(&s.db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::bad_request("coupon code already exists")
        } else {
            e.into()
        }
    })?;
    tracing::info!("coupon created: {} by {}", coupon.code, user.id);
    Ok((StatusCode::CREATED, success(coupon)))
}

async fn get_by_code(
    State(s): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Seller, Role::Admin])?;
    let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE code = upper($1)")
        .bind(code.trim())
        .fetch_optional(&s.db)
        .await?
        .ok_or_else(|| ApiError::not_found("no such coupon"))?;
    if !user.is_admin() && coupon.seller_id != Some(user.id) {
        return Err(ApiError::not_found("no such coupon"));
    }
    Ok(success(coupon))
}

async fn list_coupons(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Seller, Role::Admin])?;
    if user.is_admin() {
        let admin_issued = sqlx::query_as::<_, Coupon>(
            "SELECT * FROM coupons WHERE seller_id IS NULL ORDER BY created_at DESC",
        )
        .fetch_all(&s.db)
        .await?;
        let seller_issued = sqlx::query_as::<_, Coupon>(
            "SELECT * FROM coupons WHERE seller_id IS NOT NULL ORDER BY created_at DESC",
        )
        .fetch_all(&s.db)
        .await?;
        return Ok(success(json!({
            "admin_coupons": admin_issued,
            "seller_coupons": seller_issued,
        })));
    }
    let own = sqlx::query_as::<_, Coupon>(
        "SELECT * FROM coupons WHERE seller_id = $1 ORDER BY created_at DESC",
    )
    .bind(user.id)
    .fetch_all(&s.db)
    .await?;
    Ok(success(own))
}

#[derive(Debug, Deserialize)]
struct UpdateCouponRequest {
    kind: Option<String>,
    value: Option<Decimal>,
    min_order_value: Option<Decimal>,
    usage_limit: Option<i32>,
    expires_at: Option<DateTime<Utc>>,
    status: Option<String>,
    product_specific: Option<bool>,
    product_ids: Option<Vec<Uuid>>,
    category_specific: Option<bool>,
    categories: Option<Vec<String>>,
}

async fn update_coupon(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateCouponRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Seller, Role::Admin])?;
    let coupon = fetch_owned(&s, id, &user).await?;

    let kind = match &r.kind {
        Some(raw) => DiscountKind::parse(raw)?.as_str().to_string(),
        None => coupon.kind.clone(),
    };
    let value = r.value.unwrap_or(coupon.value);
    Discount::new(DiscountKind::parse(&kind)?, value)?;
    if r.usage_limit.is_some_and(|limit| limit <= 0) {
        return Err(ApiError::bad_request("usage_limit must be positive"));
    }
    let status = match r.status.as_deref() {
        None => coupon.status.clone(),
        Some(raw @ ("active" | "inactive")) => raw.to_string(),
        Some(other) => {
            return Err(ApiError::bad_request(format!("unknown coupon status: {other}")))
        }
    };

    let scope = check_scope(
        Some(r.product_specific.unwrap_or(coupon.product_specific)),
        Some(r.product_ids.unwrap_or(coupon.product_ids)),
        Some(r.category_specific.unwrap_or(coupon.category_specific)),
        Some(r.categories.unwrap_or(coupon.categories)),
    )?;
    if !user.is_admin() {
        check_seller_scope(&s, user.id, &scope).await?;
    }

    let updated = sqlx::query_as::<_, Coupon>(
        "UPDATE coupons SET kind = $2, value = $3, min_order_value = $4, usage_limit = $5,
            expires_at = $6, status = $7, product_specific = $8, product_ids = $9,
            category_specific = $10, categories = $11, updated_at = NOW()
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&kind)
    .bind(value)
    .bind(r.min_order_value.or(coupon.min_order_value))
    .bind(r.usage_limit.or(coupon.usage_limit))
    .bind(r.expires_at.or(coupon.expires_at))
    .bind(&status)
    .bind(scope.product_specific)
    .bind(&scope.product_ids)
    .bind(scope.category_specific)
    .bind(&scope.categories)
    .fetch_one(&s.db)
    .await?;
    Ok(success(updated))
}

async fn delete_coupon(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Seller, Role::Admin])?;
    fetch_owned(&s, id, &user).await?;
    sqlx::query("DELETE FROM coupons WHERE id = $1").bind(id).execute(&s.db).await?;
    Ok(success_message("coupon deleted"))
}

async fn fetch_owned(s: &AppState, id: Uuid, user: &AuthUser) -> ApiResult<Coupon> {
    let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = $1")
        .bind(id)
        .fetch_optional(&s.db)
        .await?
        .ok_or_else(|| ApiError::not_found("no such coupon"))?;
    if !user.is_admin() && coupon.seller_id != Some(user.id) {
        return Err(ApiError::not_found("no such coupon"));
    }
    Ok(coupon)
}
