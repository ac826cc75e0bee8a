//! Revenue reporting
//!
//! Read-only aggregations over paid orders. Per-seller figures come from
//! the order-item snapshots, so later catalog price changes do not bend
//! historical revenue.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::success;
use crate::auth::{AuthUser, Role};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/total", get(total_revenue))
        .route("/range", get(revenue_in_range))
        .route("/sellers", get(revenue_by_seller))
        .route("/mine", get(my_revenue))
        .route("/:bucket", get(bucketed_revenue))
}

async fn total_revenue(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;
    let row: (Decimal, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(final_price), 0), COUNT(*) FROM orders WHERE payment_status = 'paid'",
    )
    .fetch_one(&s.db)
    .await?;
    Ok(success(json!({ "revenue": row.0, "orders": row.1 })))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct RevenueBucket {
    bucket: DateTime<Utc>,
    revenue: Decimal,
    orders: i64,
}

async fn bucketed_revenue(
    State(s): State<AppState>,
    user: AuthUser,
    Path(bucket): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;
    // Calendar-aligned buckets via date_trunc.
    let unit = match bucket.as_str() {
        "daily" => "day",
        "weekly" => "week",
        "monthly" => "month",
        "yearly" => "year",
        other => return Err(ApiError::bad_request(format!("unknown revenue bucket: {other}"))),
    };
    let rows = sqlx::query_as::<_, RevenueBucket>(&format!(
        "SELECT date_trunc('{unit}', created_at) AS bucket,
                COALESCE(SUM(final_price), 0) AS revenue, COUNT(*) AS orders
         FROM orders WHERE payment_status = 'paid'
         GROUP BY bucket ORDER BY bucket DESC"
    ))
    .fetch_all(&s.db)
    .await?;
    Ok(success(rows))
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

async fn revenue_in_range(
    State(s): State<AppState>,
    user: AuthUser,
    Query(p): Query<RangeParams>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;
    if p.from > p.to {
        return Err(ApiError::bad_request("from must not be after to"));
    }
    let row: (Decimal, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(final_price), 0), COUNT(*) FROM orders
         WHERE payment_status = 'paid' AND created_at >= $1 AND created_at <= $2",
    )
    .bind(p.from)
    .bind(p.to)
    .fetch_one(&s.db)
    .await?;
    Ok(success(json!({ "from": p.from, "to": p.to, "revenue": row.0, "orders": row.1 })))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct SellerRevenue {
    seller_id: Uuid,
    seller_name: String,
    revenue: Decimal,
    orders: i64,
}

async fn revenue_by_seller(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;
    let rows = sqlx::query_as::<_, SellerRevenue>(
        "SELECT oi.seller_id, u.name AS seller_name,
                COALESCE(SUM((oi.unit_price - oi.discount_per_unit) * oi.quantity), 0) AS revenue,
                COUNT(DISTINCT oi.order_id) AS orders
         FROM order_items oi
         JOIN orders o ON o.id = oi.order_id AND o.payment_status = 'paid'
         JOIN users u ON u.id = oi.seller_id
         GROUP BY oi.seller_id, u.name ORDER BY revenue DESC",
    )
    .fetch_all(&s.db)
    .await?;
    Ok(success(rows))
}

async fn my_revenue(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Seller])?;
    let row: (Decimal, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM((oi.unit_price - oi.discount_per_unit) * oi.quantity), 0),
                COUNT(DISTINCT oi.order_id)
         FROM order_items oi
         JOIN orders o ON o.id = oi.order_id AND o.payment_status = 'paid'
         WHERE oi.seller_id = $1",
    )
    .bind(user.id)
    .fetch_one(&s.db)
    .await?;
    Ok(success(json!({ "revenue": row.0, "orders": row.1 })))
}
