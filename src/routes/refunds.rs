//! Refund routes
//!
//! Buyer-initiated requests moving through an approval state machine whose
//! status is mirrored onto the parent order.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{success, Paginated, Pagination};
use crate::auth::{AuthUser, Role};
use crate::domain::events::{self, DomainEvent};
use crate::domain::order::PaymentStatus;
use crate::domain::refund::RefundStatus;
use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::{Order, Refund};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_refunds).post(request_refund))
        .route("/:id", get(get_refund))
        .route("/:id/status", put(update_refund_status))
}

#[derive(Debug, Deserialize, Validate)]
struct RequestRefundRequest {
    order_id: Uuid,
    #[validate(length(min = 1, max = 1000))]
    reason: String,
    amount: Option<Decimal>,
}

async fn request_refund(
    State(s): State<AppState>,
    user: AuthUser,
    Json(r): Json<RequestRefundRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    user.require(&[Role::Buyer])?;
    r.validate()?;

    let order = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE id = $1 AND buyer_id = $2",
    )
    .bind(r.order_id)
    .bind(user.id)
    .fetch_optional(&s.db)
    .await?
    .ok_or_else(|| ApiError::not_found("no such order"))?;
    if order.payment_status != PaymentStatus::Paid.as_str() {
        return Err(ApiError::bad_request("only paid orders can be refunded"));
    }
    if order.refund_status.as_deref() == Some("refunded") {
        return Err(ApiError::bad_request("order is already refunded"));
    }

    let amount = match r.amount {
        None => order.final_price,
        Some(amount) if amount <= Decimal::ZERO || amount > order.final_price => {
            return Err(ApiError::bad_request("refund amount must be between 0 and the order total"));
        }
        Some(amount) => amount,
    };

    let mut tx = s.db.begin().await?;
    // The partial unique index rejects a second pending refund per order.
    let refund = sqlx::query_as::<_, Refund>(
        "INSERT INTO refunds (id, order_id, user_id, reason, amount)
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(r.order_id)
    .bind(user.id)
    .bind(&r.reason)
    .bind(amount)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::bad_request("a refund request for this order is already pending")
        } else {
            e.into()
        }
    })?;
    sqlx::query("UPDATE orders SET refund_status = 'pending', updated_at = NOW() WHERE id = $1")
        .bind(r.order_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!("refund requested: order={} amount={}", order.order_number, amount);
    Ok((StatusCode::CREATED, success(refund)))
}

async fn list_refunds(
    State(s): State<AppState>,
    user: AuthUser,
    Query(p): Query<Pagination>,
) -> ApiResult<Json<serde_json::Value>> {
    let (refunds, total): (Vec<Refund>, i64) = match user.role {
        Role::Admin => {
            let refunds = sqlx::query_as(
                "SELECT * FROM refunds ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            )
            .bind(p.limit())
            .bind(p.offset())
            .fetch_all(&s.db)
            .await?;
            let total: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM refunds").fetch_one(&s.db).await?;
            (refunds, total.0)
        }
        Role::Buyer => {
            let refunds = sqlx::query_as(
                "SELECT * FROM refunds WHERE user_id = $1
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(user.id)
            .bind(p.limit())
            .bind(p.offset())
            .fetch_all(&s.db)
            .await?;
            let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM refunds WHERE user_id = $1")
                .bind(user.id)
                .fetch_one(&s.db)
                .await?;
            (refunds, total.0)
        }
        Role::Seller => {
            let refunds = sqlx::query_as(
                "SELECT r.* FROM refunds r WHERE EXISTS(
                    SELECT 1 FROM order_items oi WHERE oi.order_id = r.order_id AND oi.seller_id = $1)
                 ORDER BY r.created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(user.id)
            .bind(p.limit())
            .bind(p.offset())
            .fetch_all(&s.db)
            .await?;
            let total: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM refunds r WHERE EXISTS(
                    SELECT 1 FROM order_items oi WHERE oi.order_id = r.order_id AND oi.seller_id = $1)",
            )
            .bind(user.id)
            .fetch_one(&s.db)
            .await?;
            (refunds, total.0)
        }
    };
    Ok(success(Paginated { data: refunds, total, page: p.page() }))
}

async fn get_refund(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let refund = fetch_refund(&s, id).await?;
    let allowed = match user.role {
        Role::Admin => true,
        Role::Buyer => refund.user_id == user.id,
        Role::Seller => seller_involved(&s, refund.order_id, user.id).await?,
    };
    if !allowed {
        return Err(ApiError::forbidden("not your refund"));
    }
    Ok(success(refund))
}

#[derive(Debug, Deserialize)]
struct UpdateRefundStatusRequest {
    status: String,
}

async fn update_refund_status(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateRefundStatusRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Seller, Role::Admin])?;
    let refund = fetch_refund(&s, id).await?;
    if !user.is_admin() && !seller_involved(&s, refund.order_id, user.id).await? {
        return Err(ApiError::forbidden("no items of yours in this order"));
    }

    let current = RefundStatus::parse(&refund.status)?;
    let target = RefundStatus::parse(&r.status)?;
    current.transition(target)?;

    let mut tx = s.db.begin().await?;
    let updated = sqlx::query_as::<_, Refund>(
        "UPDATE refunds SET status = $2, processed_by = $3, processed_at = NOW(),
            updated_at = NOW()
         WHERE id = $1 AND status = $4 RETURNING *",
    )
    .bind(id)
    .bind(target.as_str())
    .bind(user.id)
    .bind(current.as_str())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::conflict("refund status changed concurrently"))?;

    // Mirror onto the parent order; a completed refund also flips the
    // order's payment status.
    sqlx::query("UPDATE orders SET refund_status = $2, updated_at = NOW() WHERE id = $1")
        .bind(refund.order_id)
        .bind(target.as_str())
        .execute(&mut *tx)
        .await?;
    if target == RefundStatus::Refunded {
        sqlx::query("UPDATE orders SET payment_status = 'refunded', updated_at = NOW() WHERE id = $1")
            .bind(refund.order_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    if target == RefundStatus::Approved {
        let order_number: (String,) =
            sqlx::query_as("SELECT order_number FROM orders WHERE id = $1")
                .bind(refund.order_id)
                .fetch_one(&s.db)
                .await?;
        s.payments.notify_refund(&order_number.0, refund.amount);
    }

    tracing::info!("refund {} moved to {}", refund.id, target.as_str());
    events::publish(
        &s.nats,
        &DomainEvent::RefundResolved {
            refund_id: refund.id,
            order_id: refund.order_id,
            status: target.as_str().to_string(),
        },
    )
    .await;
    Ok(success(updated))
}

async fn fetch_refund(s: &AppState, id: Uuid) -> ApiResult<Refund> {
    sqlx::query_as::<_, Refund>("SELECT * FROM refunds WHERE id = $1")
        .bind(id)
        .fetch_optional(&s.db)
        .await?
        .ok_or_else(|| ApiError::not_found("no such refund"))
}

async fn seller_involved(s: &AppState, order_id: Uuid, seller_id: Uuid) -> ApiResult<bool> {
    let involved: (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM order_items WHERE order_id = $1 AND seller_id = $2)",
    )
    .bind(order_id)
    .bind(seller_id)
    .fetch_one(&s.db)
    .await?;
    Ok(involved.0)
}
