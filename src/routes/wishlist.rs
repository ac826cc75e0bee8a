//! Wishlist routes
//!
//! One wishlist per buyer, created on first add; duplicate products are
//! rejected.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use super::{success, success_message};
use crate::auth::{AuthUser, Role};
use crate::error::{ApiError, ApiResult};
use crate::models::Product;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_wishlist))
        .route("/:product_id", post(add_to_wishlist).delete(remove_from_wishlist))
}

async fn get_wishlist(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Buyer])?;
    let products = sqlx::query_as::<_, Product>(
        "SELECT p.* FROM wishlist_items wi
         JOIN wishlists w ON w.id = wi.wishlist_id AND w.buyer_id = $1
         JOIN products p ON p.id = wi.product_id AND p.deleted = FALSE
         ORDER BY wi.created_at DESC",
    )
    .bind(user.id)
    .fetch_all(&s.db)
    .await?;
    Ok(success(products))
}

async fn add_to_wishlist(
    State(s): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    user.require(&[Role::Buyer])?;
    let product = super::products::fetch_product(&s, product_id).await?;
    if product.deleted {
        return Err(ApiError::not_found("no such product"));
    }

    let mut tx = s.db.begin().await?;
    let wishlist_id: (Uuid,) = sqlx::query_as(
        "INSERT INTO wishlists (id, buyer_id) VALUES ($1, $2)
         ON CONFLICT (buyer_id) DO UPDATE SET buyer_id = wishlists.buyer_id
         RETURNING id",
    )
    .bind(Uuid::now_v7())
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    let inserted = sqlx::query(
        "INSERT INTO wishlist_items (id, wishlist_id, product_id) VALUES ($1, $2, $3)
         ON CONFLICT (wishlist_id, product_id) DO NOTHING",
    )
    .bind(Uuid::now_v7())
    .bind(wishlist_id.0)
    .bind(product_id)
    .execute(&mut *tx)
    .await?;
    if inserted.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(ApiError::bad_request("product is already in the wishlist"));
    }
    tx.commit().await?;
    Ok((StatusCode::CREATED, success_message("added to wishlist")))
}

async fn remove_from_wishlist(
    State(s): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Buyer])?;
    let removed = sqlx::query(
        "DELETE FROM wishlist_items WHERE product_id = $1
         AND wishlist_id = (SELECT id FROM wishlists WHERE buyer_id = $2)",
    )
    .bind(product_id)
    .bind(user.id)
    .execute(&s.db)
    .await?;
    if removed.rows_affected() == 0 {
        return Err(ApiError::not_found("product is not in the wishlist"));
    }
    Ok(success_message("removed from wishlist"))
}
