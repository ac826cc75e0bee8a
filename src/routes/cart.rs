//! Cart routes
//!
//! One cart per buyer, created on first add. Line quantities are always
//! checked against live stock before any mutation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{success, success_message};
use crate::auth::{AuthUser, Role};
use crate::domain::value_objects::round2;
use crate::error::{ApiError, ApiResult};
use crate::models::Cart;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_my_cart).post(add_to_cart))
        .route("/:product_id", delete(remove_from_cart))
}

#[derive(Debug, Deserialize, Validate)]
struct AddToCartRequest {
    product_id: Uuid,
    #[validate(range(min = 1))]
    quantity: i32,
}

async fn add_to_cart(
    State(s): State<AppState>,
    user: AuthUser,
    Json(r): Json<AddToCartRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    user.require(&[Role::Buyer])?;
    r.validate()?;

    let product = super::products::fetch_product(&s, r.product_id).await?;
    if product.deleted {
        return Err(ApiError::not_found("no such product"));
    }

    let mut tx = s.db.begin().await?;

    // First add creates the cart, defaulting its shipping address from the
    // buyer profile.
    let cart_id: (Uuid,) = sqlx::query_as(
        "INSERT INTO carts (id, buyer_id, shipping_address)
         VALUES ($1, $2, (SELECT address FROM users WHERE id = $2))
         ON CONFLICT (buyer_id) DO UPDATE SET updated_at = NOW()
         RETURNING id",
    )
    .bind(Uuid::now_v7())
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    let existing: Option<(i32,)> = sqlx::query_as(
        "SELECT quantity FROM cart_items WHERE cart_id = $1 AND product_id = $2",
    )
    .bind(cart_id.0)
    .bind(r.product_id)
    .fetch_optional(&mut *tx)
    .await?;

    let cumulative = existing.map_or(0, |row| row.0) + r.quantity;
    if cumulative > product.stock {
        // Roll back so a rejected add leaves no trace, not even the
        // implicit cart creation.
        tx.rollback().await?;
        return Err(ApiError::bad_request(format!(
            "only {} in stock for {}",
            product.stock, product.name
        )));
    }

    sqlx::query(
        "INSERT INTO cart_items (id, cart_id, product_id, quantity) VALUES ($1, $2, $3, $4)
         ON CONFLICT (cart_id, product_id) DO UPDATE SET quantity = cart_items.quantity + $4",
    )
    .bind(Uuid::now_v7())
    .bind(cart_id.0)
    .bind(r.product_id)
    .bind(r.quantity)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok((StatusCode::CREATED, success_message("added to cart")))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct CartLine {
    product_id: Uuid,
    name: String,
    price: Decimal,
    quantity: i32,
    subtotal: Decimal,
}

#[derive(Debug, Serialize)]
struct CartView {
    cart_id: Uuid,
    shipping_address: Option<String>,
    items: Vec<CartLine>,
    total: Decimal,
}

async fn get_my_cart(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Buyer])?;
    let cart = sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE buyer_id = $1")
        .bind(user.id)
        .fetch_optional(&s.db)
        .await?
        .ok_or_else(|| ApiError::not_found("cart is empty"))?;

    let items = sqlx::query_as::<_, CartLine>(
        "SELECT ci.product_id, p.name, p.price, ci.quantity,
                ROUND(p.price * ci.quantity, 2) AS subtotal
         FROM cart_items ci JOIN products p ON p.id = ci.product_id
         WHERE ci.cart_id = $1 ORDER BY ci.created_at",
    )
    .bind(cart.id)
    .fetch_all(&s.db)
    .await?;
    if items.is_empty() {
        return Err(ApiError::not_found("cart is empty"));
    }

    let total = round2(items.iter().map(|line| line.subtotal).sum());
    Ok(success(CartView {
        cart_id: cart.id,
        shipping_address: cart.shipping_address,
        items,
        total,
    }))
}

async fn remove_from_cart(
    State(s): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Buyer])?;
    let result = sqlx::query(
        "DELETE FROM cart_items WHERE product_id = $1
         AND cart_id = (SELECT id FROM carts WHERE buyer_id = $2)",
    )
    .bind(product_id)
    .bind(user.id)
    .execute(&s.db)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("product is not in the cart"));
    }
    Ok(success_message("removed from cart"))
}
