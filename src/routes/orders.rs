//! Order routes
//!
//! The checkout pipeline plus status transitions and scoped listings.
//!
//! Checkout never reads-then-writes stock: availability is enforced by an
//! atomic conditional decrement. The sequence is reserve (stock + coupon
//! usage), dispatch payment, then persist the order snapshot; a gateway
//! failure releases the reservation so no order means no side effects.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::{success, success_message, Paginated, Pagination};
use crate::auth::{AuthUser, Role};
use crate::domain::coupon as coupon_rules;
use crate::domain::events::{self, DomainEvent};
use crate::domain::order::{OrderStatus, PaymentMethod, PaymentStatus};
use crate::domain::pricing::{
    compute_totals, merge_lines, resolve_shipping_address, LineSource, OrderLine,
};
use crate::domain::value_objects::{Discount, DiscountKind};
use crate::error::{ApiError, ApiResult};
use crate::models::{Cart, CartItem, Coupon, Order, OrderItem, Product};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/status", put(update_status))
}

#[derive(Debug, Deserialize)]
struct OrderItemRequest {
    product_id: Uuid,
    quantity: i32,
}

#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    /// Direct items. When absent the buyer's cart is checked out,
    /// optionally scoped to `product_id`.
    items: Option<Vec<OrderItemRequest>>,
    product_id: Option<Uuid>,
    payment_method: String,
    coupon_code: Option<String>,
    shipping_address: Option<String>,
    payment_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct OrderView {
    #[serde(flatten)]
    order: Order,
    items: Vec<OrderItem>,
}

async fn create_order(
    State(s): State<AppState>,
    user: AuthUser,
    Json(r): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    user.require(&[Role::Buyer])?;
    let method = PaymentMethod::parse(&r.payment_method)?;
    if let Some(items) = &r.items {
        if items.iter().any(|item| item.quantity < 1) {
            return Err(ApiError::bad_request("quantity must be at least 1"));
        }
    }

    let buyer: (String, Option<String>) =
        sqlx::query_as("SELECT email, address FROM users WHERE id = $1")
            .bind(user.id)
            .fetch_one(&s.db)
            .await?;
    let cart = sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE buyer_id = $1")
        .bind(user.id)
        .fetch_optional(&s.db)
        .await?;

    // Gather (product, quantity, from_cart) requests from the two sources.
    // Direct mode still consumes cart lines for products it names, so a
    // "buy now" of something already carted merges instead of duplicating.
    let mut requested: Vec<(Uuid, i32, bool)> = Vec::new();
    let cart_lines: Vec<CartItem> = match &cart {
        Some(cart) => {
            sqlx::query_as("SELECT * FROM cart_items WHERE cart_id = $1 ORDER BY created_at")
                .bind(cart.id)
                .fetch_all(&s.db)
                .await?
        }
        None => Vec::new(),
    };
    match &r.items {
        Some(items) => {
            if items.is_empty() {
                return Err(ApiError::bad_request("no items to order"));
            }
            for item in items {
                requested.push((item.product_id, item.quantity, false));
            }
            for line in &cart_lines {
                if items.iter().any(|item| item.product_id == line.product_id) {
                    requested.push((line.product_id, line.quantity, true));
                }
            }
        }
        None => {
            let mut lines = cart_lines.clone();
            if let Some(scope) = r.product_id {
                lines.retain(|line| line.product_id == scope);
            }
            if lines.is_empty() {
                return Err(ApiError::bad_request("cart is empty"));
            }
            for line in lines {
                requested.push((line.product_id, line.quantity, true));
            }
        }
    }

    let mut ids: Vec<Uuid> = requested.iter().map(|(id, _, _)| *id).collect();
    ids.sort_unstable();
    ids.dedup();
    let products: Vec<Product> =
        sqlx::query_as("SELECT * FROM products WHERE id = ANY($1) AND deleted = FALSE")
            .bind(&ids)
            .fetch_all(&s.db)
            .await?;
    let by_id: HashMap<Uuid, &Product> = products.iter().map(|p| (p.id, p)).collect();

    let mut sources = Vec::with_capacity(requested.len());
    for (product_id, quantity, from_cart) in &requested {
        let product = by_id
            .get(product_id)
            .ok_or_else(|| ApiError::not_found("no such product"))?;
        sources.push(LineSource {
            product_id: *product_id,
            seller_id: product.seller_id,
            product_name: product.name.clone(),
            quantity: *quantity,
            unit_price: product.price,
            discount_per_unit: product_discount_per_unit(product)?,
            from_cart: *from_cart,
        });
    }
    let lines = merge_lines(sources);
    if lines.is_empty() {
        return Err(ApiError::bad_request("no items to order"));
    }

    // Pre-check against live stock for an early, named error; the
    // reservation below is the authoritative check.
    for line in &lines {
        let product = by_id[&line.product_id];
        if line.quantity > product.stock {
            return Err(ApiError::bad_request(format!(
                "only {} in stock for {}",
                product.stock, line.product_name
            )));
        }
    }

    let shipping_address = resolve_shipping_address(
        r.shipping_address.as_deref(),
        cart.as_ref().and_then(|c| c.shipping_address.as_deref()),
        buyer.1.as_deref(),
    )
    .ok_or_else(|| ApiError::bad_request("no shipping address available"))?;

    let subtotal: Decimal = lines.iter().map(OrderLine::base_subtotal).sum();

    // A coupon that fails any check is dropped, not an error: checkout is
    // never blocked by a bad code.
    let mut coupon: Option<(Coupon, Decimal)> = None;
    if let Some(code) = &r.coupon_code {
        let code = code.trim().to_uppercase();
        let found = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE code = $1")
            .bind(&code)
            .fetch_optional(&s.db)
            .await?;
        match found {
            None => tracing::warn!("coupon {code} not found, ignoring"),
            Some(record) => {
                let line_products: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
                let line_categories: Vec<String> = lines
                    .iter()
                    .map(|l| by_id[&l.product_id].category.clone())
                    .collect();
                match coupon_rules::check_eligibility(
                    &record,
                    subtotal,
                    &line_products,
                    &line_categories,
                    Utc::now(),
                ) {
                    Ok(()) => {
                        let amount = coupon_rules::discount_amount(&record, subtotal)?;
                        coupon = Some((record, amount));
                    }
                    Err(reason) => {
                        tracing::warn!("coupon {code} ignored: {}", reason.as_str());
                    }
                }
            }
        }
    }

    // Reserve: conditional stock decrements plus a conditional coupon
    // usage increment, one transaction.
    let mut tx = s.db.begin().await?;
    for line in &lines {
        let reserved = sqlx::query(
            "UPDATE products SET stock = stock - $2, updated_at = NOW()
             WHERE id = $1 AND stock >= $2 AND deleted = FALSE",
        )
        .bind(line.product_id)
        .bind(line.quantity)
        .execute(&mut *tx)
        .await?;
        if reserved.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(ApiError::bad_request(format!(
                "insufficient stock for {}",
                line.product_name
            )));
        }
    }
    let mut coupon_lost = false;
    if let Some((record, _)) = &coupon {
        let bumped = sqlx::query(
            "UPDATE coupons SET usage_count = usage_count + 1, updated_at = NOW()
             WHERE id = $1 AND status = 'active'
             AND (usage_limit IS NULL OR usage_count < usage_limit)",
        )
        .bind(record.id)
        .execute(&mut *tx)
        .await?;
        if bumped.rows_affected() == 0 {
            tracing::warn!("coupon {} exhausted concurrently, ignoring", record.code);
            coupon_lost = true;
        }
    }
    tx.commit().await?;
    if coupon_lost {
        coupon = None;
    }

    let coupon_discount = coupon.as_ref().map_or(Decimal::ZERO, |(_, amount)| *amount);
    let totals = compute_totals(&lines, coupon_discount);

    let receipt = match s
        .payments
        .charge(method, totals.final_price, r.payment_token.as_deref())
        .await
    {
        Ok(receipt) => receipt,
        Err(err) => {
            release_reservation(&s, &lines, coupon.as_ref().map(|(record, _)| record)).await;
            return Err(err);
        }
    };
    let payment_status = if receipt.paid { PaymentStatus::Paid } else { PaymentStatus::Unpaid };

    let order_number = format!("ORD-{:08}", rand::random::<u32>() % 100_000_000);
    let mut tx = s.db.begin().await?;
    let order = sqlx::query_as::<_, Order>(
        "INSERT INTO orders (id, order_number, buyer_id, shipping_address,
            total_before_discount, coupon_code, coupon_discount, product_discount,
            final_price, payment_method, payment_status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&order_number)
    .bind(user.id)
    .bind(&shipping_address)
    .bind(totals.total_before_discount)
    .bind(coupon.as_ref().map(|(record, _)| record.code.clone()))
    .bind(totals.coupon_discount)
    .bind(totals.product_discount)
    .bind(totals.final_price)
    .bind(method.as_str())
    .bind(payment_status.as_str())
    .fetch_one(&mut *tx)
    .await?;

    let mut items = Vec::with_capacity(lines.len());
    for line in &lines {
        let item = sqlx::query_as::<_, OrderItem>(
            "INSERT INTO order_items (id, order_id, seller_id, product_id, product_name,
                quantity, unit_price, discount_per_unit)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(order.id)
        .bind(line.seller_id)
        .bind(line.product_id)
        .bind(&line.product_name)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.discount_per_unit)
        .fetch_one(&mut *tx)
        .await?;
        items.push(item);
    }

    // Consume the cart-sourced share of each line.
    if let Some(cart) = &cart {
        for line in lines.iter().filter(|line| line.cart_quantity > 0) {
            sqlx::query(
                "UPDATE cart_items SET quantity = quantity - $3
                 WHERE cart_id = $1 AND product_id = $2",
            )
            .bind(cart.id)
            .bind(line.product_id)
            .bind(line.cart_quantity)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "DELETE FROM cart_items WHERE cart_id = $1 AND product_id = $2 AND quantity <= 0",
            )
            .bind(cart.id)
            .bind(line.product_id)
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;

    tracing::info!(
        "order placed: {} buyer={} total={} method={}",
        order.order_number,
        user.id,
        order.final_price,
        method.as_str()
    );
    events::publish(
        &s.nats,
        &DomainEvent::OrderPlaced {
            order_id: order.id,
            buyer_id: user.id,
            final_price: order.final_price,
            payment_method: method.as_str().to_string(),
        },
    )
    .await;
    s.mailer.send(
        &buyer.0,
        "Order confirmation",
        format!("Your order {} for {} has been placed.", order.order_number, order.final_price),
        format!(
            "<p>Your order <b>{}</b> for <b>{}</b> has been placed.</p>",
            order.order_number, order.final_price
        ),
    );

    Ok((StatusCode::CREATED, success(OrderView { order, items })))
}

fn product_discount_per_unit(product: &Product) -> ApiResult<Decimal> {
    match (&product.discount_kind, product.discount_value) {
        (Some(kind), Some(value)) => {
            Ok(Discount::new(DiscountKind::parse(kind)?, value)?.per_unit(product.price))
        }
        _ => Ok(Decimal::ZERO),
    }
}

/// Compensate a reservation after a failed payment dispatch. Best-effort:
/// a failure here is logged for reconciliation, the checkout error wins.
async fn release_reservation(s: &AppState, lines: &[OrderLine], coupon: Option<&Coupon>) {
    for line in lines {
        let restored = sqlx::query(
            "UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(line.product_id)
        .bind(line.quantity)
        .execute(&s.db)
        .await;
        if let Err(err) = restored {
            tracing::error!("failed to restore stock for {}: {err}", line.product_id);
        }
    }
    if let Some(record) = coupon {
        let restored = sqlx::query(
            "UPDATE coupons SET usage_count = GREATEST(usage_count - 1, 0), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(record.id)
        .execute(&s.db)
        .await;
        if let Err(err) = restored {
            tracing::error!("failed to restore coupon usage for {}: {err}", record.code);
        }
    }
}

async fn cancel_order(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Buyer])?;
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 AND buyer_id = $2")
        .bind(id)
        .bind(user.id)
        .fetch_optional(&s.db)
        .await?
        .ok_or_else(|| ApiError::not_found("no such order"))?;

    OrderStatus::parse(&order.status)?.transition(OrderStatus::Cancelled)?;

    let mut tx = s.db.begin().await?;
    let cancelled = sqlx::query(
        "UPDATE orders SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    if cancelled.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(ApiError::bad_request("order is no longer pending"));
    }
    // Return reserved inventory and coupon usage.
    sqlx::query(
        "UPDATE products p SET stock = p.stock + oi.quantity, updated_at = NOW()
         FROM order_items oi WHERE oi.order_id = $1 AND p.id = oi.product_id",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    if let Some(code) = &order.coupon_code {
        sqlx::query(
            "UPDATE coupons SET usage_count = GREATEST(usage_count - 1, 0), updated_at = NOW()
             WHERE code = $1",
        )
        .bind(code)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!("order cancelled: {} by buyer {}", order.order_number, user.id);
    events::publish(&s.nats, &DomainEvent::OrderCancelled { order_id: id }).await;
    Ok(success_message("order cancelled"))
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    status: String,
}

async fn update_status(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateStatusRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Seller, Role::Admin])?;
    let target = OrderStatus::parse(&r.status)?;
    if target == OrderStatus::Cancelled {
        return Err(ApiError::bad_request("only the buyer may cancel an order"));
    }

    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(&s.db)
        .await?
        .ok_or_else(|| ApiError::not_found("no such order"))?;
    if !user.is_admin() {
        require_seller_in_order(&s, id, user.id).await?;
    }

    let current = OrderStatus::parse(&order.status)?;
    current.transition(target)?;

    let updated = sqlx::query(
        "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 AND status = $3",
    )
    .bind(id)
    .bind(target.as_str())
    .bind(current.as_str())
    .execute(&s.db)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::conflict("order status changed concurrently"));
    }

    tracing::info!("order {} moved to {}", order.order_number, target.as_str());
    events::publish(
        &s.nats,
        &DomainEvent::OrderStatusChanged { order_id: id, status: target.as_str().to_string() },
    )
    .await;
    Ok(success_message("order status updated"))
}

async fn list_orders(
    State(s): State<AppState>,
    user: AuthUser,
    Query(p): Query<Pagination>,
) -> ApiResult<Json<serde_json::Value>> {
    let (orders, total): (Vec<Order>, i64) = match user.role {
        Role::Admin => {
            let orders = sqlx::query_as(
                "SELECT * FROM orders ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            )
            .bind(p.limit())
            .bind(p.offset())
            .fetch_all(&s.db)
            .await?;
            let total: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM orders").fetch_one(&s.db).await?;
            (orders, total.0)
        }
        Role::Buyer => {
            let orders = sqlx::query_as(
                "SELECT * FROM orders WHERE buyer_id = $1
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(user.id)
            .bind(p.limit())
            .bind(p.offset())
            .fetch_all(&s.db)
            .await?;
            let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE buyer_id = $1")
                .bind(user.id)
                .fetch_one(&s.db)
                .await?;
            (orders, total.0)
        }
        Role::Seller => {
            let orders = sqlx::query_as(
                "SELECT DISTINCT o.* FROM orders o
                 JOIN order_items oi ON oi.order_id = o.id
                 WHERE oi.seller_id = $1 ORDER BY o.created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(user.id)
            .bind(p.limit())
            .bind(p.offset())
            .fetch_all(&s.db)
            .await?;
            let total: (i64,) = sqlx::query_as(
                "SELECT COUNT(DISTINCT oi.order_id) FROM order_items oi WHERE oi.seller_id = $1",
            )
            .bind(user.id)
            .fetch_one(&s.db)
            .await?;
            (orders, total.0)
        }
    };
    Ok(success(Paginated { data: orders, total, page: p.page() }))
}

async fn get_order(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(&s.db)
        .await?
        .ok_or_else(|| ApiError::not_found("no such order"))?;

    let allowed = match user.role {
        Role::Admin => true,
        Role::Buyer => order.buyer_id == user.id,
        Role::Seller => require_seller_in_order(&s, id, user.id).await.is_ok(),
    };
    if !allowed {
        return Err(ApiError::forbidden("not your order"));
    }

    let items = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = $1")
        .bind(id)
        .fetch_all(&s.db)
        .await?;
    Ok(success(OrderView { order, items }))
}

async fn require_seller_in_order(s: &AppState, order_id: Uuid, seller_id: Uuid) -> ApiResult<()> {
    let involved: (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM order_items WHERE order_id = $1 AND seller_id = $2)",
    )
    .bind(order_id)
    .bind(seller_id)
    .fetch_one(&s.db)
    .await?;
    if involved.0 {
        Ok(())
    } else {
        Err(ApiError::forbidden("no items of yours in this order"))
    }
}
