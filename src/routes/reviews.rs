//! Review routes
//!
//! One review per user per product. The product's aggregate rating is
//! recomputed from all of its reviews after every write.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{success, success_message, Paginated, Pagination};
use crate::auth::{AuthUser, Role};
use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::Review;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_review))
        .route("/:id", put(update_review).delete(delete_review))
        .route("/product/:product_id", get(list_for_product))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateReviewRequest {
    product_id: Uuid,
    #[validate(range(min = 1, max = 5))]
    rating: i32,
    #[validate(length(max = 2000))]
    comment: Option<String>,
}

async fn create_review(
    State(s): State<AppState>,
    user: AuthUser,
    Json(r): Json<CreateReviewRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    user.require(&[Role::Buyer])?;
    r.validate()?;
    let product = super::products::fetch_product(&s, r.product_id).await?;
    if product.deleted {
        return Err(ApiError::not_found("no such product"));
    }

    let review = sqlx::query_as::<_, Review>(
        "INSERT INTO reviews (id, product_id, user_id, rating, comment)
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(r.product_id)
    .bind(user.id)
    .bind(r.rating)
    .bind(&r.comment)
    .fetch_one(&s.db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::bad_request("you have already reviewed this product")
        } else {
            e.into()
        }
    })?;

    recompute_product_rating(&s, r.product_id).await?;
    Ok((StatusCode::CREATED, success(review)))
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateReviewRequest {
    #[validate(range(min = 1, max = 5))]
    rating: Option<i32>,
    #[validate(length(max = 2000))]
    comment: Option<String>,
}

async fn update_review(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateReviewRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    r.validate()?;
    let review = fetch_review(&s, id).await?;
    if review.user_id != user.id {
        return Err(ApiError::forbidden("not your review"));
    }

    let updated = sqlx::query_as::<_, Review>(
        "UPDATE reviews SET rating = COALESCE($2, rating), comment = COALESCE($3, comment),
            updated_at = NOW()
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(r.rating)
    .bind(&r.comment)
    .fetch_one(&s.db)
    .await?;

    recompute_product_rating(&s, review.product_id).await?;
    Ok(success(updated))
}

async fn delete_review(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let review = fetch_review(&s, id).await?;
    if review.user_id != user.id && !user.is_admin() {
        return Err(ApiError::forbidden("not your review"));
    }

    sqlx::query("DELETE FROM reviews WHERE id = $1").bind(id).execute(&s.db).await?;
    recompute_product_rating(&s, review.product_id).await?;
    Ok(success_message("review deleted"))
}

async fn list_for_product(
    State(s): State<AppState>,
    Path(product_id): Path<Uuid>,
    Query(p): Query<Pagination>,
) -> ApiResult<Json<serde_json::Value>> {
    let reviews = sqlx::query_as::<_, Review>(
        "SELECT * FROM reviews WHERE product_id = $1
         ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(product_id)
    .bind(p.limit())
    .bind(p.offset())
    .fetch_all(&s.db)
    .await?;
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reviews WHERE product_id = $1")
        .bind(product_id)
        .fetch_one(&s.db)
        .await?;
    Ok(success(Paginated { data: reviews, total: total.0, page: p.page() }))
}

/// Recompute the aggregate from all reviews of the product; zero reviews
/// resets both figures to 0.
async fn recompute_product_rating(s: &AppState, product_id: Uuid) -> ApiResult<()> {
    sqlx::query(
        "UPDATE products p
         SET average_rating = agg.avg_rating, review_count = agg.cnt, updated_at = NOW()
         FROM (SELECT COALESCE(ROUND(AVG(rating), 2), 0) AS avg_rating, COUNT(*)::int AS cnt
               FROM reviews WHERE product_id = $1) agg
         WHERE p.id = $1",
    )
    .bind(product_id)
    .execute(&s.db)
    .await?;
    Ok(())
}

async fn fetch_review(s: &AppState, id: Uuid) -> ApiResult<Review> {
    sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE id = $1")
        .bind(id)
        .fetch_optional(&s.db)
        .await?
        .ok_or_else(|| ApiError::not_found("no such review"))
}
