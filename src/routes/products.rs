//! Catalog routes
//!
//! Public listing and lookup, seller-owned CRUD with soft delete, discount
//! annotation and product Q&A.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use super::{success, success_message, Paginated, Pagination};
use crate::auth::{AuthUser, MaybeAuthUser, Role};
use crate::domain::value_objects::{Discount, DiscountKind};
use crate::error::{ApiError, ApiResult};
use crate::models::{Product, ProductQuestion};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/mine", get(my_products))
        .route("/deleted", get(deleted_products))
        .route("/:id", get(get_product).put(update_product).delete(soft_delete_product))
        .route("/:id/restore", put(restore_product))
        .route("/:id/discount", put(update_discount))
        .route("/:id/questions", get(list_questions).post(ask_question))
        .route("/:id/questions/:qid/answer", put(answer_question))
}

#[derive(Debug, Deserialize)]
struct ListProductsParams {
    page: Option<u32>,
    per_page: Option<u32>,
    name: Option<String>,
    category: Option<String>,
    min_price: Option<Decimal>,
    max_price: Option<Decimal>,
    include_deleted: Option<bool>,
}

async fn list_products(
    State(s): State<AppState>,
    MaybeAuthUser(caller): MaybeAuthUser,
    Query(p): Query<ListProductsParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let pagination = Pagination { page: p.page, per_page: p.per_page };
    let show_deleted = p.include_deleted.unwrap_or(false)
        && caller.as_ref().is_some_and(AuthUser::is_admin);

    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM products WHERE 1 = 1");
    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products WHERE 1 = 1");
    for builder in [&mut query, &mut count] {
        if !show_deleted {
            builder.push(" AND deleted = FALSE");
        }
        if let Some(name) = &p.name {
            builder.push(" AND name ILIKE ").push_bind(format!("%{name}%"));
        }
        if let Some(category) = &p.category {
            builder.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(min) = p.min_price {
            builder.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = p.max_price {
            builder.push(" AND price <= ").push_bind(max);
        }
    }
    query
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(pagination.limit())
        .push(" OFFSET ")
        .push_bind(pagination.offset());

    let products = query.build_query_as::<Product>().fetch_all(&s.db).await?;
    let total: (i64,) = count.build_query_as().fetch_one(&s.db).await?;
    Ok(success(Paginated { data: products, total: total.0, page: pagination.page() }))
}

async fn get_product(
    State(s): State<AppState>,
    MaybeAuthUser(caller): MaybeAuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let product = fetch_product(&s, id).await?;
    if product.deleted {
        let privileged = caller
            .is_some_and(|user| user.is_admin() || user.id == product.seller_id);
        if !privileged {
            return Err(ApiError::not_found("no such product"));
        }
    }
    Ok(success(product))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateProductRequest {
    #[validate(length(min = 1, max = 200))]
    name: String,
    description: Option<String>,
    price: Decimal,
    #[validate(length(min = 1, max = 100))]
    category: String,
    stock: i32,
    images: Option<Vec<String>>,
}

async fn create_product(
    State(s): State<AppState>,
    user: AuthUser,
    Json(r): Json<CreateProductRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    user.require(&[Role::Seller, Role::Admin])?;
    r.validate()?;
    if r.price < Decimal::ZERO {
        return Err(ApiError::bad_request("price must not be negative"));
    }
    if r.stock < 0 {
        return Err(ApiError::bad_request("stock must not be negative"));
    }

    let product = sqlx::query_as::<_, Product>(
        "INSERT INTO products (id, seller_id, name, description, price, category, stock, images)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(user.id)
    .bind(&r.name)
    .bind(&r.description)
    .bind(r.price)
    .bind(&r.category)
    .bind(r.stock)
    .bind(r.images.unwrap_or_default())
    .fetch_one(&s.db)
    .await?;
    tracing::info!("product created: {} by {}", product.id, user.id);
    Ok((StatusCode::CREATED, success(product)))
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateProductRequest {
    #[validate(length(min = 1, max = 200))]
    name: Option<String>,
    description: Option<String>,
    price: Option<Decimal>,
    #[validate(length(min = 1, max = 100))]
    category: Option<String>,
    stock: Option<i32>,
    images: Option<Vec<String>>,
}

async fn update_product(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateProductRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    r.validate()?;
    if r.price.is_some_and(|price| price < Decimal::ZERO) {
        return Err(ApiError::bad_request("price must not be negative"));
    }
    if r.stock.is_some_and(|stock| stock < 0) {
        return Err(ApiError::bad_request("stock must not be negative"));
    }
    require_owner(&s, id, &user).await?;

    let product = sqlx::query_as::<_, Product>(
        "UPDATE products SET name = COALESCE($2, name), description = COALESCE($3, description),
         price = COALESCE($4, price), category = COALESCE($5, category),
         stock = COALESCE($6, stock), images = COALESCE($7, images), updated_at = NOW()
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&r.name)
    .bind(&r.description)
    .bind(r.price)
    .bind(&r.category)
    .bind(r.stock)
    .bind(&r.images)
    .fetch_one(&s.db)
    .await?;
    Ok(success(product))
}

async fn soft_delete_product(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    require_owner(&s, id, &user).await?;
    sqlx::query("UPDATE products SET deleted = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&s.db)
        .await?;
    tracing::info!("product soft-deleted: {id}");
    Ok(success_message("product deleted"))
}

async fn restore_product(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    require_owner(&s, id, &user).await?;
    sqlx::query("UPDATE products SET deleted = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&s.db)
        .await?;
    Ok(success_message("product restored"))
}

#[derive(Debug, Deserialize)]
struct DiscountBody {
    kind: String,
    value: Decimal,
}

#[derive(Debug, Deserialize)]
struct DiscountRequest {
    discount: Option<DiscountBody>,
}

async fn update_discount(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(r): Json<DiscountRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_owner(&s, id, &user).await?;

    let discount = match r.discount {
        None => None,
        Some(body) => Some(Discount::new(DiscountKind::parse(&body.kind)?, body.value)?),
    };
    let product = sqlx::query_as::<_, Product>(
        "UPDATE products SET discount_kind = $2, discount_value = $3, updated_at = NOW()
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(discount.map(|d| d.kind.as_str()))
    .bind(discount.map(|d| d.value))
    .fetch_one(&s.db)
    .await?;
    Ok(success(product))
}

async fn my_products(
    State(s): State<AppState>,
    user: AuthUser,
    Query(p): Query<Pagination>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Seller, Role::Admin])?;
    let products = sqlx::query_as::<_, Product>(
        "SELECT * FROM products WHERE seller_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(user.id)
    .bind(p.limit())
    .bind(p.offset())
    .fetch_all(&s.db)
    .await?;
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products WHERE seller_id = $1")
        .bind(user.id)
        .fetch_one(&s.db)
        .await?;
    Ok(success(Paginated { data: products, total: total.0, page: p.page() }))
}

async fn deleted_products(
    State(s): State<AppState>,
    user: AuthUser,
    Query(p): Query<Pagination>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require(&[Role::Seller, Role::Admin])?;
    // Admins see every soft-deleted product, sellers only their own.
    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM products WHERE deleted = TRUE");
    if !user.is_admin() {
        query.push(" AND seller_id = ").push_bind(user.id);
    }
    query
        .push(" ORDER BY updated_at DESC LIMIT ")
        .push_bind(p.limit())
        .push(" OFFSET ")
        .push_bind(p.offset());
    let products = query.build_query_as::<Product>().fetch_all(&s.db).await?;
    Ok(success(products))
}

#[derive(Debug, Deserialize, Validate)]
struct AskQuestionRequest {
    #[validate(length(min = 1, max = 1000))]
    question: String,
}

async fn ask_question(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(r): Json<AskQuestionRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    user.require(&[Role::Buyer])?;
    r.validate()?;
    let product = fetch_product(&s, id).await?;
    if product.deleted {
        return Err(ApiError::not_found("no such product"));
    }

    let question = sqlx::query_as::<_, ProductQuestion>(
        "INSERT INTO product_questions (id, product_id, asker_id, question)
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(id)
    .bind(user.id)
    .bind(&r.question)
    .fetch_one(&s.db)
    .await?;
    Ok((StatusCode::CREATED, success(question)))
}

#[derive(Debug, Deserialize, Validate)]
struct AnswerRequest {
    #[validate(length(min = 1, max = 1000))]
    answer: String,
}

async fn answer_question(
    State(s): State<AppState>,
    user: AuthUser,
    Path((id, qid)): Path<(Uuid, Uuid)>,
    Json(r): Json<AnswerRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    r.validate()?;
    require_owner(&s, id, &user).await?;

    let question = sqlx::query_as::<_, ProductQuestion>(
        "UPDATE product_questions SET answer = $3, answered_by = $4, answered_at = NOW()
         WHERE id = $1 AND product_id = $2 RETURNING *",
    )
    .bind(qid)
    .bind(id)
    .bind(&r.answer)
    .bind(user.id)
    .fetch_optional(&s.db)
    .await?
    .ok_or_else(|| ApiError::not_found("no such question"))?;
    Ok(success(question))
}

async fn list_questions(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let questions = sqlx::query_as::<_, ProductQuestion>(
        "SELECT * FROM product_questions WHERE product_id = $1 ORDER BY created_at DESC",
    )
    .bind(id)
    .fetch_all(&s.db)
    .await?;
    Ok(success(questions))
}

pub(crate) async fn fetch_product(s: &AppState, id: Uuid) -> ApiResult<Product> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(&s.db)
        .await?
        .ok_or_else(|| ApiError::not_found("no such product"))
}

/// Fetch the product and require the caller to be its seller or an admin.
async fn require_owner(s: &AppState, id: Uuid, user: &AuthUser) -> ApiResult<Product> {
    let product = fetch_product(s, id).await?;
    if !user.is_admin() && product.seller_id != user.id {
        return Err(ApiError::forbidden("not your product"));
    }
    Ok(product)
}
