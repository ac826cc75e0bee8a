//! HTTP surface
//!
//! One module per resource, assembled into a single router. Success
//! responses share the `{"status": "success", ...}` envelope; failures are
//! rendered by [`ApiError`](crate::error::ApiError).

pub mod cart;
pub mod coupons;
pub mod orders;
pub mod products;
pub mod refunds;
pub mod revenue;
pub mod reviews;
pub mod users;
pub mod wishlist;

use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/health",
            get(|| async { Json(json!({"status": "healthy", "service": "vendora"})) }),
        )
        .nest("/users", users::router())
        .nest("/products", products::router())
        .nest("/cart", cart::router())
        .nest("/orders", orders::router())
        .nest("/coupons", coupons::router())
        .nest("/refunds", refunds::router())
        .nest("/reviews", reviews::router())
        .nest("/revenue", revenue::router())
        .nest("/wishlist", wishlist::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub(crate) fn success<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({"status": "success", "data": data}))
}

pub(crate) fn success_message(message: &str) -> Json<serde_json::Value> {
    Json(json!({"status": "success", "message": message}))
}

#[derive(Debug, Serialize)]
pub(crate) struct Paginated<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Pagination {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl Pagination {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page.unwrap_or(20).clamp(1, 100))
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page() - 1) * self.limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_caps() {
        let p = Pagination::default();
        assert_eq!(p.page(), 1);
        assert_eq!(p.limit(), 20);
        assert_eq!(p.offset(), 0);

        let p = Pagination { page: Some(3), per_page: Some(500) };
        assert_eq!(p.limit(), 100);
        assert_eq!(p.offset(), 200);

        let p = Pagination { page: Some(0), per_page: Some(0) };
        assert_eq!(p.page(), 1);
        assert_eq!(p.limit(), 1);
    }
}
