//! Shared application state

use std::sync::Arc;

use crate::config::Config;
use crate::services::mail::Mailer;
use crate::services::payments::PaymentService;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Arc<Config>,
    pub mailer: Mailer,
    pub payments: PaymentService,
    pub nats: Option<async_nats::Client>,
}
