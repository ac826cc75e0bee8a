//! Vendora - Self-hosted Multi-vendor Marketplace Backend

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vendora::config::Config;
use vendora::routes;
use vendora::services::{mail::Mailer, payments::PaymentService};
use vendora::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::warn!("NATS unavailable, events disabled: {err}");
                None
            }
        },
        None => None,
    };

    let state = AppState {
        db,
        mailer: Mailer::from_config(&config),
        payments: PaymentService::from_config(&config),
        nats,
        config,
    };

    let port = state.config.port;
    let app = routes::router(state);

    tracing::info!("vendora listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?, app).await?;
    Ok(())
}
