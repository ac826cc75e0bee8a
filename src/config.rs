//! Process configuration
//!
//! Built once from the environment at startup and carried in [`AppState`];
//! nothing reads environment variables after boot.
//!
//! [`AppState`]: crate::state::AppState

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub smtp: Option<SmtpConfig>,
    pub stripe: Option<StripeConfig>,
    pub paypal: Option<PaypalConfig>,
    pub nats_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET is required")?;

        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse().context("PORT must be a number")?,
            Err(_) => 8083,
        };

        let access_token_ttl_minutes = env_i64("ACCESS_TOKEN_TTL_MINUTES", 15)?;
        let refresh_token_ttl_days = env_i64("REFRESH_TOKEN_TTL_DAYS", 7)?;

        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) => Some(SmtpConfig {
                host,
                username: std::env::var("SMTP_USERNAME").context("SMTP_USERNAME is required with SMTP_HOST")?,
                password: std::env::var("SMTP_PASSWORD").context("SMTP_PASSWORD is required with SMTP_HOST")?,
                from: std::env::var("SMTP_FROM").context("SMTP_FROM is required with SMTP_HOST")?,
            }),
            Err(_) => None,
        };

        let stripe = std::env::var("STRIPE_SECRET_KEY")
            .ok()
            .map(|secret_key| StripeConfig { secret_key });

        let paypal = match std::env::var("PAYPAL_CLIENT_ID") {
            Ok(client_id) => Some(PaypalConfig {
                client_id,
                client_secret: std::env::var("PAYPAL_CLIENT_SECRET")
                    .context("PAYPAL_CLIENT_SECRET is required with PAYPAL_CLIENT_ID")?,
                base_url: std::env::var("PAYPAL_BASE_URL")
                    .unwrap_or_else(|_| "https://api-m.sandbox.paypal.com".to_string()),
            }),
            Err(_) => None,
        };

        let nats_url = std::env::var("NATS_URL").ok();

        Ok(Self {
            database_url,
            port,
            jwt_secret,
            access_token_ttl_minutes,
            refresh_token_ttl_days,
            smtp,
            stripe,
            paypal,
            nats_url,
        })
    }
}

fn env_i64(name: &str, default: i64) -> Result<i64> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().with_context(|| format!("{name} must be a number")),
        Err(_) => Ok(default),
    }
}
