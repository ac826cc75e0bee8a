//! Payment gateway collaborators
//!
//! Both gateways are black boxes to the pipeline: a charge either leaves
//! the order paid or it doesn't. The card gateway takes the amount in minor
//! units with a payment-method token and confirms immediately; PayPal takes
//! major units after an OAuth client-credentials handshake.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::config::{Config, PaypalConfig, StripeConfig};
use crate::domain::order::PaymentMethod;
use crate::error::{ApiError, ApiResult};

const STRIPE_API_URL: &str = "https://api.stripe.com/v1/payment_intents";

#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub paid: bool,
    pub reference: Option<String>,
}

impl PaymentReceipt {
    fn unpaid() -> Self {
        Self { paid: false, reference: None }
    }
}

#[derive(Clone)]
pub struct PaymentService {
    http: reqwest::Client,
    stripe: Option<StripeConfig>,
    paypal: Option<PaypalConfig>,
}

impl PaymentService {
    pub fn from_config(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            stripe: config.stripe.clone(),
            paypal: config.paypal.clone(),
        }
    }

    /// Dispatch a charge. `cod` collects nothing up front and reports
    /// unpaid; the gateways report paid on success and an error otherwise.
    pub async fn charge(
        &self,
        method: PaymentMethod,
        amount: Decimal,
        payment_token: Option<&str>,
    ) -> ApiResult<PaymentReceipt> {
        match method {
            PaymentMethod::Cod => Ok(PaymentReceipt::unpaid()),
            PaymentMethod::Stripe => self.charge_card(amount, payment_token).await,
            PaymentMethod::Paypal => self.charge_paypal(amount).await,
        }
    }

    async fn charge_card(&self, amount: Decimal, payment_token: Option<&str>) -> ApiResult<PaymentReceipt> {
        let stripe = self
            .stripe
            .as_ref()
            .ok_or_else(|| ApiError::bad_request("card payments are not configured"))?;
        let token = payment_token
            .ok_or_else(|| ApiError::bad_request("payment token is required for card payments"))?;
        let minor_units = (amount * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| ApiError::bad_request("invalid charge amount"))?;

        #[derive(Deserialize)]
        struct PaymentIntent {
            id: String,
            status: String,
        }

        let response = self
            .http
            .post(STRIPE_API_URL)
            .bearer_auth(&stripe.secret_key)
            .form(&[
                ("amount", minor_units.to_string()),
                ("currency", "usd".to_string()),
                ("payment_method", token.to_string()),
                ("confirm", "true".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("card gateway rejected charge: {body}");
            return Err(ApiError::bad_request("card payment failed"));
        }

        let intent: PaymentIntent = response.json().await?;
        if intent.status != "succeeded" {
            tracing::warn!("card payment not confirmed: intent={} status={}", intent.id, intent.status);
            return Err(ApiError::bad_request("card payment was not confirmed"));
        }
        Ok(PaymentReceipt { paid: true, reference: Some(intent.id) })
    }

    async fn charge_paypal(&self, amount: Decimal) -> ApiResult<PaymentReceipt> {
        let paypal = self
            .paypal
            .as_ref()
            .ok_or_else(|| ApiError::bad_request("paypal payments are not configured"))?;

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        #[derive(Deserialize)]
        struct OrderResponse {
            id: String,
            status: String,
        }

        let token_response = self
            .http
            .post(format!("{}/v1/oauth2/token", paypal.base_url))
            .basic_auth(&paypal.client_id, Some(&paypal.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        if !token_response.status().is_success() {
            tracing::warn!("paypal token request failed: {}", token_response.status());
            return Err(ApiError::bad_request("paypal payment failed"));
        }
        let token: TokenResponse = token_response.json().await?;

        let body = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": "USD",
                    "value": amount.round_dp(2).to_string(),
                }
            }]
        });
        let order_response = self
            .http
            .post(format!("{}/v2/checkout/orders", paypal.base_url))
            .bearer_auth(&token.access_token)
            .json(&body)
            .send()
            .await?;
        if !order_response.status().is_success() {
            let body = order_response.text().await.unwrap_or_default();
            tracing::warn!("paypal order creation failed: {body}");
            return Err(ApiError::bad_request("paypal payment failed"));
        }

        let order: OrderResponse = order_response.json().await?;
        tracing::info!("paypal order created: id={} status={}", order.id, order.status);
        Ok(PaymentReceipt { paid: true, reference: Some(order.id) })
    }

    /// Gateway-side refund, modeled as a notification to the collaborator.
    /// The refund workflow does not depend on its outcome.
    pub fn notify_refund(&self, order_number: &str, amount: Decimal) {
        tracing::info!("gateway refund requested: order={order_number} amount={amount}");
    }
}
