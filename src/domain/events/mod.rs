//! Domain Events
//!
//! Published to NATS after the corresponding write commits. Publishing is
//! best-effort: a missing client or a publish failure never fails the
//! request that raised the event.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

pub const EVENT_SUBJECT: &str = "vendora.events";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderPlaced {
        order_id: Uuid,
        buyer_id: Uuid,
        final_price: Decimal,
        payment_method: String,
    },
    OrderCancelled {
        order_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        status: String,
    },
    RefundResolved {
        refund_id: Uuid,
        order_id: Uuid,
        status: String,
    },
}

pub async fn publish(nats: &Option<async_nats::Client>, event: &DomainEvent) {
    let Some(client) = nats else { return };
    let payload = match serde_json::to_vec(event) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!("failed to serialize domain event: {err}");
            return;
        }
    };
    if let Err(err) = client.publish(EVENT_SUBJECT, payload.into()).await {
        tracing::warn!("failed to publish domain event: {err}");
    }
}
