//! Payment confirmation state machine driven by gateway webhooks.
//!
//! Events are authenticated before any order is read. Each transition is
//! decided and written inside one transaction holding the order row lock,
//! and only from `PENDING`, so duplicate or reordered deliveries are no-ops.

use chrono::Utc;
use hmac::{Hmac, Mac};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use super::order_service::OrderService;
use crate::{
    entities::{order, Order, OrderStatus, PaymentOutcome},
    errors::ServiceError,
    events::{Event, EventSender},
    services::notifications::Notifier,
};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the gateway signature
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Checks a `t=<unix>,v1=<hex>[,v1=<hex>...]` signature over `"{t}.{payload}"`.
pub fn verify_signature(
    header: Option<&str>,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), ServiceError> {
    let header =
        header.ok_or_else(|| ServiceError::Unauthorized("missing webhook signature".to_string()))?;

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let (Some(timestamp), false) = (timestamp, signatures.is_empty()) else {
        return Err(ServiceError::Unauthorized(
            "malformed webhook signature".to_string(),
        ));
    };
    let issued_at: i64 = timestamp
        .parse()
        .map_err(|_| ServiceError::Unauthorized("malformed webhook signature".to_string()))?;
    if now.abs_diff(issued_at) > tolerance_secs {
        return Err(ServiceError::Unauthorized(
            "webhook timestamp outside tolerance".to_string(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid webhook secret: {}", e)))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    if signatures
        .iter()
        .any(|candidate| constant_time_eq(expected.as_bytes(), candidate.as_bytes()))
    {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(
            "invalid webhook signature".to_string(),
        ))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Gateway events this service understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    Succeeded {
        order_number: Option<String>,
        intent_id: Option<String>,
    },
    Failed {
        order_number: Option<String>,
        intent_id: Option<String>,
        failure_message: Option<String>,
    },
    Unknown {
        event_type: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

impl PaymentEvent {
    /// Parses a gateway event envelope; anything that is not one is a 400.
    pub fn parse(payload: &[u8]) -> Result<Self, ServiceError> {
        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("invalid event payload: {}", e)))?;

        let object = &envelope.data["object"];
        let text = |v: &Value| v.as_str().map(str::to_string);
        let order_number = text(&object["metadata"]["order_number"]).filter(|n| !n.is_empty());
        let intent_id = text(&object["id"]);

        Ok(match envelope.event_type.as_str() {
            "payment_intent.succeeded" => PaymentEvent::Succeeded {
                order_number,
                intent_id,
            },
            "payment_intent.payment_failed" => PaymentEvent::Failed {
                order_number,
                intent_id,
                failure_message: text(&object["last_payment_error"]["message"]),
            },
            _ => PaymentEvent::Unknown {
                event_type: envelope.event_type,
            },
        })
    }
}

/// What a delivered event did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Transitioned { from: OrderStatus, to: OrderStatus },
    Ignored { current: OrderStatus },
    OrderNotFound,
    MissingOrderNumber,
    UnhandledEventType { event_type: String },
}

/// Outcome plus the confirmation task started by a PENDING -> PROCESSING transition
#[derive(Debug)]
pub struct HandledEvent {
    pub outcome: WebhookOutcome,
    pub notification: Option<JoinHandle<bool>>,
}

impl HandledEvent {
    fn settled(outcome: WebhookOutcome) -> Self {
        Self {
            outcome,
            notification: None,
        }
    }
}

#[derive(Clone)]
pub struct PaymentEventService {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderService>,
    notifier: Arc<dyn Notifier>,
    event_sender: Arc<EventSender>,
    webhook_secret: Option<String>,
    tolerance_secs: u64,
    notification_timeout: Duration,
}

impl PaymentEventService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderService>,
        notifier: Arc<dyn Notifier>,
        event_sender: Arc<EventSender>,
        webhook_secret: Option<String>,
        tolerance_secs: u64,
        notification_timeout: Duration,
    ) -> Self {
        Self {
            db,
            orders,
            notifier,
            event_sender,
            webhook_secret,
            tolerance_secs,
            notification_timeout,
        }
    }

    /// Verifies, parses and applies one webhook delivery.
    #[instrument(skip_all)]
    pub async fn handle(
        &self,
        signature_header: Option<&str>,
        payload: &[u8],
    ) -> Result<HandledEvent, ServiceError> {
        let Some(secret) = self.webhook_secret.as_deref() else {
            error!("Rejecting payment webhook: no signing secret configured");
            return Err(ServiceError::Unauthorized(
                "webhook signing secret is not configured".to_string(),
            ));
        };
        if let Err(e) = verify_signature(
            signature_header,
            payload,
            secret,
            self.tolerance_secs,
            Utc::now().timestamp(),
        ) {
            warn!("Payment webhook signature verification failed: {}", e);
            return Err(e);
        }

        match PaymentEvent::parse(payload)? {
            PaymentEvent::Succeeded {
                order_number,
                intent_id,
            } => {
                info!(intent_id = ?intent_id, "Payment succeeded event");
                self.apply(order_number, PaymentOutcome::Succeeded).await
            }
            PaymentEvent::Failed {
                order_number,
                intent_id,
                failure_message,
            } => {
                warn!(
                    intent_id = ?intent_id,
                    reason = ?failure_message,
                    "Payment failed event"
                );
                self.apply(order_number, PaymentOutcome::Failed).await
            }
            PaymentEvent::Unknown { event_type } => {
                info!(event_type = %event_type, "Acknowledging unhandled payment event");
                Ok(HandledEvent::settled(WebhookOutcome::UnhandledEventType {
                    event_type,
                }))
            }
        }
    }

    async fn apply(
        &self,
        order_number: Option<String>,
        outcome: PaymentOutcome,
    ) -> Result<HandledEvent, ServiceError> {
        let Some(order_number) = order_number else {
            counter!("storefront.payments.ignored", 1);
            warn!(%outcome, "Payment event carries no order number");
            return Ok(HandledEvent::settled(WebhookOutcome::MissingOrderNumber));
        };

        let txn = self.db.begin().await?;
        let Some(current) = Order::find()
            .filter(order::Column::OrderNumber.eq(order_number.as_str()))
            .lock_exclusive()
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            counter!("storefront.payments.ignored", 1);
            info!(order_number = %order_number, "Payment event for unknown order");
            return Ok(HandledEvent::settled(WebhookOutcome::OrderNotFound));
        };

        let from = current.status;
        let Some(to) = from.on_payment(outcome) else {
            txn.rollback().await?;
            counter!("storefront.payments.ignored", 1);
            info!(order_number = %order_number, status = %from, %outcome, "Payment event is a replay or stale");
            return Ok(HandledEvent::settled(WebhookOutcome::Ignored { current: from }));
        };

        let updated = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(to.to_value()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(current.id))
            .filter(order::Column::Status.eq(from.to_value()))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            txn.rollback().await?;
            counter!("storefront.payments.ignored", 1);
            return Ok(HandledEvent::settled(WebhookOutcome::Ignored { current: from }));
        }
        txn.commit().await?;

        counter!("storefront.payments.transitions", 1, "to" => to.to_string());
        info!(order_number = %order_number, "Order status {} -> {}", from, to);
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_number: order_number.clone(),
                old_status: from,
                new_status: to,
            })
            .await;

        let notification = if to == OrderStatus::Processing {
            self.spawn_confirmation(&order_number).await
        } else {
            None
        };

        Ok(HandledEvent {
            outcome: WebhookOutcome::Transitioned { from, to },
            notification,
        })
    }

    /// Sends the confirmation off the acknowledgement path; its result never
    /// affects the committed transition.
    async fn spawn_confirmation(&self, order_number: &str) -> Option<JoinHandle<bool>> {
        let details = match self.orders.get_details(order_number).await {
            Ok(details) => details,
            Err(e) => {
                counter!("storefront.notifications.failed", 1);
                warn!(order_number, "Could not load order for confirmation: {}", e);
                return None;
            }
        };

        let notifier = self.notifier.clone();
        let events = self.event_sender.clone();
        let timeout = self.notification_timeout;
        Some(tokio::spawn(async move {
            let order_number = details.order.order_number.clone();
            let delivered =
                match tokio::time::timeout(timeout, notifier.send_order_confirmation(&details))
                    .await
                {
                    Ok(delivered) => delivered,
                    Err(_) => {
                        warn!(order_number = %order_number, "Order confirmation timed out");
                        false
                    }
                };
            if !delivered {
                counter!("storefront.notifications.failed", 1);
            }
            events
                .send_or_log(Event::OrderConfirmationSent {
                    order_number,
                    delivered,
                })
                .await;
            delivered
        }))
    }
}
