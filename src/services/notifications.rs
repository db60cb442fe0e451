use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::services::commerce::OrderDetails;

/// Sends transactional messages about orders.
///
/// Implementations report failure through the return value and never panic;
/// callers treat a `false` as an operational signal only.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(&self, order: &OrderDetails) -> bool;
}

/// Rendered order confirmation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationEmail {
    pub order_number: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

fn money(amount: Decimal) -> String {
    format!("€{:.2}", amount.round_dp(2))
}

impl ConfirmationEmail {
    pub fn render(details: &OrderDetails) -> Self {
        let order = &details.order;
        Self {
            order_number: order.order_number.clone(),
            to: order.shipping_email.clone(),
            subject: format!("Order Confirmation - {}", order.order_number),
            body: ConfirmationBody(details).to_string(),
        }
    }
}

/// Plain-text body of an order confirmation
struct ConfirmationBody<'a>(&'a OrderDetails);

impl fmt::Display for ConfirmationBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details = self.0;
        let order = &details.order;

        writeln!(f, "Hello {},", order.shipping_full_name)?;
        writeln!(f)?;
        writeln!(
            f,
            "Thank you for your order. Your order number is {}.",
            order.order_number
        )?;
        writeln!(f)?;
        for item in &details.items {
            writeln!(
                f,
                "  {} x {} @ {} = {}",
                item.product_name,
                item.quantity,
                money(item.price),
                money(item.line_total)
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Subtotal: {}", money(order.subtotal()))?;
        match &details.delivery_method_name {
            Some(name) => writeln!(f, "Delivery ({}): {}", name, money(order.delivery_cost))?,
            None => writeln!(f, "Delivery: {}", money(order.delivery_cost))?,
        }
        writeln!(f, "Total: {}", money(order.order_total))?;
        writeln!(f)?;
        writeln!(f, "Shipping to:")?;
        writeln!(f, "  {}", order.shipping_address1)?;
        if !order.shipping_address2.is_empty() {
            writeln!(f, "  {}", order.shipping_address2)?;
        }
        writeln!(
            f,
            "  {} {} {}",
            order.shipping_zipcode, order.shipping_city, order.shipping_state
        )?;
        writeln!(f, "  {}", order.shipping_country)
    }
}

/// Writes confirmations to the log; the default when no endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_order_confirmation(&self, order: &OrderDetails) -> bool {
        let email = ConfirmationEmail::render(order);
        info!(
            order_number = %email.order_number,
            to = %email.to,
            subject = %email.subject,
            "Order confirmation (log delivery)\n{}",
            email.body
        );
        true
    }
}

/// Posts rendered confirmations as JSON to a mail relay endpoint
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
    max_retries: u32,
    base_backoff: Duration,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
        })
    }

    pub fn with_retries(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.base_backoff = base_backoff;
        self
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[instrument(skip(self, order), fields(order_number = %order.order.order_number))]
    async fn send_order_confirmation(&self, order: &OrderDetails) -> bool {
        let email = ConfirmationEmail::render(order);

        for attempt in 1..=self.max_retries {
            match self.client.post(&self.endpoint).json(&email).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("Order confirmation delivered");
                    return true;
                }
                Ok(response) => warn!(
                    "Confirmation delivery failed with status: {} (attempt {}/{})",
                    response.status(),
                    attempt,
                    self.max_retries
                ),
                Err(e) => warn!(
                    "Confirmation delivery error: {} (attempt {}/{})",
                    e, attempt, self.max_retries
                ),
            }

            if attempt < self.max_retries {
                tokio::time::sleep(self.base_backoff * 2_u32.pow(attempt - 1)).await;
            }
        }

        error!(
            "Order confirmation delivery failed after {} attempts",
            self.max_retries
        );
        false
    }
}
