use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::OrderStatus;

/// Domain events emitted by the storefront services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CartMerged {
        cart_id: Uuid,
        user_id: Uuid,
        lines_merged: usize,
    },
    CartCleared {
        order_number: String,
        cart_id: Option<Uuid>,
    },
    OrderCreated {
        order_id: Uuid,
        order_number: String,
    },
    OrderStatusChanged {
        order_number: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderConfirmationSent {
        order_number: String,
        delivered: bool,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Consumes events until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderStatusChanged {
                order_number,
                old_status,
                new_status,
            } => info!(
                order_number = %order_number,
                "Order status changed {} -> {}",
                old_status,
                new_status
            ),
            Event::OrderConfirmationSent {
                order_number,
                delivered: false,
            } => warn!(order_number = %order_number, "Order confirmation was not delivered"),
            other => info!("Received event: {:?}", other),
        }
    }

    info!("Event processing loop stopped");
}
