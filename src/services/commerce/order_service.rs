use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::checkout_service::ShippingInfo;
use crate::{
    entities::{
        cart_item, order, order_item, CartItem, DeliveryMethod, Order, OrderItem, OrderItemModel,
        OrderModel, OrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::payments::{to_minor_units, PaymentGateway, PaymentIntent, PaymentIntentRequest},
    session::{SessionId, SessionStore, GUEST_CART_KEY},
};

/// An order with its items, as rendered to customers and in confirmations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDetails {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
    pub delivery_method_name: Option<String>,
}

/// Customer-facing order representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderView {
    pub order_number: String,
    pub status: OrderStatus,
    pub shipping: ShippingInfo,
    pub delivery_method: Option<String>,
    pub items: Vec<OrderItemModel>,
    pub subtotal: Decimal,
    pub delivery_cost: Decimal,
    pub order_total: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<&OrderDetails> for OrderView {
    fn from(details: &OrderDetails) -> Self {
        let order = &details.order;
        Self {
            order_number: order.order_number.clone(),
            status: order.status,
            shipping: ShippingInfo {
                full_name: order.shipping_full_name.clone(),
                email: order.shipping_email.clone(),
                phone_number: order.shipping_phone_number.clone(),
                address1: order.shipping_address1.clone(),
                address2: order.shipping_address2.clone(),
                city: order.shipping_city.clone(),
                state: order.shipping_state.clone(),
                zipcode: order.shipping_zipcode.clone(),
                country: order.shipping_country.clone(),
            },
            delivery_method: details.delivery_method_name.clone(),
            items: details.items.clone(),
            subtotal: order.subtotal(),
            delivery_cost: order.delivery_cost,
            order_total: order.order_total,
            created_at: order.created_at,
        }
    }
}

/// Result of the post-payment landing step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConfirmationOutcome {
    pub order_number: String,
    pub status: OrderStatus,
    pub cart_cleared: bool,
}

/// Order lookup, payment initialisation and cart clearing after payment
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    sessions: Arc<dyn SessionStore>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        sessions: Arc<dyn SessionStore>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            sessions,
            event_sender,
        }
    }

    async fn find_order(&self, order_number: &str) -> Result<OrderModel, ServiceError> {
        Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))
    }

    /// Loads an order with items and delivery method name.
    pub async fn get_details(&self, order_number: &str) -> Result<OrderDetails, ServiceError> {
        let order = self.find_order(order_number).await?;
        self.load_details(order).await
    }

    pub async fn load_details(&self, order: OrderModel) -> Result<OrderDetails, ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::ProductName)
            .all(&*self.db)
            .await?;
        let delivery_method_name = match order.delivery_method_id {
            Some(id) => DeliveryMethod::find_by_id(id)
                .one(&*self.db)
                .await?
                .map(|m| m.name),
            None => None,
        };
        Ok(OrderDetails {
            order,
            items,
            delivery_method_name,
        })
    }

    /// Owned orders are visible to their owner only; guest orders to anyone with the number.
    #[instrument(skip(self))]
    pub async fn get_for_viewer(
        &self,
        order_number: &str,
        viewer: Option<Uuid>,
    ) -> Result<OrderDetails, ServiceError> {
        let order = self.find_order(order_number).await?;
        if !order.is_owned_by(viewer) {
            return Err(ServiceError::Forbidden(
                "order belongs to another account".to_string(),
            ));
        }
        self.load_details(order).await
    }

    #[instrument(skip(self, gateway))]
    pub async fn create_payment_intent(
        &self,
        order_number: &str,
        viewer: Option<Uuid>,
        gateway: &dyn PaymentGateway,
        currency: &str,
    ) -> Result<PaymentIntent, ServiceError> {
        let order = self.find_order(order_number).await?;
        if !order.is_owned_by(viewer) {
            return Err(ServiceError::Forbidden(
                "order belongs to another account".to_string(),
            ));
        }
        if !order.status.accepts_payment() {
            return Err(ServiceError::Conflict(format!(
                "order {} is {} and can no longer be paid",
                order.order_number, order.status
            )));
        }
        if order.order_total <= Decimal::ZERO {
            return Err(ServiceError::InvalidOperation(
                "order total must be greater than zero".to_string(),
            ));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("order_number".to_string(), order.order_number.clone());
        if let Some(user_id) = order.user_id {
            metadata.insert("user_id".to_string(), user_id.to_string());
        }

        let intent = gateway
            .create_payment_intent(PaymentIntentRequest {
                amount: to_minor_units(order.order_total)?,
                currency: currency.to_lowercase(),
                metadata,
            })
            .await?;
        info!(order_number = %order.order_number, intent_id = %intent.id, "Payment initialised");
        Ok(intent)
    }

    /// Landing step after the gateway redirect. Never changes the order status.
    ///
    /// A `succeeded` redirect clears the cart the order was bought from: the
    /// persisted cart's items when the order references one, otherwise the
    /// caller's guest cart for an ownerless order.
    #[instrument(skip(self))]
    pub async fn confirm(
        &self,
        order_number: &str,
        redirect_status: &str,
        viewer: Option<Uuid>,
        session: Option<&SessionId>,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        let order = self.find_order(order_number).await?;
        if !order.is_owned_by(viewer) {
            return Err(ServiceError::Forbidden(
                "order belongs to another account".to_string(),
            ));
        }

        let cart_cleared = if redirect_status == "succeeded" {
            self.clear_purchased_cart(&order, session).await?
        } else {
            warn!(
                order_number = %order.order_number,
                redirect_status,
                "Payment redirect did not succeed, keeping cart"
            );
            false
        };

        Ok(ConfirmationOutcome {
            order_number: order.order_number,
            status: order.status,
            cart_cleared,
        })
    }

    async fn clear_purchased_cart(
        &self,
        order: &OrderModel,
        session: Option<&SessionId>,
    ) -> Result<bool, ServiceError> {
        let cleared = match (order.cart_id, order.user_id, session) {
            (Some(cart_id), _, _) => {
                let result = CartItem::delete_many()
                    .filter(cart_item::Column::CartId.eq(cart_id))
                    .exec(&*self.db)
                    .await?;
                info!(cart_id = %cart_id, removed = result.rows_affected, "Cleared account cart");
                true
            }
            (None, None, Some(session)) => {
                let removed = self.sessions.remove(session, GUEST_CART_KEY).await?;
                info!(session = %session, "Cleared guest cart");
                removed.is_some()
            }
            _ => false,
        };

        if cleared {
            self.event_sender
                .send_or_log(Event::CartCleared {
                    order_number: order.order_number.clone(),
                    cart_id: order.cart_id,
                })
                .await;
        }
        Ok(cleared)
    }
}
