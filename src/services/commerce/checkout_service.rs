use chrono::Utc;
use metrics::counter;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::{
    cart_service::{CartLine, CartSnapshot},
    catalog_service::CatalogService,
    order_service::OrderDetails,
    profile_service::ProfileService,
};
use crate::{
    entities::{order, order_item, Order, OrderStatus},
    errors::{FieldErrors, ServiceError},
    events::{Event, EventSender},
};

const ORDER_NUMBER_ATTEMPTS: usize = 3;

/// Shipping details captured onto the order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingInfo {
    #[validate(length(min = 1, max = 255, message = "This field is required."))]
    pub full_name: String,
    #[validate(email(message = "Enter a valid email address."))]
    pub email: String,
    #[serde(default)]
    #[validate(length(max = 20, message = "Ensure this field has at most 20 characters."))]
    pub phone_number: String,
    #[validate(length(min = 1, max = 255, message = "This field is required."))]
    pub address1: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub address2: String,
    #[validate(length(min = 1, max = 100, message = "This field is required."))]
    pub city: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub state: String,
    #[validate(length(min = 1, max = 20, message = "This field is required."))]
    pub zipcode: String,
    #[validate(length(min = 1, max = 100, message = "This field is required."))]
    pub country: String,
}

/// Order total from `(unit price, quantity)` lines plus the delivery price.
///
/// Each line is rounded to cents before summing, so the result always equals
/// the sum of the stored line totals plus delivery.
pub fn compute_total(lines: &[(Decimal, i32)], delivery_price: Decimal) -> Decimal {
    let items: Decimal = lines
        .iter()
        .map(|(price, quantity)| round_money(*price * Decimal::from(*quantity)))
        .sum();
    round_money(items + round_money(delivery_price))
}

fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn new_order_number() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}

/// Turns a cart snapshot into a PENDING order
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates the order, its items and the stock decrements in one transaction.
    ///
    /// Product rows are locked in id order before their stock is read, so
    /// concurrent checkouts of the same product serialize and never oversell.
    /// With `save_address`, an account's profile address is overwritten after
    /// the order commits; a failure there is logged and the order stands.
    #[instrument(skip(self, snapshot, shipping), fields(lines = snapshot.lines.len()))]
    pub async fn create_order(
        &self,
        snapshot: &CartSnapshot,
        shipping: &ShippingInfo,
        delivery_method_id: Option<Uuid>,
        user_id: Option<Uuid>,
        save_address: bool,
    ) -> Result<OrderDetails, ServiceError> {
        if snapshot.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        if !snapshot.dropped.is_empty() {
            warn!(dropped = ?snapshot.dropped, "Checking out without unavailable products");
        }

        let mut errors = match shipping.validate() {
            Ok(()) => FieldErrors::default(),
            Err(e) => FieldErrors::from(e),
        };
        let delivery_method = match delivery_method_id {
            None => {
                errors.push("delivery_method_id", "This field is required.");
                None
            }
            Some(id) => match CatalogService::get_delivery_method(&*self.db, id).await? {
                Some(method) if method.is_active => Some(method),
                _ => {
                    errors.push("delivery_method_id", "Select a valid delivery method.");
                    None
                }
            },
        };
        for line in &snapshot.lines {
            if line.quantity() <= 0 {
                errors.push(
                    format!("items[{}].quantity", line.product_id()),
                    "must be at least 1",
                );
            }
        }
        errors.into_result()?;
        let Some(delivery_method) = delivery_method else {
            return Err(ServiceError::InternalError(
                "delivery method missing after validation".to_string(),
            ));
        };

        let mut lines: Vec<&CartLine> = snapshot.lines.iter().collect();
        lines.sort_by_key(|line| line.product_id());

        let txn = self.db.begin().await?;
        let order_number = Self::allocate_order_number(&txn).await?;
        let now = Utc::now();
        let delivery_cost = round_money(delivery_method.price);

        let created = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number.clone()),
            user_id: Set(user_id),
            cart_id: Set(snapshot.cart_id()),
            shipping_full_name: Set(shipping.full_name.trim().to_string()),
            shipping_email: Set(shipping.email.trim().to_string()),
            shipping_phone_number: Set(shipping.phone_number.trim().to_string()),
            shipping_address1: Set(shipping.address1.trim().to_string()),
            shipping_address2: Set(shipping.address2.trim().to_string()),
            shipping_city: Set(shipping.city.trim().to_string()),
            shipping_state: Set(shipping.state.trim().to_string()),
            shipping_zipcode: Set(shipping.zipcode.trim().to_string()),
            shipping_country: Set(shipping.country.trim().to_string()),
            delivery_method_id: Set(Some(delivery_method.id)),
            delivery_cost: Set(delivery_cost),
            order_total: Set(Decimal::ZERO),
            status: Set(OrderStatus::Pending),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            let product_id = line.product_id();
            let quantity = line.quantity();

            let product = match CatalogService::lock_and_get(&txn, product_id).await? {
                Some(p) if p.is_purchasable() => p,
                _ => return Err(ServiceError::ProductUnavailable(product_id)),
            };
            if quantity > product.stock_quantity {
                counter!("storefront.checkout.insufficient_stock", 1);
                return Err(ServiceError::InsufficientStock {
                    product_id,
                    product_name: product.name,
                    requested: quantity,
                    available: product.stock_quantity,
                });
            }

            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(created.id),
                product_id: Set(product_id),
                product_name: Set(product.name.clone()),
                quantity: Set(quantity),
                price: Set(product.price),
                line_total: Set(compute_total(&[(product.price, quantity)], Decimal::ZERO)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;

            if let Err(e) = CatalogService::decrement_stock(&txn, product_id, quantity).await {
                if matches!(e, ServiceError::InsufficientStock { .. }) {
                    counter!("storefront.checkout.insufficient_stock", 1);
                }
                return Err(e);
            }

            priced.push((product.price, quantity));
            items.push(item);
        }

        let order_total = compute_total(&priced, delivery_cost);
        let mut active: order::ActiveModel = created.into();
        active.order_total = Set(order_total);
        let order = active.update(&txn).await?;

        txn.commit().await?;

        counter!("storefront.checkout.orders_created", 1);
        info!(
            order_number = %order.order_number,
            order_total = %order.order_total,
            items = items.len(),
            "Order created"
        );
        if save_address {
            match user_id {
                Some(user_id) => {
                    if let Err(e) = ProfileService::upsert(&*self.db, user_id, shipping).await {
                        warn!(user_id = %user_id, "Failed to save profile shipping address: {}", e);
                    }
                }
                None => debug!("Ignoring save_address for a guest checkout"),
            }
        }
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
            })
            .await;

        Ok(OrderDetails {
            order,
            items,
            delivery_method_name: Some(delivery_method.name),
        })
    }

    async fn allocate_order_number<C: ConnectionTrait>(conn: &C) -> Result<String, ServiceError> {
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let candidate = new_order_number();
            let taken = Order::find()
                .filter(order::Column::OrderNumber.eq(candidate.as_str()))
                .one(conn)
                .await?
                .is_some();
            if !taken {
                return Ok(candidate);
            }
            warn!(order_number = %candidate, "Order number collision, regenerating");
        }
        Err(ServiceError::Conflict(
            "could not allocate a unique order number".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_adds_delivery_to_line_totals() {
        assert_eq!(compute_total(&[(dec!(10.00), 5)], dec!(4.99)), dec!(54.99));
        assert_eq!(
            compute_total(&[(dec!(9.99), 2), (dec!(0.50), 3)], dec!(0)),
            dec!(21.48)
        );
        assert_eq!(compute_total(&[], dec!(3.50)), dec!(3.50));
    }

    #[test]
    fn sub_cent_prices_round_per_line() {
        // 3 x 0.3333 = 0.9999 -> 1.00 per line, twice
        assert_eq!(
            compute_total(&[(dec!(0.3333), 3), (dec!(0.3333), 3)], dec!(0)),
            dec!(2.00)
        );
        assert_eq!(compute_total(&[(dec!(0.125), 1)], dec!(0)), dec!(0.13));
    }

    #[test]
    fn order_numbers_are_32_uppercase_hex() {
        let number = new_order_number();
        assert_eq!(number.len(), 32);
        assert!(number
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        assert_ne!(number, new_order_number());
    }

    #[test]
    fn shipping_validation_reports_each_field() {
        let shipping = ShippingInfo {
            email: "not-an-email".into(),
            ..ShippingInfo::default()
        };
        let errors = FieldErrors::from(shipping.validate().unwrap_err());
        for field in ["full_name", "email", "address1", "city", "zipcode", "country"] {
            assert!(errors.contains(field), "missing error for {}", field);
        }
        assert!(!errors.contains("address2"));
    }

    proptest! {
        #[test]
        fn total_equals_rounded_lines_plus_delivery(
            lines in prop::collection::vec((0i64..1_000_000, 1i32..50), 0..8),
            delivery in 0i64..10_000,
        ) {
            let priced: Vec<(Decimal, i32)> = lines
                .iter()
                .map(|(cents, qty)| (Decimal::new(*cents, 2), *qty))
                .collect();
            let delivery = Decimal::new(delivery, 2);
            let expected: Decimal = priced
                .iter()
                .map(|(p, q)| compute_total(&[(*p, *q)], Decimal::ZERO))
                .sum::<Decimal>()
                + delivery;
            prop_assert_eq!(compute_total(&priced, delivery), expected);
        }
    }
}
