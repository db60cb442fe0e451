use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

/// Placed order. Shipping fields are copied at checkout time.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[schema(as = Order)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    #[sea_orm(nullable)]
    pub user_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub cart_id: Option<Uuid>,
    pub shipping_full_name: String,
    pub shipping_email: String,
    pub shipping_phone_number: String,
    pub shipping_address1: String,
    pub shipping_address2: String,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_zipcode: String,
    pub shipping_country: String,
    #[sea_orm(nullable)]
    pub delivery_method_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub delivery_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub order_total: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(
        belongs_to = "super::delivery_method::Entity",
        from = "Column::DeliveryMethodId",
        to = "super::delivery_method::Column::Id"
    )]
    DeliveryMethod,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::delivery_method::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeliveryMethod.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Items subtotal, derived from the stored total and delivery snapshot.
    pub fn subtotal(&self) -> Decimal {
        self.order_total - self.delivery_cost
    }

    pub fn is_owned_by(&self, user_id: Option<Uuid>) -> bool {
        match self.user_id {
            Some(owner) => user_id == Some(owner),
            None => true,
        }
    }
}

/// Order lifecycle status
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "SHIPPED")]
    Shipped,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

/// Outcome reported by the payment gateway for an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

impl OrderStatus {
    /// Next status for a payment outcome, or `None` when the event is a no-op.
    ///
    /// Only `PENDING` orders move: success goes to `PROCESSING`, failure to
    /// `FAILED`. Anything arriving later is a replay or stale delivery.
    pub fn on_payment(self, outcome: PaymentOutcome) -> Option<OrderStatus> {
        match (self, outcome) {
            (OrderStatus::Pending, PaymentOutcome::Succeeded) => Some(OrderStatus::Processing),
            (OrderStatus::Pending, PaymentOutcome::Failed) => Some(OrderStatus::Failed),
            _ => None,
        }
    }

    /// Payment may only be attempted or retried while pending.
    pub fn accepts_payment(self) -> bool {
        self == OrderStatus::Pending
    }
}
