use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::catalog_service::CatalogService;
use super::checkout_service::compute_total;
use crate::{
    entities::{cart, cart_item, Cart, CartItem, CartItemModel, CartModel, ProductModel},
    errors::ServiceError,
    session::{GuestCart, SessionId, SessionStore, GUEST_CART_KEY},
};

/// Whose cart an operation addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOwner {
    Account(Uuid),
    Guest(SessionId),
}

impl CartOwner {
    /// Authenticated callers use their account cart; anonymous callers need a session.
    pub fn resolve(user_id: Option<Uuid>, session: Option<SessionId>) -> Option<Self> {
        match (user_id, session) {
            (Some(user_id), _) => Some(CartOwner::Account(user_id)),
            (None, Some(session)) => Some(CartOwner::Guest(session)),
            (None, None) => None,
        }
    }
}

/// One cart line, whichever store it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartLine {
    Persisted { item: CartItemModel },
    Ephemeral { product_id: Uuid, quantity: i32 },
}

impl CartLine {
    pub fn product_id(&self) -> Uuid {
        match self {
            CartLine::Persisted { item } => item.product_id,
            CartLine::Ephemeral { product_id, .. } => *product_id,
        }
    }

    pub fn quantity(&self) -> i32 {
        match self {
            CartLine::Persisted { item } => item.quantity,
            CartLine::Ephemeral { quantity, .. } => *quantity,
        }
    }
}

/// Where a snapshot was read from; checkout records it so the cart can be cleared later
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartSource {
    Account { user_id: Uuid, cart_id: Option<Uuid> },
    Guest { session_id: SessionId },
}

/// Point-in-time view of a cart handed to checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSnapshot {
    pub source: CartSource,
    pub lines: Vec<CartLine>,
    /// Products referenced by the cart that no longer exist or are inactive
    pub dropped: Vec<Uuid>,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn cart_id(&self) -> Option<Uuid> {
        match &self.source {
            CartSource::Account { cart_id, .. } => *cart_id,
            CartSource::Guest { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CartView {
    pub lines: Vec<CartLineView>,
    pub total: Decimal,
    pub item_count: i64,
}

impl CartView {
    pub fn empty() -> Self {
        Self {
            lines: Vec::new(),
            total: Decimal::ZERO,
            item_count: 0,
        }
    }
}

/// Rejects a resulting line quantity the product cannot cover.
pub fn ensure_stock(product: &ProductModel, quantity: i32) -> Result<(), ServiceError> {
    if product.stock_quantity <= 0 {
        return Err(ServiceError::Conflict(format!(
            "Sorry, {} is out of stock.",
            product.name
        )));
    }
    if quantity > product.stock_quantity {
        return Err(ServiceError::Conflict(format!(
            "Sorry, only {} of {} available.",
            product.stock_quantity, product.name
        )));
    }
    Ok(())
}

/// Guest carts in the session store and account carts in the database
#[derive(Clone)]
pub struct CartStore {
    db: Arc<DatabaseConnection>,
    sessions: Arc<dyn SessionStore>,
    catalog: Arc<CatalogService>,
}

impl CartStore {
    pub fn new(
        db: Arc<DatabaseConnection>,
        sessions: Arc<dyn SessionStore>,
        catalog: Arc<CatalogService>,
    ) -> Self {
        Self {
            db,
            sessions,
            catalog,
        }
    }

    /// Latest cart owned by the user.
    pub async fn find_account_cart<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<Option<CartModel>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .order_by_desc(cart::Column::UpdatedAt)
            .one(conn)
            .await?)
    }

    pub async fn find_or_create_account_cart<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        if let Some(existing) = Self::find_account_cart(conn, user_id).await? {
            return Ok(existing);
        }
        let now = Utc::now();
        let created = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(Some(user_id)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;
        debug!(cart_id = %created.id, user_id = %user_id, "Created account cart");
        Ok(created)
    }

    /// Bumps `updated_at` so the cart stays the user's most recent one.
    pub async fn touch<C: ConnectionTrait>(conn: &C, cart: CartModel) -> Result<(), ServiceError> {
        let mut active: cart::ActiveModel = cart.into();
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;
        Ok(())
    }

    async fn guest_cart(&self, session: &SessionId) -> Result<GuestCart, ServiceError> {
        let raw = self.sessions.get(session, GUEST_CART_KEY).await?;
        Ok(GuestCart::from_value(raw))
    }

    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            let mut errors = crate::errors::FieldErrors::default();
            errors.push("quantity", "must be at least 1");
            return Err(ServiceError::InvalidFields(errors));
        }

        let product = self.catalog.get_product(product_id).await?;
        if !product.is_purchasable() {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }

        match owner {
            CartOwner::Account(user_id) => {
                let txn = self.db.begin().await?;
                let cart = Self::find_or_create_account_cart(&txn, *user_id).await?;
                let existing = CartItem::find()
                    .filter(cart_item::Column::CartId.eq(cart.id))
                    .filter(cart_item::Column::ProductId.eq(product_id))
                    .one(&txn)
                    .await?;
                let now = Utc::now();
                match existing {
                    Some(item) => {
                        let new_quantity = item.quantity.saturating_add(quantity);
                        ensure_stock(&product, new_quantity)?;
                        let mut active: cart_item::ActiveModel = item.into();
                        active.quantity = Set(new_quantity);
                        active.updated_at = Set(now);
                        active.update(&txn).await?;
                    }
                    None => {
                        ensure_stock(&product, quantity)?;
                        cart_item::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            cart_id: Set(cart.id),
                            product_id: Set(product_id),
                            quantity: Set(quantity),
                            created_at: Set(now),
                            updated_at: Set(now),
                        }
                        .insert(&txn)
                        .await?;
                    }
                }
                Self::touch(&txn, cart).await?;
                txn.commit().await?;
            }
            CartOwner::Guest(session) => {
                let mut guest = self.guest_cart(session).await?;
                let new_quantity = guest.quantity_of(product_id).saturating_add(quantity);
                ensure_stock(&product, new_quantity)?;
                guest.set_quantity(product_id, new_quantity);
                self.sessions
                    .set(session, GUEST_CART_KEY, guest.into_value())
                    .await?;
            }
        }

        info!(product_id = %product_id, quantity, "Added item to cart");
        self.view(owner).await
    }

    /// Removing a line that is not in the cart is a no-op.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        owner: &CartOwner,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        match owner {
            CartOwner::Account(user_id) => {
                let txn = self.db.begin().await?;
                if let Some(cart) = Self::find_account_cart(&txn, *user_id).await? {
                    let result = CartItem::delete_many()
                        .filter(cart_item::Column::CartId.eq(cart.id))
                        .filter(cart_item::Column::ProductId.eq(product_id))
                        .exec(&txn)
                        .await?;
                    if result.rows_affected > 0 {
                        Self::touch(&txn, cart).await?;
                    }
                }
                txn.commit().await?;
            }
            CartOwner::Guest(session) => {
                let mut guest = self.guest_cart(session).await?;
                if guest.remove(product_id) {
                    self.sessions
                        .set(session, GUEST_CART_KEY, guest.into_value())
                        .await?;
                }
            }
        }
        self.view(owner).await
    }

    pub async fn view(&self, owner: &CartOwner) -> Result<CartView, ServiceError> {
        let (snapshot, products) = self.load(owner).await?;

        let mut lines = Vec::with_capacity(snapshot.lines.len());
        for line in &snapshot.lines {
            let Some(product) = products.get(&line.product_id()) else {
                continue;
            };
            lines.push(CartLineView {
                product_id: product.id,
                name: product.name.clone(),
                price: product.price,
                quantity: line.quantity(),
                line_total: compute_total(&[(product.price, line.quantity())], Decimal::ZERO),
            });
        }

        let priced: Vec<(Decimal, i32)> = lines.iter().map(|l| (l.price, l.quantity)).collect();
        Ok(CartView {
            total: compute_total(&priced, Decimal::ZERO),
            item_count: lines.iter().map(|l| i64::from(l.quantity)).sum(),
            lines,
        })
    }

    pub async fn snapshot(&self, owner: &CartOwner) -> Result<CartSnapshot, ServiceError> {
        Ok(self.load(owner).await?.0)
    }

    async fn load(
        &self,
        owner: &CartOwner,
    ) -> Result<(CartSnapshot, HashMap<Uuid, ProductModel>), ServiceError> {
        let (source, raw_lines) = match owner {
            CartOwner::Account(user_id) => {
                let cart = Self::find_account_cart(&*self.db, *user_id).await?;
                let lines = match &cart {
                    Some(cart) => CartItem::find()
                        .filter(cart_item::Column::CartId.eq(cart.id))
                        .order_by_asc(cart_item::Column::CreatedAt)
                        .all(&*self.db)
                        .await?
                        .into_iter()
                        .map(|item| CartLine::Persisted { item })
                        .collect(),
                    None => Vec::new(),
                };
                (
                    CartSource::Account {
                        user_id: *user_id,
                        cart_id: cart.map(|c| c.id),
                    },
                    lines,
                )
            }
            CartOwner::Guest(session) => {
                let lines = self
                    .guest_cart(session)
                    .await?
                    .lines()
                    .into_iter()
                    .map(|(product_id, quantity)| CartLine::Ephemeral {
                        product_id,
                        quantity,
                    })
                    .collect();
                (
                    CartSource::Guest {
                        session_id: session.clone(),
                    },
                    lines,
                )
            }
        };

        let ids: Vec<Uuid> = raw_lines.iter().map(CartLine::product_id).collect();
        let products = CatalogService::bulk_get_products(&*self.db, &ids).await?;

        let mut lines = Vec::with_capacity(raw_lines.len());
        let mut dropped = Vec::new();
        for line in raw_lines {
            match products.get(&line.product_id()) {
                Some(product) if product.is_purchasable() && line.quantity() > 0 => {
                    lines.push(line)
                }
                _ => {
                    debug!(product_id = %line.product_id(), "Dropping unavailable cart line");
                    dropped.push(line.product_id());
                }
            }
        }

        Ok((
            CartSnapshot {
                source,
                lines,
                dropped,
            },
            products,
        ))
    }
}
