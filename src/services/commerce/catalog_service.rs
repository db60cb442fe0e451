use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    entities::{delivery_method, product, DeliveryMethod, DeliveryMethodModel, Product, ProductModel},
    errors::ServiceError,
};

/// Read access to products and delivery methods, plus the locked stock path
/// used inside checkout transactions.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<ProductModel, ServiceError> {
        Product::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }

    /// Products keyed by id; unknown ids are simply absent from the map.
    pub async fn bulk_get_products<C: ConnectionTrait>(
        conn: &C,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ProductModel>, ServiceError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let products = Product::find()
            .filter(product::Column::Id.is_in(ids.iter().copied()))
            .all(conn)
            .await?;
        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }

    /// Reads a product row under an exclusive row lock (`SELECT ... FOR UPDATE`).
    ///
    /// Must be called with a transaction; the lock is held until it ends.
    pub async fn lock_and_get<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<ProductModel>, ServiceError> {
        let product = Product::find_by_id(id).lock_exclusive().one(conn).await?;
        debug!(product_id = %id, found = product.is_some(), "Locked product row");
        Ok(product)
    }

    /// Decrements stock, refusing to go below zero.
    pub async fn decrement_stock<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = Product::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(id))
            .filter(product::Column::StockQuantity.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 1 {
            return Ok(());
        }

        match Product::find_by_id(id).one(conn).await? {
            Some(p) => Err(ServiceError::InsufficientStock {
                product_id: id,
                product_name: p.name,
                requested: quantity,
                available: p.stock_quantity,
            }),
            None => Err(ServiceError::ProductUnavailable(id)),
        }
    }

    pub async fn list_active_delivery_methods(
        &self,
    ) -> Result<Vec<DeliveryMethodModel>, ServiceError> {
        Ok(DeliveryMethod::find()
            .filter(delivery_method::Column::IsActive.eq(true))
            .order_by_asc(delivery_method::Column::Price)
            .order_by_asc(delivery_method::Column::Name)
            .all(&*self.db)
            .await?)
    }

    pub async fn get_delivery_method<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<DeliveryMethodModel>, ServiceError> {
        Ok(DeliveryMethod::find_by_id(id).one(conn).await?)
    }
}
