use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{cart_service::CartStore, catalog_service::CatalogService};
use crate::{
    entities::{cart_item, CartItem},
    errors::ServiceError,
    events::{Event, EventSender},
    session::{GuestCart, SessionId, SessionStore, GUEST_CART_KEY},
};

/// Result of folding a guest cart into an account cart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct MergeReport {
    pub cart_id: Option<Uuid>,
    /// Guest lines applied to the account cart
    pub lines_merged: usize,
    /// Guest lines whose product no longer exists
    pub skipped: Vec<Uuid>,
    /// True when the merge was abandoned; the guest cart is left untouched
    pub failed: bool,
}

impl MergeReport {
    fn failed() -> Self {
        Self {
            failed: true,
            ..Self::default()
        }
    }
}

/// Cart merge on login.
///
/// Guest quantities are added to the account cart's quantities inside one
/// transaction, and the session's guest cart is removed before that
/// transaction commits. Stock is not checked here; checkout does that.
#[derive(Clone)]
pub struct CartMergeService {
    db: Arc<DatabaseConnection>,
    sessions: Arc<dyn SessionStore>,
    event_sender: Arc<EventSender>,
}

impl CartMergeService {
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

    /// Never fails: errors are logged and reported as `failed` so login proceeds.
    #[instrument(skip(self), fields(session = %session))]
    pub async fn merge(&self, session: &SessionId, user_id: Uuid) -> MergeReport {
        match self.try_merge(session, user_id).await {
            Ok(report) => report,
            Err(e) => {
                counter!("storefront.cart.merge_failed", 1);
                warn!(user_id = %user_id, "Cart merge failed, guest cart kept: {}", e);
                MergeReport::failed()
            }
        }
    }

    async fn try_merge(
        &self,
        session: &SessionId,
        user_id: Uuid,
    ) -> Result<MergeReport, ServiceError> {
        let Some(raw) = self.sessions.get(session, GUEST_CART_KEY).await? else {
            return Ok(MergeReport::default());
        };
        let lines = GuestCart::from_value(Some(raw.clone())).lines();
        if lines.is_empty() {
            self.sessions.remove(session, GUEST_CART_KEY).await?;
            return Ok(MergeReport::default());
        }

        let txn = self.db.begin().await?;
        let cart = CartStore::find_or_create_account_cart(&txn, user_id).await?;
        let cart_id = cart.id;
        let ids: Vec<Uuid> = lines.iter().map(|(id, _)| *id).collect();
        let products = CatalogService::bulk_get_products(&txn, &ids).await?;

        let mut report = MergeReport {
            cart_id: Some(cart_id),
            ..MergeReport::default()
        };
        let now = Utc::now();

        for (product_id, quantity) in lines {
            if !products.contains_key(&product_id) {
                info!(product_id = %product_id, "Skipping guest cart line for missing product");
                report.skipped.push(product_id);
                continue;
            }

            let existing = CartItem::find()
                .filter(cart_item::Column::CartId.eq(cart_id))
                .filter(cart_item::Column::ProductId.eq(product_id))
                .one(&txn)
                .await?;
            match existing {
                Some(item) => {
                    let merged = item.quantity.saturating_add(quantity);
                    let mut active: cart_item::ActiveModel = item.into();
                    active.quantity = Set(merged);
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                }
                None => {
                    cart_item::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        cart_id: Set(cart_id),
                        product_id: Set(product_id),
                        quantity: Set(quantity),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(&txn)
                    .await?;
                }
            }
            report.lines_merged += 1;
        }
        CartStore::touch(&txn, cart).await?;

        if let Err(e) = self.sessions.remove(session, GUEST_CART_KEY).await {
            txn.rollback().await?;
            return Err(e.into());
        }

        if let Err(e) = txn.commit().await {
            if let Err(restore) = self.sessions.set(session, GUEST_CART_KEY, raw).await {
                error!(
                    "Failed to restore guest cart after aborted merge: {}",
                    restore
                );
            }
            return Err(e.into());
        }

        counter!("storefront.cart.merged", 1);
        info!(
            cart_id = %cart_id,
            user_id = %user_id,
            lines_merged = report.lines_merged,
            skipped = report.skipped.len(),
            "Merged guest cart into account cart"
        );
        self.event_sender
            .send_or_log(Event::CartMerged {
                cart_id,
                user_id,
                lines_merged: report.lines_merged,
            })
            .await;

        Ok(report)
    }
}
