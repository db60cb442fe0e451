pub mod cart;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod profile;

use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        commerce::{
            CartMergeService, CartStore, CatalogService, CheckoutService, OrderService,
            PaymentEventService, ProfileService,
        },
        notifications::Notifier,
    },
    session::SessionStore,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub cart: Arc<CartStore>,
    pub cart_merge: Arc<CartMergeService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub payment_events: Arc<PaymentEventService>,
    pub profile: Arc<ProfileService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        let catalog = Arc::new(CatalogService::new(db_pool.clone()));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            sessions.clone(),
            event_sender.clone(),
        ));

        Self {
            cart: Arc::new(CartStore::new(
                db_pool.clone(),
                sessions.clone(),
                catalog.clone(),
            )),
            cart_merge: Arc::new(CartMergeService::new(
                db_pool.clone(),
                sessions,
                event_sender.clone(),
            )),
            checkout: Arc::new(CheckoutService::new(db_pool.clone(), event_sender.clone())),
            profile: Arc::new(ProfileService::new(db_pool.clone())),
            payment_events: Arc::new(PaymentEventService::new(
                db_pool,
                orders.clone(),
                notifier,
                event_sender,
                config.payment_webhook_secret.clone(),
                config.payment_webhook_tolerance_secs,
                Duration::from_secs(config.notification_timeout_secs),
            )),
            catalog,
            orders,
        }
    }
}
