//! Storefront core: carts, checkout, orders and payment confirmation

pub mod cart_merge_service;
pub mod cart_service;
pub mod catalog_service;
pub mod checkout_service;
pub mod order_service;
pub mod payment_event_service;
pub mod profile_service;

pub use cart_merge_service::{CartMergeService, MergeReport};
pub use cart_service::{
    CartLine, CartLineView, CartOwner, CartSnapshot, CartSource, CartStore, CartView,
};
pub use catalog_service::CatalogService;
pub use checkout_service::{compute_total, CheckoutService, ShippingInfo};
pub use order_service::{ConfirmationOutcome, OrderDetails, OrderService, OrderView};
pub use payment_event_service::{
    verify_signature, HandledEvent, PaymentEvent, PaymentEventService, WebhookOutcome,
    SIGNATURE_HEADER,
};
pub use profile_service::ProfileService;
