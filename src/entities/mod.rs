//! Storefront entities

pub mod cart;
pub mod cart_item;
pub mod delivery_method;
pub mod order;
pub mod order_item;
pub mod product;
pub mod profile_shipping_address;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use delivery_method::{Entity as DeliveryMethod, Model as DeliveryMethodModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus, PaymentOutcome};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use profile_shipping_address::{
    Entity as ProfileShippingAddress, Model as ProfileShippingAddressModel,
};
