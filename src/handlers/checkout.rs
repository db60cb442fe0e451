use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::MaybeUser,
    entities::DeliveryMethodModel,
    errors::ServiceError,
    handlers::common::{created_response, success_response},
    services::commerce::{CartOwner, CartView, OrderView, ShippingInfo},
    session::SessionId,
    AppState,
};

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/delivery-methods", get(list_delivery_methods))
        .route("/checkout", get(checkout_form).post(checkout))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub shipping: ShippingInfo,
    pub delivery_method_id: Option<Uuid>,
    /// Store `shipping` as the account's default address (ignored for guests)
    #[serde(default)]
    pub save_address: bool,
}

/// Everything needed to render the checkout form
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutForm {
    pub cart: CartView,
    pub delivery_methods: Vec<DeliveryMethodModel>,
    /// Saved profile address of a signed-in caller
    pub shipping: Option<ShippingInfo>,
}

/// Active delivery methods, cheapest first
#[utoipa::path(
    get,
    path = "/api/v1/delivery-methods",
    summary = "List delivery methods",
    responses((status = 200, description = "Active delivery methods", body = [DeliveryMethodModel])),
    tag = "Checkout"
)]
pub async fn list_delivery_methods(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let methods = state.services.catalog.list_active_delivery_methods().await?;
    Ok(success_response(methods))
}

/// Checkout form data, prefilled from the caller's saved address
#[utoipa::path(
    get,
    path = "/api/v1/checkout",
    summary = "Checkout form",
    params(("x-session-id" = Option<String>, Header, description = "Guest session identifier")),
    responses(
        (status = 200, description = "Cart, delivery methods and saved address", body = CheckoutForm),
        (status = 401, description = "Invalid token", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn checkout_form(
    State(state): State<AppState>,
    user: MaybeUser,
    session: Option<SessionId>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = match CartOwner::resolve(user.0, session) {
        Some(owner) => state.services.cart.view(&owner).await?,
        None => CartView::empty(),
    };
    let shipping = match user.0 {
        Some(user_id) => state.services.profile.shipping_address(user_id).await?,
        None => None,
    };
    Ok(success_response(CheckoutForm {
        cart,
        delivery_methods: state.services.catalog.list_active_delivery_methods().await?,
        shipping,
    }))
}

/// Place an order from the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Checkout",
    description = "Creates a PENDING order, decrementing stock for every line in one transaction",
    request_body = CheckoutRequest,
    params(("x-session-id" = Option<String>, Header, description = "Guest session identifier")),
    responses(
        (status = 201, description = "Order created", body = OrderView),
        (status = 400, description = "Empty cart or invalid fields", body = crate::errors::ErrorResponse),
        (status = 409, description = "Insufficient stock or unavailable product", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: MaybeUser,
    session: Option<SessionId>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let owner = CartOwner::resolve(user.0, session).ok_or(ServiceError::EmptyCart)?;
    let snapshot = state.services.cart.snapshot(&owner).await?;
    let details = state
        .services
        .checkout
        .create_order(
            &snapshot,
            &payload.shipping,
            payload.delivery_method_id,
            user.0,
            payload.save_address,
        )
        .await?;
    Ok(created_response(OrderView::from(&details)))
}
