use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::MaybeUser,
    errors::ServiceError,
    handlers::common::success_response,
    services::{
        commerce::{ConfirmationOutcome, OrderView},
        payments::PaymentIntent,
    },
    session::SessionId,
    AppState,
};

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders/:order_number", get(get_order))
        .route(
            "/orders/:order_number/payment-intent",
            post(create_payment_intent),
        )
        .route("/orders/:order_number/confirmation", post(confirm_order))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfirmationRequest {
    pub redirect_status: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_number}",
    summary = "Get order",
    params(("order_number" = String, Path, description = "Public order number")),
    responses(
        (status = 200, description = "Order detail", body = OrderView),
        (status = 403, description = "Order belongs to another account", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(order_number): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state
        .services
        .orders
        .get_for_viewer(&order_number, user.0)
        .await?;
    Ok(success_response(OrderView::from(&details)))
}

/// Initialise payment for a PENDING order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_number}/payment-intent",
    summary = "Create payment intent",
    params(("order_number" = String, Path, description = "Public order number")),
    responses(
        (status = 200, description = "Gateway client secret", body = PaymentIntent),
        (status = 400, description = "Order total is zero", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order belongs to another account", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is no longer pending", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway failure", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(order_number): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let gateway = state.gateway.clone().ok_or_else(|| {
        ServiceError::ExternalServiceError("payment gateway is not configured".to_string())
    })?;
    let intent = state
        .services
        .orders
        .create_payment_intent(&order_number, user.0, gateway.as_ref(), &state.config.currency)
        .await?;
    Ok(success_response(intent))
}

/// Landing step after the gateway redirect; clears the purchased cart on success
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_number}/confirmation",
    summary = "Confirm order after payment redirect",
    request_body = ConfirmationRequest,
    params(
        ("order_number" = String, Path, description = "Public order number"),
        ("x-session-id" = Option<String>, Header, description = "Guest session identifier")
    ),
    responses(
        (status = 200, description = "Order status and cart clearing result", body = ConfirmationOutcome),
        (status = 403, description = "Order belongs to another account", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn confirm_order(
    State(state): State<AppState>,
    user: MaybeUser,
    session: Option<SessionId>,
    Path(order_number): Path<String>,
    Json(payload): Json<ConfirmationRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .services
        .orders
        .confirm(
            &order_number,
            &payload.redirect_status,
            user.0,
            session.as_ref(),
        )
        .await?;
    Ok(success_response(outcome))
}
