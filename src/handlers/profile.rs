use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::success_response,
    services::commerce::ShippingInfo,
    AppState,
};

pub fn profile_routes() -> Router<AppState> {
    Router::new().route(
        "/profile/shipping-address",
        get(get_shipping_address).put(put_shipping_address),
    )
}

/// The caller's saved shipping address
#[utoipa::path(
    get,
    path = "/api/v1/profile/shipping-address",
    summary = "Get saved shipping address",
    responses(
        (status = 200, description = "Saved address", body = ShippingInfo),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "No address saved yet", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Profile"
)]
pub async fn get_shipping_address(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let address = state
        .services
        .profile
        .shipping_address(user.user_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("no saved shipping address".to_string()))?;
    Ok(success_response(address))
}

/// Replace the caller's saved shipping address
#[utoipa::path(
    put,
    path = "/api/v1/profile/shipping-address",
    summary = "Save shipping address",
    description = "Placed orders keep the address they were created with",
    request_body = ShippingInfo,
    responses(
        (status = 200, description = "Saved address", body = ShippingInfo),
        (status = 400, description = "Invalid fields", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Profile"
)]
pub async fn put_shipping_address(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ShippingInfo>,
) -> Result<impl IntoResponse, ServiceError> {
    let saved = state
        .services
        .profile
        .save_shipping_address(user.user_id, &payload)
        .await?;
    Ok(success_response(saved))
}
