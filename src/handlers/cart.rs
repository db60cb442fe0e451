use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{AuthUser, MaybeUser},
    errors::ServiceError,
    handlers::common::{success_response, validate_input},
    services::commerce::{CartOwner, CartView, MergeReport},
    session::{SessionId, SESSION_HEADER},
    AppState,
};

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(view_cart))
        .route("/cart/items", post(add_cart_item))
        .route("/cart/items/:product_id", delete(remove_cart_item))
        .route("/cart/merge", post(merge_cart))
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub quantity: i32,
}

fn require_owner(user: MaybeUser, session: Option<SessionId>) -> Result<CartOwner, ServiceError> {
    CartOwner::resolve(user.0, session).ok_or_else(|| {
        ServiceError::BadRequest(format!(
            "anonymous cart requests need an {} header",
            SESSION_HEADER
        ))
    })
}

/// View the caller's cart
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "View cart",
    description = "Account cart when authenticated, otherwise the guest cart of the session",
    params(("x-session-id" = Option<String>, Header, description = "Guest session identifier")),
    responses(
        (status = 200, description = "Cart contents", body = CartView),
        (status = 401, description = "Invalid token", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn view_cart(
    State(state): State<AppState>,
    user: MaybeUser,
    session: Option<SessionId>,
) -> Result<impl IntoResponse, ServiceError> {
    let view = match CartOwner::resolve(user.0, session) {
        Some(owner) => state.services.cart.view(&owner).await?,
        None => CartView::empty(),
    };
    Ok(success_response(view))
}

/// Add a product to the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    summary = "Add cart item",
    request_body = AddItemRequest,
    params(("x-session-id" = Option<String>, Header, description = "Guest session identifier")),
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 400, description = "Invalid quantity or missing session", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Not enough stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn add_cart_item(
    State(state): State<AppState>,
    user: MaybeUser,
    session: Option<SessionId>,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let owner = require_owner(user, session)?;
    let view = state
        .services
        .cart
        .add_item(&owner, payload.product_id, payload.quantity)
        .await?;
    Ok(success_response(view))
}

/// Remove a product line from the caller's cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{product_id}",
    summary = "Remove cart item",
    params(
        ("product_id" = Uuid, Path, description = "Product to remove"),
        ("x-session-id" = Option<String>, Header, description = "Guest session identifier")
    ),
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 400, description = "Missing session", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    user: MaybeUser,
    session: Option<SessionId>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let owner = require_owner(user, session)?;
    let view = state.services.cart.remove_item(&owner, product_id).await?;
    Ok(success_response(view))
}

/// Fold the session's guest cart into the account cart; called right after login
#[utoipa::path(
    post,
    path = "/api/v1/cart/merge",
    summary = "Merge guest cart",
    description = "Always answers 200; a failed merge leaves the guest cart in place and reports failed=true",
    params(("x-session-id" = Option<String>, Header, description = "Guest session identifier")),
    responses(
        (status = 200, description = "Merge report", body = MergeReport),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn merge_cart(
    State(state): State<AppState>,
    user: AuthUser,
    session: Option<SessionId>,
) -> Result<impl IntoResponse, ServiceError> {
    let report = match session {
        Some(session) => state.services.cart_merge.merge(&session, user.user_id).await,
        None => MergeReport::default(),
    };
    Ok(success_response(report))
}
