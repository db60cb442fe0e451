use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront API

Carts, checkout and payment confirmation for the storefront.

## Identity

Authenticated calls carry `Authorization: Bearer <jwt>`. Anonymous shoppers identify
their guest cart with the `x-session-id` header. After login the client calls
`POST /api/v1/cart/merge` with both headers to move the guest cart into the account cart.

## Payments

`POST /api/v1/orders/{order_number}/payment-intent` returns the gateway client secret.
Order status only changes when the gateway calls `POST /api/v1/payments/webhook`.

## Errors

```json
{
  "error": "Conflict",
  "message": "Insufficient stock for Widget: requested 5, available 3",
  "request_id": "7b0c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "Cart", description = "Guest and account carts"),
        (name = "Checkout", description = "Delivery methods and order placement"),
        (name = "Orders", description = "Order detail, payment initialisation and confirmation"),
        (name = "Payments", description = "Payment gateway webhooks"),
        (name = "Profile", description = "Saved account shipping address")
    ),
    paths(
        crate::handlers::cart::view_cart,
        crate::handlers::cart::add_cart_item,
        crate::handlers::cart::remove_cart_item,
        crate::handlers::cart::merge_cart,
        crate::handlers::checkout::list_delivery_methods,
        crate::handlers::checkout::checkout_form,
        crate::handlers::checkout::checkout,
        crate::handlers::orders::get_order,
        crate::handlers::orders::create_payment_intent,
        crate::handlers::orders::confirm_order,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::profile::get_shipping_address,
        crate::handlers::profile::put_shipping_address,
    ),
    components(
        schemas(
            crate::handlers::cart::AddItemRequest,
            crate::handlers::checkout::CheckoutRequest,
            crate::handlers::checkout::CheckoutForm,
            crate::services::commerce::ShippingInfo,
            crate::handlers::orders::ConfirmationRequest,
            crate::handlers::payment_webhooks::WebhookAck,
            crate::services::commerce::CartView,
            crate::services::commerce::MergeReport,
            crate::services::commerce::OrderView,
            crate::services::commerce::ConfirmationOutcome,
            crate::services::payments::PaymentIntent,
            crate::errors::ErrorResponse,
            crate::errors::FieldError
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_storefront_paths() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/checkout"));
        assert!(json.contains("/api/v1/payments/webhook"));
        assert!(json.contains("Bearer"));
    }
}
