mod common;

use axum::http::{Method, StatusCode};
use common::{bearer, session_header, shipping_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::ConnectionTrait;
use serde_json::{json, Value};
use uuid::Uuid;

fn moved_address() -> Value {
    json!({
        "full_name": "Ada King",
        "email": "ada.king@example.com",
        "phone_number": "",
        "address1": "12 St James's Square",
        "address2": "Second floor",
        "city": "London",
        "state": "",
        "zipcode": "SW1Y 4JH",
        "country": "GB"
    })
}

async fn account_with_cart(app: &TestApp) -> ((&'static str, String), Uuid) {
    let widget = app.seed_product("Widget", dec!(10.00), 10).await;
    let standard = app.seed_delivery_method("Standard", dec!(4.99), true).await;
    let auth = bearer(&app.token_for(Uuid::new_v4()));
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": widget.id, "quantity": 1 })),
            &[auth.clone()],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    (auth, standard.id)
}

#[tokio::test]
async fn saved_address_edits_do_not_reach_placed_orders() {
    let app = TestApp::new().await;
    let (auth, method_id) = account_with_cart(&app).await;

    let (status, order) = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({
                "shipping": shipping_json(),
                "delivery_method_id": method_id,
                "save_address": true
            })),
            &[auth.clone()],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_number = order["order_number"].as_str().unwrap().to_string();

    let (status, saved) = app
        .request(Method::GET, "/api/v1/profile/shipping-address", None, &[auth.clone()])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["address1"], "1 Analytical Way");

    let (status, updated) = app
        .request(
            Method::PUT,
            "/api/v1/profile/shipping-address",
            Some(moved_address()),
            &[auth.clone()],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["address1"], "12 St James's Square");

    let (status, placed) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_number),
            None,
            &[auth],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(placed["shipping"], shipping_json());
    let stored = app.order(&order_number).await;
    assert_eq!(stored.shipping_address1, "1 Analytical Way");
    assert_eq!(stored.shipping_zipcode, "N1 9GU");
}

#[tokio::test]
async fn checkout_without_flag_leaves_profile_empty() {
    let app = TestApp::new().await;
    let (auth, method_id) = account_with_cart(&app).await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "shipping": shipping_json(), "delivery_method_id": method_id })),
            &[auth.clone()],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .request(Method::GET, "/api/v1/profile/shipping-address", None, &[auth])
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn profile_save_failure_does_not_fail_the_order() {
    let app = TestApp::new().await;
    let (auth, method_id) = account_with_cart(&app).await;
    app.state
        .db
        .execute_unprepared("DROP TABLE profile_shipping_addresses")
        .await
        .unwrap();

    let (status, order) = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({
                "shipping": shipping_json(),
                "delivery_method_id": method_id,
                "save_address": true
            })),
            &[auth],
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.order_count().await, 1);
    assert_eq!(order["status"], "PENDING");
}

#[tokio::test]
async fn guest_checkout_ignores_save_address() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", dec!(10.00), 10).await;
    let standard = app.seed_delivery_method("Standard", dec!(4.99), true).await;
    let guest = [session_header(&app.new_session())];
    app.request(
        Method::POST,
        "/api/v1/cart/items",
        Some(json!({ "product_id": widget.id })),
        &guest,
    )
    .await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({
                "shipping": shipping_json(),
                "delivery_method_id": standard.id,
                "save_address": true
            })),
            &guest,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn profile_endpoints_require_auth_and_valid_fields() {
    let app = TestApp::new().await;

    let (status, _) = app
        .request(Method::GET, "/api/v1/profile/shipping-address", None, &[])
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let auth = bearer(&app.token_for(Uuid::new_v4()));
    let mut invalid = moved_address();
    invalid["email"] = json!("not-an-email");
    invalid["zipcode"] = json!("");
    let (status, body) = app
        .request(
            Method::PUT,
            "/api/v1/profile/shipping-address",
            Some(invalid),
            &[auth.clone()],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["email", "zipcode"]);

    let (status, _) = app
        .request(Method::GET, "/api/v1/profile/shipping-address", None, &[auth])
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn checkout_form_prefills_saved_address_for_accounts_only() {
    let app = TestApp::new().await;
    app.seed_delivery_method("Standard", dec!(4.99), true).await;
    let auth = bearer(&app.token_for(Uuid::new_v4()));
    app.request(
        Method::PUT,
        "/api/v1/profile/shipping-address",
        Some(moved_address()),
        &[auth.clone()],
    )
    .await;

    let (status, form) = app
        .request(Method::GET, "/api/v1/checkout", None, &[auth])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(form["shipping"], moved_address());
    assert_eq!(form["delivery_methods"].as_array().unwrap().len(), 1);
    assert_eq!(form["cart"]["item_count"], 0);

    let guest = [session_header(&app.new_session())];
    let (status, form) = app
        .request(Method::GET, "/api/v1/checkout", None, &guest)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(form["shipping"].is_null());
}
