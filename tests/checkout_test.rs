mod common;

use assert_matches::assert_matches;
use common::{shipping_info, TestApp};
use futures::future::join_all;
use rust_decimal_macros::dec;
use storefront_api::{
    entities::OrderStatus,
    errors::ServiceError,
    services::commerce::{CartLine, CartOwner, CartSnapshot, CartSource, ShippingInfo},
    session::SessionId,
};
use uuid::Uuid;

fn guest_snapshot(session: SessionId, lines: &[(Uuid, i32)]) -> CartSnapshot {
    CartSnapshot {
        source: CartSource::Guest {
            session_id: session,
        },
        lines: lines
            .iter()
            .map(|(product_id, quantity)| CartLine::Ephemeral {
                product_id: *product_id,
                quantity: *quantity,
            })
            .collect(),
        dropped: Vec::new(),
    }
}

#[tokio::test]
async fn guest_checkout_creates_pending_order_and_decrements_stock() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", dec!(10.00), 10).await;
    let standard = app.seed_delivery_method("Standard", dec!(4.99), true).await;
    let owner = CartOwner::Guest(app.new_session());
    app.state
        .services
        .cart
        .add_item(&owner, widget.id, 5)
        .await
        .unwrap();

    let snapshot = app.state.services.cart.snapshot(&owner).await.unwrap();
    let details = app
        .state
        .services
        .checkout
        .create_order(&snapshot, &shipping_info(), Some(standard.id), None, false)
        .await
        .unwrap();

    assert_eq!(details.order.status, OrderStatus::Pending);
    assert_eq!(details.order.order_total, dec!(54.99));
    assert_eq!(details.order.delivery_cost, dec!(4.99));
    assert_eq!(details.order.user_id, None);
    assert_eq!(details.order.cart_id, None);
    assert_eq!(details.order.order_number.len(), 32);
    assert_eq!(details.items.len(), 1);
    assert_eq!(details.items[0].quantity, 5);
    assert_eq!(details.items[0].price, dec!(10.00));
    assert_eq!(details.delivery_method_name.as_deref(), Some("Standard"));
    assert_eq!(app.product_stock(widget.id).await, 5);

    let stored = app.order(&details.order.order_number).await;
    assert_eq!(stored.order_total, dec!(54.99));
    assert_eq!(stored.status, OrderStatus::Pending);
}

#[tokio::test]
async fn account_checkout_records_owner_and_cart() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", dec!(3.33), 10).await;
    let gadget = app.seed_product("Gadget", dec!(0.10), 10).await;
    let standard = app.seed_delivery_method("Standard", dec!(0), true).await;
    let user_id = Uuid::new_v4();
    let owner = CartOwner::Account(user_id);
    let cart = &app.state.services.cart;
    cart.add_item(&owner, widget.id, 3).await.unwrap();
    cart.add_item(&owner, gadget.id, 7).await.unwrap();

    let snapshot = cart.snapshot(&owner).await.unwrap();
    let details = app
        .state
        .services
        .checkout
        .create_order(&snapshot, &shipping_info(), Some(standard.id), Some(user_id), false)
        .await
        .unwrap();

    assert_eq!(details.order.user_id, Some(user_id));
    assert_eq!(details.order.cart_id, snapshot.cart_id());
    assert!(details.order.cart_id.is_some());
    // 3 x 3.33 + 7 x 0.10
    assert_eq!(details.order.order_total, dec!(10.69));
    let line_sum: rust_decimal::Decimal = details.items.iter().map(|i| i.line_total).sum();
    assert_eq!(details.order.order_total, line_sum + details.order.delivery_cost);
    assert_eq!(app.product_stock(widget.id).await, 7);
    assert_eq!(app.product_stock(gadget.id).await, 3);
}

#[tokio::test]
async fn insufficient_stock_aborts_whole_order() {
    let app = TestApp::new().await;
    let plenty = app.seed_product("Plenty", dec!(1.00), 50).await;
    let scarce = app.seed_product("Scarce", dec!(10.00), 5).await;
    let standard = app.seed_delivery_method("Standard", dec!(4.99), true).await;
    let snapshot = guest_snapshot(app.new_session(), &[(plenty.id, 2), (scarce.id, 6)]);

    let err = app
        .state
        .services
        .checkout
        .create_order(&snapshot, &shipping_info(), Some(standard.id), None, false)
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::InsufficientStock { product_id, requested: 6, available: 5, .. }
            if product_id == scarce.id
    );
    assert_eq!(app.product_stock(plenty.id).await, 50);
    assert_eq!(app.product_stock(scarce.id).await, 5);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn unknown_or_inactive_product_is_unavailable() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", dec!(1.00), 5).await;
    let standard = app.seed_delivery_method("Standard", dec!(1.00), true).await;
    let ghost = Uuid::new_v4();

    let snapshot = guest_snapshot(app.new_session(), &[(widget.id, 1), (ghost, 1)]);
    let err = app
        .state
        .services
        .checkout
        .create_order(&snapshot, &shipping_info(), Some(standard.id), None, false)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ProductUnavailable(id) if id == ghost);
    assert_eq!(app.product_stock(widget.id).await, 5);

    app.update_product(widget.id, |p| p.is_active = sea_orm::Set(false))
        .await;
    let snapshot = guest_snapshot(app.new_session(), &[(widget.id, 1)]);
    assert_matches!(
        app.state
            .services
            .checkout
            .create_order(&snapshot, &shipping_info(), Some(standard.id), None, false)
            .await,
        Err(ServiceError::ProductUnavailable(_))
    );
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let standard = app.seed_delivery_method("Standard", dec!(1.00), true).await;
    let snapshot = guest_snapshot(app.new_session(), &[]);

    assert_matches!(
        app.state
            .services
            .checkout
            .create_order(&snapshot, &shipping_info(), Some(standard.id), None, false)
            .await,
        Err(ServiceError::EmptyCart)
    );
}

#[tokio::test]
async fn invalid_fields_are_reported_together() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", dec!(1.00), 5).await;
    let retired = app.seed_delivery_method("Freight", dec!(9.00), false).await;
    let snapshot = guest_snapshot(app.new_session(), &[(widget.id, 1)]);

    let shipping = ShippingInfo {
        full_name: String::new(),
        email: "not-an-email".into(),
        city: String::new(),
        ..shipping_info()
    };
    let err = app
        .state
        .services
        .checkout
        .create_order(&snapshot, &shipping, None, None, false)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidFields(ref fields) => {
        assert!(fields.contains("full_name"));
        assert!(fields.contains("email"));
        assert!(fields.contains("city"));
        assert!(fields.contains("delivery_method_id"));
        assert!(!fields.contains("country"));
    });

    let err = app
        .state
        .services
        .checkout
        .create_order(&snapshot, &shipping_info(), Some(retired.id), None, false)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidFields(ref fields) => {
        assert_eq!(fields.0.len(), 1);
        assert_eq!(fields.0[0].field, "delivery_method_id");
        assert_eq!(fields.0[0].message, "Select a valid delivery method.");
    });
    assert_eq!(app.product_stock(widget.id).await, 5);
}

#[tokio::test]
async fn order_keeps_prices_captured_at_checkout() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", dec!(10.00), 10).await;
    let standard = app.seed_delivery_method("Standard", dec!(4.99), true).await;
    let snapshot = guest_snapshot(app.new_session(), &[(widget.id, 2)]);
    let details = app
        .state
        .services
        .checkout
        .create_order(&snapshot, &shipping_info(), Some(standard.id), None, false)
        .await
        .unwrap();

    app.update_product(widget.id, |p| p.price = sea_orm::Set(dec!(99.00)))
        .await;

    let reloaded = app
        .state
        .services
        .orders
        .get_details(&details.order.order_number)
        .await
        .unwrap();
    assert_eq!(reloaded.items[0].price, dec!(10.00));
    assert_eq!(reloaded.items[0].line_total, dec!(20.00));
    assert_eq!(reloaded.order.order_total, dec!(24.99));
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell() {
    let app = TestApp::new().await;
    let scarce = app.seed_product("Scarce", dec!(5.00), 5).await;
    let standard = app.seed_delivery_method("Standard", dec!(1.00), true).await;
    let shipping = shipping_info();
    let method_id = standard.id;

    let snapshots: Vec<CartSnapshot> = (0..12)
        .map(|_| guest_snapshot(app.new_session(), &[(scarce.id, 1)]))
        .collect();
    let checkout = app.state.services.checkout.clone();
    let results = join_all(snapshots.iter().map(|snapshot| {
        let checkout = checkout.clone();
        let shipping = shipping.clone();
        async move {
            checkout
                .create_order(snapshot, &shipping, Some(method_id), None, false)
                .await
        }
    }))
    .await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 5);
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_matches!(failure, ServiceError::InsufficientStock { available: 0, .. });
    }
    assert_eq!(app.product_stock(scarce.id).await, 0);
    assert_eq!(app.order_count().await, 5);
}

#[tokio::test]
async fn order_numbers_are_unique() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", dec!(1.00), 100).await;
    let standard = app.seed_delivery_method("Standard", dec!(1.00), true).await;

    let mut numbers = std::collections::HashSet::new();
    for _ in 0..10 {
        let snapshot = guest_snapshot(app.new_session(), &[(widget.id, 1)]);
        let details = app
            .state
            .services
            .checkout
            .create_order(&snapshot, &shipping_info(), Some(standard.id), None, false)
            .await
            .unwrap();
        assert!(numbers.insert(details.order.order_number));
    }
}
