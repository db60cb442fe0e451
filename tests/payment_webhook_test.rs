mod common;

use assert_matches::assert_matches;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::Utc;
use common::{payment_event, shipping_info, sign_webhook, TestApp, TestOptions, WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::{
    entities::{OrderModel, OrderStatus},
    services::commerce::{CartLine, CartSnapshot, CartSource, WebhookOutcome},
};

async fn pending_order(app: &TestApp) -> OrderModel {
    let widget = app.seed_product("Widget", dec!(10.00), 10).await;
    let standard = app.seed_delivery_method("Standard", dec!(4.99), true).await;
    let snapshot = CartSnapshot {
        source: CartSource::Guest {
            session_id: app.new_session(),
        },
        lines: vec![CartLine::Ephemeral {
            product_id: widget.id,
            quantity: 2,
        }],
        dropped: Vec::new(),
    };
    app.state
        .services
        .checkout
        .create_order(&snapshot, &shipping_info(), Some(standard.id), None, false)
        .await
        .unwrap()
        .order
}

fn signed(payload: &serde_json::Value) -> (String, Vec<u8>) {
    let body = serde_json::to_vec(payload).unwrap();
    (sign_webhook(&body, Utc::now().timestamp(), WEBHOOK_SECRET), body)
}

#[tokio::test]
async fn success_moves_pending_to_processing_and_notifies_once() {
    let app = TestApp::new().await;
    let order = pending_order(&app).await;
    let event = payment_event("payment_intent.succeeded", &order.order_number);
    let (signature, body) = signed(&event);
    let service = &app.state.services.payment_events;

    let first = service.handle(Some(&signature), &body).await.unwrap();
    assert_eq!(
        first.outcome,
        WebhookOutcome::Transitioned {
            from: OrderStatus::Pending,
            to: OrderStatus::Processing
        }
    );
    assert!(first.notification.unwrap().await.unwrap());
    assert_eq!(app.order(&order.order_number).await.status, OrderStatus::Processing);

    // Replayed delivery of the same event
    let replay = service.handle(Some(&signature), &body).await.unwrap();
    assert_eq!(
        replay.outcome,
        WebhookOutcome::Ignored {
            current: OrderStatus::Processing
        }
    );
    assert!(replay.notification.is_none());
    assert_eq!(app.notifier.sent(), vec![order.order_number.clone()]);
}

#[tokio::test]
async fn failure_moves_pending_to_failed_without_notification() {
    let app = TestApp::new().await;
    let order = pending_order(&app).await;
    let mut event = payment_event("payment_intent.payment_failed", &order.order_number);
    event["data"]["object"]["last_payment_error"] = json!({ "message": "card declined" });
    let (signature, body) = signed(&event);

    let handled = app
        .state
        .services
        .payment_events
        .handle(Some(&signature), &body)
        .await
        .unwrap();

    assert_eq!(
        handled.outcome,
        WebhookOutcome::Transitioned {
            from: OrderStatus::Pending,
            to: OrderStatus::Failed
        }
    );
    assert!(handled.notification.is_none());
    assert_eq!(app.order(&order.order_number).await.status, OrderStatus::Failed);
    assert!(app.notifier.sent().is_empty());
}

#[tokio::test]
async fn late_success_after_failure_is_ignored() {
    let app = TestApp::new().await;
    let order = pending_order(&app).await;
    let service = &app.state.services.payment_events;

    let (sig, body) = signed(&payment_event(
        "payment_intent.payment_failed",
        &order.order_number,
    ));
    service.handle(Some(&sig), &body).await.unwrap();

    let (sig, body) = signed(&payment_event("payment_intent.succeeded", &order.order_number));
    let late = service.handle(Some(&sig), &body).await.unwrap();
    assert_eq!(
        late.outcome,
        WebhookOutcome::Ignored {
            current: OrderStatus::Failed
        }
    );
    assert_eq!(app.order(&order.order_number).await.status, OrderStatus::Failed);
}

#[tokio::test]
async fn concurrent_duplicate_deliveries_transition_once() {
    let app = TestApp::new().await;
    let order = pending_order(&app).await;
    let (signature, body) = signed(&payment_event(
        "payment_intent.succeeded",
        &order.order_number,
    ));
    let service = app.state.services.payment_events.clone();

    let (a, b) = tokio::join!(
        service.handle(Some(&signature), &body),
        service.handle(Some(&signature), &body)
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let transitions = outcomes
        .iter()
        .filter(|h| matches!(h.outcome, WebhookOutcome::Transitioned { .. }))
        .count();
    assert_eq!(transitions, 1);
    for handled in outcomes {
        if let Some(task) = handled.notification {
            task.await.unwrap();
        }
    }
    assert_eq!(app.notifier.sent().len(), 1);
    assert_eq!(app.order(&order.order_number).await.status, OrderStatus::Processing);
}

#[tokio::test]
async fn notifier_failure_keeps_committed_transition() {
    let app = TestApp::new().await;
    app.notifier.fail_deliveries();
    let order = pending_order(&app).await;
    let (signature, body) = signed(&payment_event(
        "payment_intent.succeeded",
        &order.order_number,
    ));

    let handled = app
        .state
        .services
        .payment_events
        .handle(Some(&signature), &body)
        .await
        .unwrap();
    assert!(!handled.notification.unwrap().await.unwrap());
    assert_eq!(app.order(&order.order_number).await.status, OrderStatus::Processing);
}

#[tokio::test]
async fn unknown_order_and_unhandled_types_are_acknowledged() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post_webhook(&payment_event("payment_intent.succeeded", "NO-SUCH-ORDER"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"]["kind"], "order_not_found");

    let (status, body) = app
        .post_webhook(&payment_event("charge.refunded", "whatever"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["kind"], "unhandled_event_type");
    assert_eq!(body["outcome"]["event_type"], "charge.refunded");

    let mut no_metadata = payment_event("payment_intent.succeeded", "");
    no_metadata["data"]["object"]["metadata"] = json!({});
    let (status, body) = app.post_webhook(&no_metadata).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["kind"], "missing_order_number");
}

#[tokio::test]
async fn webhook_over_http_reports_transition() {
    let app = TestApp::new().await;
    let order = pending_order(&app).await;

    let (status, body) = app
        .post_webhook(&payment_event("payment_intent.succeeded", &order.order_number))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["kind"], "transitioned");
    assert_eq!(body["outcome"]["from"], "PENDING");
    assert_eq!(body["outcome"]["to"], "PROCESSING");
}

#[tokio::test]
async fn bad_signature_is_rejected_without_side_effects() {
    let app = TestApp::new().await;
    let order = pending_order(&app).await;
    let body =
        serde_json::to_vec(&payment_event("payment_intent.succeeded", &order.order_number))
            .unwrap();

    let forged = sign_webhook(&body, Utc::now().timestamp(), "whsec_wrong");
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/payments/webhook")
        .header("Stripe-Signature", forged)
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let stale = sign_webhook(&body, Utc::now().timestamp() - 3600, WEBHOOK_SECRET);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/payments/webhook")
        .header("Stripe-Signature", stale)
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/payments/webhook")
        .body(Body::from(body))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(app.order(&order.order_number).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn malformed_payload_is_bad_request() {
    let app = TestApp::new().await;
    let body = b"{not json".to_vec();
    let signature = sign_webhook(&body, Utc::now().timestamp(), WEBHOOK_SECRET);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/payments/webhook")
        .header("Stripe-Signature", signature)
        .body(Body::from(body))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_secret_rejects_every_delivery() {
    let app = TestApp::with_options(TestOptions {
        webhook_secret: None,
        ..TestOptions::default()
    })
    .await;
    let order = pending_order(&app).await;
    let (signature, body) = signed(&payment_event(
        "payment_intent.succeeded",
        &order.order_number,
    ));

    let err = app
        .state
        .services
        .payment_events
        .handle(Some(&signature), &body)
        .await
        .unwrap_err();
    assert_matches!(err, storefront_api::errors::ServiceError::Unauthorized(_));
    assert_eq!(app.order(&order.order_number).await.status, OrderStatus::Pending);
}
