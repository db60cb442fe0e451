#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    middleware, Router,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use sha2::Sha256;
use storefront_api::{
    auth::JwtKeys,
    config::AppConfig,
    db,
    entities::{delivery_method, order, product, Order, OrderModel, Product},
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        commerce::OrderDetails,
        notifications::Notifier,
        payments::PaymentGateway,
    },
    session::{InMemorySessionStore, SessionId, SessionStore, SESSION_HEADER},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_integration_test_secret";
pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Notifier that records every confirmation it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_deliveries(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_order_confirmation(&self, order: &OrderDetails) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push(order.order.order_number.clone());
        !self.fail.load(Ordering::SeqCst)
    }
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub sessions: Arc<InMemorySessionStore>,
    pub notifier: Arc<RecordingNotifier>,
    _event_task: tokio::task::JoinHandle<()>,
}

pub struct TestOptions {
    pub webhook_secret: Option<String>,
    pub gateway: Option<Arc<dyn PaymentGateway>>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            gateway: None,
        }
    }
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_options(TestOptions::default()).await
    }

    pub async fn with_options(options: TestOptions) -> Self {
        storefront_api::telemetry::install_recorder();

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );
        // One connection keeps the in-memory database alive and shared.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        cfg.payment_webhook_secret = options.webhook_secret;
        cfg.notification_timeout_secs = 2;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let sessions = Arc::new(InMemorySessionStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let services = AppServices::new(
            db_arc.clone(),
            sessions.clone(),
            notifier.clone(),
            event_sender.clone(),
            &cfg,
        );

        let state = AppState {
            db: db_arc,
            jwt: Arc::new(JwtKeys::new(&cfg.jwt_secret)),
            config: cfg,
            event_sender,
            sessions: sessions.clone(),
            gateway: options.gateway,
            services,
        };

        let router = storefront_api::app_router(state.clone()).layer(middleware::from_fn(
            storefront_api::middleware_helpers::request_id_middleware,
        ));

        Self {
            router,
            state,
            sessions,
            notifier,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.state.jwt.issue(user_id, 3600).expect("issue token")
    }

    pub fn new_session(&self) -> SessionId {
        SessionId::parse(&Uuid::new_v4().simple().to_string()).expect("valid session id")
    }

    /// Send a request; returns status and JSON body (`Value::Null` when empty).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, String)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, json)
    }

    /// Posts a webhook payload signed with the test secret.
    pub async fn post_webhook(&self, payload: &Value) -> (StatusCode, Value) {
        let body = serde_json::to_vec(payload).expect("serialize webhook");
        let header = sign_webhook(&body, Utc::now().timestamp(), WEBHOOK_SECRET);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("Stripe-Signature", header)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("build webhook request");
        self.send(request).await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(format!("{} seeded for integration tests", name)),
            price: Set(price),
            stock_quantity: Set(stock),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product for tests")
    }

    pub async fn seed_delivery_method(
        &self,
        name: &str,
        price: Decimal,
        active: bool,
    ) -> delivery_method::Model {
        let now = Utc::now();
        delivery_method::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(String::new()),
            price: Set(price),
            is_active: Set(active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed delivery method for tests")
    }

    pub async fn update_product(&self, id: Uuid, f: impl FnOnce(&mut product::ActiveModel)) {
        let existing = Product::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists");
        let mut active: product::ActiveModel = existing.into();
        f(&mut active);
        active
            .update(&*self.state.db)
            .await
            .expect("update product");
    }

    pub async fn product_stock(&self, id: Uuid) -> i32 {
        Product::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
            .stock_quantity
    }

    pub async fn order(&self, order_number: &str) -> OrderModel {
        Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.state.db)
            .await
            .expect("query order")
            .expect("order exists")
    }

    pub async fn order_count(&self) -> usize {
        Order::find()
            .all(&*self.state.db)
            .await
            .expect("query orders")
            .len()
    }

    pub async fn set_guest_cart(&self, session: &SessionId, cart: Value) {
        self.sessions
            .set(session, storefront_api::session::GUEST_CART_KEY, cart)
            .await
            .expect("write guest cart");
    }

    pub async fn guest_cart(&self, session: &SessionId) -> Option<Value> {
        self.sessions
            .get(session, storefront_api::session::GUEST_CART_KEY)
            .await
            .expect("read guest cart")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn session_header(session: &SessionId) -> (&'static str, String) {
    (SESSION_HEADER, session.as_str().to_string())
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("authorization", format!("Bearer {}", token))
}

pub fn sign_webhook(body: &[u8], timestamp: i64, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(body);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

pub fn payment_event(event_type: &str, order_number: &str) -> Value {
    serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": {
            "object": {
                "id": format!("pi_{}", Uuid::new_v4().simple()),
                "metadata": { "order_number": order_number }
            }
        }
    })
}

pub fn shipping_json() -> Value {
    serde_json::json!({
        "full_name": "Ada Lovelace",
        "email": "ada@example.com",
        "phone_number": "+44 20 7946 0000",
        "address1": "1 Analytical Way",
        "address2": "",
        "city": "London",
        "state": "",
        "zipcode": "N1 9GU",
        "country": "GB"
    })
}

pub fn shipping_info() -> storefront_api::services::commerce::ShippingInfo {
    serde_json::from_value(shipping_json()).expect("valid shipping info")
}

/// Reads a JSON money amount; scale differs between backends so compare numerically.
pub fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a money value: {}", other),
    }
}

pub async fn settle(duration_ms: u64) {
    tokio::time::sleep(Duration::from_millis(duration_ms)).await;
}
