//! Storefront API Library
//!
//! Guest and account carts, transactional checkout and webhook-driven
//! payment confirmation for the storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod session;
pub mod telemetry;
pub mod tracing;

use axum::{extract::FromRef, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::{auth::JwtKeys, services::payments::PaymentGateway, session::SessionStore};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub sessions: Arc<dyn SessionStore>,
    pub jwt: Arc<JwtKeys>,
    pub gateway: Option<Arc<dyn PaymentGateway>>,
    pub services: handlers::AppServices,
}

impl FromRef<AppState> for Arc<JwtKeys> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

/// Routes mounted under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .merge(handlers::cart::cart_routes())
        .merge(handlers::checkout::checkout_routes())
        .merge(handlers::orders::order_routes())
        .merge(handlers::profile::profile_routes())
        // Signature-verified rather than authenticated
        .merge(handlers::payment_webhooks::webhook_routes())
}

/// Full application router without the outer middleware stack
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(handlers::health::health_routes())
        .merge(telemetry::metrics_routes())
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
        .merge(openapi::swagger_ui())
}
