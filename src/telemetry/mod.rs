//! Prometheus exposition for the `metrics` counters recorded across the services.

use std::sync::OnceLock;

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

use crate::AppState;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Installs the process-wide Prometheus recorder once and returns its handle.
///
/// Returns `None` when another recorder was installed first; counters then go
/// to that recorder and `/metrics` reports 503.
pub fn install_recorder() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            match metrics::set_boxed_recorder(Box::new(recorder)) {
                Ok(()) => {
                    info!("Prometheus metrics recorder installed");
                    Some(handle)
                }
                Err(e) => {
                    warn!("Metrics recorder already installed: {}", e);
                    None
                }
            }
        })
        .clone()
}

async fn metrics_handler() -> impl IntoResponse {
    match HANDLE.get().and_then(Option::as_ref) {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE)],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, CONTENT_TYPE)],
            String::from("metrics recorder not installed"),
        ),
    }
}

pub fn metrics_routes() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics_handler))
}
