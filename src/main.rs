use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{routing::get, Router};
use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing::{error, info, warn};

use storefront_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);
    api::handlers::health::init_start_time();
    if api::telemetry::install_recorder().is_none() {
        warn!("Prometheus recorder unavailable; /metrics will report 503");
    }

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    tokio::spawn(api::events::process_events(event_rx));

    // Session store for guest carts
    let sessions: Arc<dyn api::session::SessionStore> = if cfg.uses_redis_sessions() {
        let url = cfg
            .redis_url
            .as_deref()
            .context("redis_url is required for the redis session backend")?;
        let ttl = (cfg.session_ttl_secs > 0).then(|| Duration::from_secs(cfg.session_ttl_secs));
        let store =
            api::session::RedisSessionStore::connect(url, cfg.session_namespace.clone(), ttl)
                .await
                .context("failed to connect to the redis session store")?;
        info!("Using redis session store");
        Arc::new(store)
    } else {
        info!("Using in-memory session store");
        Arc::new(api::session::InMemorySessionStore::new())
    };

    // Outbound collaborators
    let notifier: Arc<dyn api::services::notifications::Notifier> =
        match cfg.notification_endpoint.as_deref() {
            Some(endpoint) => {
                info!(endpoint, "Order confirmations are posted over HTTP");
                Arc::new(api::services::notifications::HttpNotifier::new(
                    endpoint,
                    Duration::from_secs(cfg.notification_timeout_secs),
                )?)
            }
            None => {
                info!("Order confirmations are written to the log");
                Arc::new(api::services::notifications::LogNotifier)
            }
        };
    let gateway: Option<Arc<dyn api::services::payments::PaymentGateway>> =
        match cfg.stripe_secret_key.as_deref() {
            Some(key) => Some(Arc::new(api::services::payments::StripeGateway::new(
                cfg.stripe_api_base.clone(),
                key,
            )?)),
            None => {
                warn!("stripe_secret_key not set; payment intents are unavailable");
                None
            }
        };
    if cfg.payment_webhook_secret.is_none() {
        warn!("payment_webhook_secret not set; payment webhooks will be rejected");
    }

    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        sessions.clone(),
        notifier,
        event_sender.clone(),
        &cfg,
    );

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        sessions,
        jwt: Arc::new(api::auth::JwtKeys::new(&cfg.jwt_secret)),
        gateway,
        services,
    };

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        CorsLayer::permissive()
    } else {
        error!("Missing CORS configuration detected; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        anyhow::bail!(
            "Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true"
        );
    };

    let app = Router::new()
        .route("/", get(|| async { "storefront-api up" }))
        .merge(api::app_router(app_state))
        // HTTP tracing layer for consistent request/response telemetry
        .layer(api::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            api::middleware_helpers::request_id_middleware,
        ));

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
