use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::{
    services::ServeDir,
    trace::TraceLayer,
    compression::CompressionLayer,
    limit::RequestBodyLimitLayer,
    cors::{AllowOrigin, CorsLayer},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::handlers::{health_check, upload_file, FILES_ROUTE};
use crate::middleware::add_security_headers;
use crate::state::AppState;
use crate::utils::shutdown_signal;
use crate::config::Config;
use crate::ws::ws_handler;

// uploaded files under /files, the web client for everything else
pub fn build_static_router(config: &Config) -> Router {
    tracing::debug!(
        "Serving uploads from {:?} and client from {:?}",
        config.files_dir,
        config.static_dir
    );
    Router::new()
        .nest_service(FILES_ROUTE, ServeDir::new(&config.files_dir))
        .fallback_service(
            ServeDir::new(&config.static_dir)
                .append_index_html_on_directories(true)
                .precompressed_gzip()
                .precompressed_br()
        )
        .layer(axum::middleware::from_fn(add_security_headers))
        .layer(CompressionLayer::new()
            .gzip(true)
            .br(true)
            .zstd(true)
        )
}

/// upload endpoint with body limit and per-ip rate limiting
pub fn build_upload_router(state: Arc<AppState>, config: &Config) -> Router {
    tracing::debug!("Building upload router with max upload size: {} bytes", config.max_upload_size);

    let router = Router::new()
        .route("/upload", post(upload_file))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_size));

    let governor_conf = GovernorConfigBuilder::default()
        .per_second(config.rate_limit_per_second)
        .burst_size(config.rate_limit_burst)
        .finish();

    let router = match governor_conf {
        Some(conf) => router.layer(GovernorLayer { config: Arc::new(conf) }),
        None => {
            tracing::warn!("⚠️  Rate limit values must be non-zero, upload rate limiting disabled");
            router
        }
    };

    router.with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins = if config.cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .cors_origins
                .iter()
                .filter_map(|o| match HeaderValue::from_str(o) {
                    Ok(v) => Some(v),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid CORS origin {:?}", o);
                        None
                    }
                }),
        )
    };

    CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_origin(origins)
        .allow_headers(tower_http::cors::Any)
}

/// full application router
pub fn build_router(state: Arc<AppState>, config: &Config) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .with_state(state.clone())
        .merge(build_upload_router(state, config))
        .merge(build_static_router(config))
        .layer(cors_layer(config))
        .layer(TraceLayer::new_for_http())
}

/// serve until a shutdown signal arrives
pub async fn start_server(app: Router, addr: SocketAddr) -> std::io::Result<()> {
    tracing::info!("Starting server...");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!("Listener bound to {}", addr);

    tracing::info!("Server running and ready to accept connections");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .tcp_nodelay(true)
    .await
}

/// print startup banner with server info
pub fn print_startup_banner(config: &Config) {
    tracing::info!("stagecast starting...");
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("📡 SESSION: ws://{}:{}/ws", config.host, config.port);
    tracing::info!("📤 UPLOADS: http://{}:{}/upload", config.host, config.port);
    tracing::info!("📁 Storing uploads in: {:?}", config.files_dir.canonicalize().unwrap_or(config.files_dir.clone()));
    tracing::info!("⏱️  Host transfer timeout: {}s", config.transfer_timeout.as_secs());
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
