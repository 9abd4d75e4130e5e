//! HTTP server for the NeuroScan classification service.
//!
//! Provides REST endpoints for classifying MRI images through the remote
//! model and for normalizing raw model payloads directly.
//!
//! Features:
//! - Per-IP rate limiting with automatic eviction when the map exceeds 10k entries
//! - JSONL access logging with size-based rotation (configurable via `max_access_log_bytes`)
//! - Usage counters split by label and by model/fallback source
//! - Structured logging via [`tracing`]

pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod types;

pub use handlers::MAX_BODY_BYTES;
pub use logging::{RecordEvent, UsageMetrics, METRICS_PERSIST_INTERVAL_SECS};
pub use types::{
    ClassifyResponse, EndpointStats, HealthResponse, LabelStats, NormalizeResponse, RequestStats,
    ServerConfig, SourceStats, StatsResponse,
};

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use eyre::{Result, WrapErr};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::info;

use crate::gateway::{ClassifierGateway, GradioGateway};

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

pub struct ServerState {
    pub config: ServerConfig,
    pub gateway: Arc<dyn ClassifierGateway>,
    pub start_time: Instant,
    pub rate_limiters: Mutex<LruCache<IpAddr, Arc<middleware::IpRateLimiter>>>,
    pub usage: UsageMetrics,
}

impl ServerState {
    /// Build state around the Gradio gateway described by `config.gateway`.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let gateway = GradioGateway::new(config.gateway.clone())
            .wrap_err("Failed to initialize classifier gateway")?;
        Ok(Self::with_gateway(config, Arc::new(gateway)))
    }

    /// Build state around any gateway implementation.
    pub fn with_gateway(config: ServerConfig, gateway: Arc<dyn ClassifierGateway>) -> Self {
        let usage = UsageMetrics::new(
            &config.access_log_path,
            config.max_access_log_bytes,
            config.metrics_path.as_deref(),
        );
        Self {
            config,
            gateway,
            start_time: Instant::now(),
            rate_limiters: middleware::new_rate_limiter_cache(),
            usage,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

/// Assemble the application router.
///
/// Must be served with `into_make_service_with_connect_info::<SocketAddr>()`;
/// the rate limiter keys on the peer address.
pub fn router(state: Arc<ServerState>) -> axum::Router {
    use axum::{
        extract::DefaultBodyLimit,
        middleware as axum_mw,
        routing::{get, post},
        Router,
    };
    use tower_http::cors::{Any, CorsLayer};

    let api_routes = Router::new()
        .route("/api/v1/classify", post(handlers::classify_handler))
        .route("/api/v1/normalize", post(handlers::normalize_handler))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ));

    // CORS layer — the dashboard front end calls from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/stats", get(handlers::stats_handler))
        .merge(api_routes)
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Run the HTTP server until SIGINT/SIGTERM.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let rate_limit_rpm = config.rate_limit_rpm;
    let bind_addr = config.bind_addr;
    let access_log = config.access_log_path.clone();
    let state = Arc::new(ServerState::new(config)?);
    let app = router(state.clone());

    // Spawn background task to persist metrics to disk periodically
    let metrics_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            METRICS_PERSIST_INTERVAL_SECS,
        ));
        loop {
            interval.tick().await;
            metrics_state.usage.persist_to_disk();
        }
    });

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", bind_addr))?;
    info!(bind = %bind_addr, "NeuroScan server listening");
    info!("Endpoints: GET /health, GET /stats, POST /api/v1/classify, POST /api/v1/normalize");
    info!(gateway = %state.gateway.target(), fallback_policy = state.config.fallback_policy.as_str(), "classifier gateway configured");
    if rate_limit_rpm > 0 {
        info!(rate_limit_rpm, "rate limiting enabled");
    } else {
        info!("rate limiting disabled");
    }
    info!(access_log = %access_log);

    let shutdown = shutdown_signal()?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        state.usage.persist_to_disk();
    })
    .await?;
    Ok(())
}

/// Install SIGINT/SIGTERM handlers and return a future that resolves on
/// the first signal. Must be called inside a Tokio runtime.
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .wrap_err("Failed to install SIGTERM handler")?;

    Ok(async move {
        #[cfg(unix)]
        let sigterm_recv = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_recv = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down gracefully"),
            _ = sigterm_recv => info!("received SIGTERM, shutting down gracefully"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FallbackPolicy;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            gateway: "http://localhost:7860/predict".to_string(),
            uptime_seconds: 100,
            fallback_policy: FallbackPolicy::Synthesize,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"fallback_policy\":\"synthesize\""));
    }

    #[test]
    fn test_stats_response_serialization() {
        let response = StatsResponse {
            uptime_seconds: 3600,
            requests: RequestStats {
                total: 100,
                errors: 2,
            },
            labels: LabelStats {
                glioma: 30,
                meningioma: 20,
                pituitary: 10,
                no_tumor: 38,
            },
            sources: SourceStats {
                model: 95,
                fallback: 3,
            },
            endpoints: EndpointStats {
                classify: 90,
                normalize: 10,
                stats: 5,
            },
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"total\":100"));
        assert!(json.contains("\"no_tumor\":38"));
        assert!(json.contains("\"fallback\":3"));
    }

    #[test]
    fn test_error_response_omits_finding() {
        let json = serde_json::to_value(ClassifyResponse::error("bad image", 3)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "bad image");
        assert!(json.get("finding").is_none());
        assert!(json.get("source").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_signal_installs_without_panicking() {
        let shutdown = shutdown_signal();
        assert!(shutdown.is_ok());
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.fallback_policy, FallbackPolicy::Synthesize);
        assert_eq!(config.rate_limit_rpm, 60);
        assert!(config.metrics_path.is_none());
    }
}
