//! Router assembly and server lifecycle.

use crate::config::Settings;
use crate::error::{Endpoint, ProxyError};
use crate::handlers::{app, image, metrics, story};
use crate::middleware::metrics::metrics_middleware;
use crate::services::ImageGateway;
use crate::AppState;
use axum::{
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::any::Any;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// A handler panic still answers with the proxy envelope.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!(details = %details, "Handler panicked");
    ProxyError::internal(Endpoint::Server, "panic", "Internal server error")
        .with("details", details)
        .into_response()
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(app::health_check))
        .route("/metrics", get(metrics::metrics))
        // Image proxy
        .route("/api/image/ping", get(image::ping))
        .route("/api/image/submit", post(image::submit))
        .route("/api/image/status/", get(image::status_without_job_id))
        .route("/api/image/status/:job_id", get(image::status))
        .route("/api/image/result/", get(image::result_without_job_id))
        .route("/api/image/result/:job_id", get(image::result))
        // Story templates
        .route(
            "/api/story",
            get(story::list_topics).post(story::create_story),
        )
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Bind the listener and wire the router. Port 0 picks a free port,
    /// which is what the integration tests use.
    pub async fn build(settings: Settings) -> Result<Self, AppError> {
        let gateway = ImageGateway::new(&settings.image_api).map_err(|e| {
            tracing::error!("Failed to build upstream HTTP client: {}", e);
            AppError::InternalError(e.into())
        })?;

        if gateway.is_configured() {
            tracing::info!(base_url = %gateway.base_url(), "Image API client initialized");
        } else {
            tracing::warn!(
                base_url = %gateway.base_url(),
                "IMAGE_API_KEY not configured - image endpoints will answer 500"
            );
        }

        let router = build_router(AppState::new(gateway));

        let address = format!("{}:{}", settings.server.host, settings.server.port);
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", address, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until SIGINT or SIGTERM, then drain in-flight requests.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!("Starting nestory-frontend on port {}", self.port);
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}
