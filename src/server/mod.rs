use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::any::Any;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod routes;

pub use error::ApiError;

use crate::config::Config;
use crate::download::Downloader;
use crate::extractors::{self, MetadataSource};
use crate::search::{SearchProvider, YtDlpSearch};

/// Shared application context, built once at startup
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub metadata: Arc<dyn MetadataSource>,
    pub search: Arc<dyn SearchProvider>,
    pub downloader: Downloader,
    /// Process-wide scratch directory, removed on shutdown
    pub temp_dir: Arc<TempDir>,
}

impl AppContext {
    /// Build the context from configuration, probing for the metadata source
    pub async fn new(config: Config) -> Result<Self> {
        let metadata = extractors::select_source(&config).await;
        let search = Arc::new(YtDlpSearch::new(&config.tools.ytdlp_path));
        let temp_dir = create_temp_dir(config.app.temp_dir.as_deref())?;
        Ok(Self::with_sources(config, metadata, search, temp_dir))
    }

    /// Build the context around explicit collaborators
    pub fn with_sources(
        config: Config,
        metadata: Arc<dyn MetadataSource>,
        search: Arc<dyn SearchProvider>,
        temp_dir: TempDir,
    ) -> Self {
        let downloader = Downloader::new(&config, metadata.clone());
        Self {
            config: Arc::new(config),
            metadata,
            search,
            downloader,
            temp_dir: Arc::new(temp_dir),
        }
    }

    pub fn dev_mode(&self) -> bool {
        self.config.server.dev_mode
    }
}

/// Create the process-wide temporary directory
pub fn create_temp_dir(parent: Option<&Path>) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("tubetone-");

    let temp_dir = match parent {
        Some(parent) => {
            fs_err::create_dir_all(parent)?;
            builder.tempdir_in(parent)
        }
        None => builder.tempdir(),
    }
    .context("Failed to create temporary directory")?;

    tracing::info!("Temporary directory: {}", temp_dir.path().display());
    Ok(temp_dir)
}

/// Create the Axum router with all routes
///
/// Fails when the configured CORS origin is not a valid header value.
pub fn create_router(ctx: AppContext) -> Result<Router> {
    let cors = match ctx.config.server.cors_origin.as_deref() {
        Some(origin) => {
            let origin = origin
                .parse::<HeaderValue>()
                .with_context(|| format!("Invalid CORS origin: {:?}", origin))?;
            CorsLayer::new().allow_origin(origin)
        }
        None => CorsLayer::new().allow_origin(AnyOrigin),
    }
    .allow_methods([Method::GET])
    .allow_headers([header::CONTENT_TYPE])
    .expose_headers([header::CONTENT_DISPOSITION]);

    let router = Router::new()
        .route("/api/search", get(routes::search))
        .route("/api/video/{id}", get(routes::video_info))
        .route("/api/download/{id}", get(routes::download))
        .route("/api/health", get(routes::health))
        .fallback(routes::not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(ctx);

    Ok(router)
}

/// Last-resort boundary: a panicking handler still gets a JSON 500
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!("Handler panicked: {}", message);

    ApiError::internal("Internal server error").into_response()
}

/// Start the HTTP server
pub async fn start_server(ctx: AppContext) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                ctx.config.server.host, ctx.config.server.port
            )
        })?;

    let app = create_router(ctx)?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
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
            Ok(mut sig) => {
                sig.recv().await;
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
