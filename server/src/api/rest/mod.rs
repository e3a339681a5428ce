//! REST API module.
//!
//! Thin translation layer between HTTP and the storage engine: handlers
//! authenticate, parse, call one engine operation, and map the result onto
//! the wire shapes.

mod auth;
mod chunks;
mod error;
mod files;
mod types;
mod users;
mod versions;

use crate::api::AppState;
use axum::extract::DefaultBodyLimit;
use axum::http::header;
use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// How long in-flight handlers get to drain after a shutdown signal.
const DRAIN_SECONDS: u64 = 10;

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.listen_addr;

    // The transport-level cap sits above the per-chunk limit the PUT handler
    // enforces, so an oversize chunk gets a 400 rather than a connection
    // error.
    let body_limit = DefaultBodyLimit::max((state.config.max_chunk_bytes() as usize) * 2);

    let x_request_id = header::HeaderName::from_static("x-request-id");

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let app = Router::new()
        .merge(auth::auth_routes())
        .merge(users::user_routes())
        .merge(files::file_routes())
        .merge(versions::version_routes())
        .merge(chunks::chunk_routes())
        .layer(body_limit)
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(trace_layer)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for SIGINT or SIGTERM, then arm a drain watchdog so a hung handler
/// cannot keep the process alive past the deadline.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT, draining");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, draining");
        },
    }

    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_secs(DRAIN_SECONDS)).await;
        tracing::warn!("drain deadline reached, exiting");
        std::process::exit(1);
    });
}
