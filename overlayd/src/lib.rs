use std::future::Future;
use std::sync::Arc;

use axum::extract::Request;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, Level};

use crate::config::Config;
use crate::error::AppError;
use crate::route::{hls, overlay, AppState};
use crate::service::database::DatabaseService;
use crate::stream::{FfmpegTranscoder, Registry, Transcoder};

pub mod config;
pub mod stream;

mod entity;
mod error;
mod migration;
mod result;
mod route;
mod service;
mod tick;

/// Runs the server with the transcoder named in `cfg.stream.program`.
pub async fn serve<F>(cfg: Config, listener: TcpListener, signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let transcoder = Arc::new(FfmpegTranscoder::new(cfg.stream.program.clone()));
    serve_with_transcoder(cfg, transcoder, listener, signal).await
}

pub async fn serve_with_transcoder<F>(
    cfg: Config,
    transcoder: Arc<dyn Transcoder>,
    listener: TcpListener,
    signal: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let database = DatabaseService::new(&cfg.database).await?;
    tokio::fs::create_dir_all(&cfg.stream.output_dir).await?;

    let app_state = AppState {
        config: cfg.clone(),
        database,
        registry: Arc::new(Registry::new(cfg.stream.clone(), transcoder)),
    };

    let app = Router::new()
        .route(api::path::HEALTH, get(health))
        .merge(overlay::route())
        .merge(route::stream::route())
        .merge(hls::route())
        .fallback(fallback)
        .with_state(app_state.clone())
        .layer(if cfg.http.cors {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        })
        .layer(axum::middleware::from_fn(http_log::print_request_response))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let span = info_span!(
                        "http_request",
                        uri = ?request.uri(),
                        method = ?request.method(),
                        span_id = tracing::field::Empty,
                    );
                    span.record(
                        "span_id",
                        span.id().unwrap_or(tracing::Id::from_u64(42)).into_u64(),
                    );
                    span
                })
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::DEBUG))
                .on_failure(tower_http::trace::DefaultOnFailure::new().level(Level::INFO)),
        );

    let reaper = (cfg.stream.idle_timeout > 0)
        .then(|| tokio::spawn(tick::reap_idle_sessions(app_state.clone())));

    info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .unwrap_or_else(|e| error!("Application error: {e}"));

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    app_state.registry.shutdown().await;
    Ok(())
}

async fn health() -> Json<api::response::Health> {
    Json(api::response::Health {
        status: "healthy".to_string(),
    })
}

async fn fallback() -> AppError {
    AppError::not_found("not found")
}
