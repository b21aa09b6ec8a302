use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use api::request::StreamRequest;
use api::response::{StreamSession, StreamUrl, Success};

use crate::error::AppError;
use crate::result::Result;
use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::STREAM, post(create_stream).delete(delete_stream))
        .route(api::path::STREAMS, get(list_streams))
}

async fn create_stream(
    State(state): State<AppState>,
    payload: std::result::Result<Json<StreamRequest>, JsonRejection>,
) -> Result<Json<StreamUrl>> {
    let rtsp_url = rtsp_url(payload)?;
    let (hls_url, created) = state.registry.get_or_create(&rtsp_url).await?;
    if created {
        info!("Stream {} available at {}", rtsp_url, hls_url);
    }
    Ok(Json(StreamUrl { hls_url }))
}

async fn delete_stream(
    State(state): State<AppState>,
    payload: std::result::Result<Json<StreamRequest>, JsonRejection>,
) -> Result<Json<Success>> {
    let rtsp_url = rtsp_url(payload)?;
    if state.registry.terminate(&rtsp_url).await? {
        info!("Stream {} terminated", rtsp_url);
    }
    Ok(Json(Success { success: true }))
}

async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamSession>> {
    let sessions = state
        .registry
        .sessions()
        .await
        .into_iter()
        .map(|s| StreamSession {
            rtsp_url: s.source_url.clone(),
            hls_url: s.public_url.clone(),
            token: s.token.clone(),
            created_at: s.created_at,
        })
        .collect();
    Json(sessions)
}

fn rtsp_url(payload: std::result::Result<Json<StreamRequest>, JsonRejection>) -> Result<String> {
    let Json(req) = payload.map_err(|e| AppError::invalid_request(e.body_text()))?;
    req.rtsp_url
        .filter(|url| !url.is_empty())
        .ok_or_else(|| AppError::invalid_request("rtsp_url is required"))
}
