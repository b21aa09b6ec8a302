use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use tracing::{error, info};

use api::overlay::OverlayKind;
use api::request::{CreateOverlay, UpdateOverlay};
use api::response::{Overlay, Success};

use crate::error::AppError;
use crate::result::Result;
use crate::route::AppState;
use crate::service::overlays::{NewOverlay, OverlayPatch, OverlaysService};

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::OVERLAYS, get(list_overlays).post(create_overlay))
        .route("/overlays/{id}", put(update_overlay).delete(delete_overlay))
}

async fn list_overlays(State(state): State<AppState>) -> Result<Json<Vec<Overlay>>> {
    let models = OverlaysService::find_all_ordered(state.database.get_connection())
        .await
        .map_err(database_error)?;

    let overlays = models
        .into_iter()
        .map(Overlay::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(overlays))
}

async fn create_overlay(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateOverlay>, JsonRejection>,
) -> Result<(StatusCode, Json<Overlay>)> {
    let Json(req) = payload.map_err(|e| AppError::invalid_request(e.body_text()))?;

    let (Some(kind), Some(content)) = (
        req.kind.filter(|k| !k.is_empty()),
        req.content.filter(|c| !c.is_empty()),
    ) else {
        return Err(AppError::invalid_request("type and content are required"));
    };

    let overlay = NewOverlay {
        kind: parse_kind(&kind)?,
        content,
        position: req.position.unwrap_or_default(),
        size: req.size.unwrap_or_default(),
    };

    let model = OverlaysService::insert(state.database.get_connection(), overlay)
        .await
        .map_err(database_error)?;
    info!("Created overlay {}", model.id);

    Ok((StatusCode::CREATED, Json(Overlay::try_from(model)?)))
}

async fn update_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<UpdateOverlay>, JsonRejection>,
) -> Result<Json<Overlay>> {
    let Json(req) = payload.map_err(|e| AppError::invalid_request(e.body_text()))?;

    let patch = OverlayPatch {
        kind: req.kind.as_deref().map(parse_kind).transpose()?,
        content: req.content,
        position: req.position,
        size: req.size,
    };

    let model = OverlaysService::update_by_id(state.database.get_connection(), &id, patch)
        .await
        .map_err(database_error)?
        .ok_or_else(|| AppError::not_found("Overlay not found"))?;

    Ok(Json(Overlay::try_from(model)?))
}

async fn delete_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Success>> {
    let removed = OverlaysService::delete_by_id(state.database.get_connection(), &id)
        .await
        .map_err(database_error)?;
    if removed > 0 {
        info!("Deleted overlay {}", id);
    }
    Ok(Json(Success { success: true }))
}

fn parse_kind(kind: &str) -> Result<OverlayKind> {
    kind.parse()
        .map_err(|_| AppError::invalid_request("type must be either text or image"))
}

fn database_error(e: anyhow::Error) -> AppError {
    error!("Overlay store failure: {:?}", e);
    AppError::DatabaseError(e.to_string())
}
