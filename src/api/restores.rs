//! Restore definition CRUD and job history.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use tracing::info;

use super::backups::DeleteQuery;
use super::jobs::{JobView, views};
use super::{ApiError, AppState, found};
use crate::model::{JobParent, NewRestoreDefinition, RestoreDefinition, RestoreId, RestoreUpdate};

async fn definition(state: &AppState, id: RestoreId) -> Result<RestoreDefinition, ApiError> {
    found(state.store.get_restore(id).await?, "restore definition", id)
}

pub(super) async fn create(
    State(state): State<AppState>,
    payload: Result<Json<NewRestoreDefinition>, JsonRejection>,
) -> Result<(StatusCode, Json<RestoreDefinition>), ApiError> {
    let Json(payload) = payload?;
    let stored = state.store.insert_restore(payload.normalise()?).await?;
    info!(restore_id = %stored.id, sr_uuid = %stored.sr_uuid, "restore definition created");
    Ok((StatusCode::CREATED, Json(stored)))
}

pub(super) async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<RestoreDefinition>>, ApiError> {
    Ok(Json(state.store.list_restores().await?))
}

pub(super) async fn fetch(
    State(state): State<AppState>,
    id: Result<Path<RestoreId>, PathRejection>,
) -> Result<Json<RestoreDefinition>, ApiError> {
    let Path(id) = id?;
    Ok(Json(definition(&state, id).await?))
}

pub(super) async fn update(
    State(state): State<AppState>,
    id: Result<Path<RestoreId>, PathRejection>,
    payload: Result<Json<RestoreUpdate>, JsonRejection>,
) -> Result<Json<RestoreDefinition>, ApiError> {
    let Path(id) = id?;
    let Json(update) = payload?;
    let current = definition(&state, id).await?;
    Ok(Json(state.store.update_restore(update.apply(&current)).await?))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    id: Result<Path<RestoreId>, PathRejection>,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    let Query(query) = query?;
    state.store.delete_restore(id, query.cascade).await?;
    info!(restore_id = %id, cascade = query.cascade, "restore definition removed");
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn jobs(
    State(state): State<AppState>,
    id: Result<Path<RestoreId>, PathRejection>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let Path(id) = id?;
    definition(&state, id).await?;
    let history = state.store.list_by_parent(JobParent::Restore(id)).await?;
    Ok(Json(views(&history)))
}
