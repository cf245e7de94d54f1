//! Backup definition CRUD plus job history and retention views.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::jobs::{JobView, views};
use super::{ApiError, AppState, found};
use crate::model::{BackupDefinition, BackupId, BackupUpdate, JobParent, NewBackupDefinition};
use crate::retention::retained_backups;

/// Query accepted by the delete endpoints.
#[derive(Debug, Default, Deserialize)]
pub(super) struct DeleteQuery {
    #[serde(default)]
    pub(super) cascade: bool,
}

/// Retained artifacts of one definition.
#[derive(Debug, Serialize)]
pub(super) struct RetainedView {
    backup_id: BackupId,
    name: String,
    vm_uuid: String,
    sr_uuid: String,
    retention: u32,
    jobs: Vec<JobView>,
}

async fn definition(state: &AppState, id: BackupId) -> Result<BackupDefinition, ApiError> {
    found(state.store.get_backup(id).await?, "backup definition", id)
}

pub(super) async fn create(
    State(state): State<AppState>,
    payload: Result<Json<NewBackupDefinition>, JsonRejection>,
) -> Result<(StatusCode, Json<BackupDefinition>), ApiError> {
    let Json(payload) = payload?;
    let stored = state.store.insert_backup(payload.normalise()?).await?;
    info!(backup_id = %stored.id, vm_uuid = %stored.vm_uuid, "backup definition created");
    Ok((StatusCode::CREATED, Json(stored)))
}

pub(super) async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<BackupDefinition>>, ApiError> {
    Ok(Json(state.store.list_backups().await?))
}

pub(super) async fn fetch(
    State(state): State<AppState>,
    id: Result<Path<BackupId>, PathRejection>,
) -> Result<Json<BackupDefinition>, ApiError> {
    let Path(id) = id?;
    Ok(Json(definition(&state, id).await?))
}

pub(super) async fn update(
    State(state): State<AppState>,
    id: Result<Path<BackupId>, PathRejection>,
    payload: Result<Json<BackupUpdate>, JsonRejection>,
) -> Result<Json<BackupDefinition>, ApiError> {
    let Path(id) = id?;
    let Json(update) = payload?;
    let current = definition(&state, id).await?;
    let updated = update.apply(&current)?;
    Ok(Json(state.store.update_backup(updated).await?))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    id: Result<Path<BackupId>, PathRejection>,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    let Query(query) = query?;
    state.store.delete_backup(id, query.cascade).await?;
    info!(backup_id = %id, cascade = query.cascade, "backup definition removed");
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn jobs(
    State(state): State<AppState>,
    id: Result<Path<BackupId>, PathRejection>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let Path(id) = id?;
    definition(&state, id).await?;
    let history = state.store.list_by_parent(JobParent::Backup(id)).await?;
    Ok(Json(views(&history)))
}

/// The newest successful backups still considered current.
pub(super) async fn retained(
    State(state): State<AppState>,
    id: Result<Path<BackupId>, PathRejection>,
) -> Result<Json<RetainedView>, ApiError> {
    let Path(id) = id?;
    let definition = definition(&state, id).await?;
    let history = state.store.list_by_parent(JobParent::Backup(id)).await?;
    let jobs = views(retained_backups(&history, definition.retention));
    Ok(Json(RetainedView {
        backup_id: definition.id,
        name: definition.name,
        vm_uuid: definition.vm_uuid,
        sr_uuid: definition.sr_uuid,
        retention: definition.retention,
        jobs,
    }))
}
