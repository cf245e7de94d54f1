//! Endpoints that run a backup or restore and wait for the result.
//!
//! Both answer 200 whether the job succeeded or failed; the report's
//! `status` carries the outcome.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::model::BackupId;
use crate::workflow::{JobReport, RestoreRequest};

/// Body of `POST /api/backup`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct BackupRequest {
    backup_id: BackupId,
}

pub(super) async fn backup(
    State(state): State<AppState>,
    payload: Result<Json<BackupRequest>, JsonRejection>,
) -> Result<Json<JobReport>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.orchestrator.run_backup(request.backup_id).await?))
}

pub(super) async fn restore(
    State(state): State<AppState>,
    payload: Result<Json<RestoreRequest>, JsonRejection>,
) -> Result<Json<JobReport>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.orchestrator.run_restore(request).await?))
}
