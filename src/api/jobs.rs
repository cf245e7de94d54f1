//! Job lookups and the wire shape of a job record.

use axum::Json;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{ApiError, AppState, found};
use crate::model::{BackupId, Job, JobId, JobKind, JobStatus, RestoreId};

/// A job as returned by the API.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct JobView {
    /// Storage key.
    pub id: JobId,
    /// Globally unique identifier.
    pub job_uuid: Uuid,
    /// Backup or restore.
    pub kind: JobKind,
    /// Current state.
    pub status: JobStatus,
    /// Captured output or error text.
    pub output: String,
    /// Artifact written or read.
    pub artifact_path: Option<String>,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// Completion time, present once terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Owning backup definition.
    pub backup_id: Option<BackupId>,
    /// Owning restore definition.
    pub restore_id: Option<RestoreId>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_uuid: job.uuid,
            kind: job.kind(),
            status: job.status,
            output: job.output.clone(),
            artifact_path: job.artifact_path.clone(),
            started_at: job.started_at,
            completed_at: job.completed_at,
            backup_id: job.parent.backup_id(),
            restore_id: job.parent.restore_id(),
        }
    }
}

pub(super) fn views<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Vec<JobView> {
    jobs.into_iter().map(JobView::from).collect()
}

pub(super) async fn fetch(
    State(state): State<AppState>,
    job_uuid: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<JobView>, ApiError> {
    let Path(job_uuid) = job_uuid?;
    let job = found(state.store.find_by_uuid(job_uuid).await?, "job", job_uuid)?;
    Ok(Json(JobView::from(&job)))
}
