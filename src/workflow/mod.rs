//! Backup and restore controllers.
//!
//! Each request is resolved and validated first; nothing is written to the
//! ledger until every referenced record is known to exist. From then on the
//! attempt runs on its own task so a caller that goes away cannot strand a
//! job outside a terminal state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::admission::{VmKey, VmLocks};
use crate::model::{
    BackupDefinition, BackupId, Host, Job, JobId, JobOutcome, JobParent, JobStatus, RestoreId,
    ValidationError, require_identifier, require_text,
};
use crate::remote::RemoteExecutor;
use crate::retention::latest_backup;
use crate::store::{LedgerError, Store, StoreError};

mod backup;
mod restore;
mod steps;

pub use crate::retention::LatestBackupPolicy;

use backup::BackupPlan;
use restore::RestorePlan;
use steps::StepRunner;

/// Where export artifacts live on the hosts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArtifactLayout {
    mount_root: String,
    subdirectory: String,
}

impl ArtifactLayout {
    /// Builds a layout rooted at `mount_root`, storing artifacts in
    /// `subdirectory` of each storage repository.
    #[must_use]
    pub fn new(mount_root: &str, subdirectory: &str) -> Self {
        Self {
            mount_root: mount_root.trim_end_matches('/').to_owned(),
            subdirectory: subdirectory.trim_matches('/').to_owned(),
        }
    }

    /// Directory holding a VM's artifacts on a storage repository.
    #[must_use]
    pub fn directory(&self, sr_uuid: &str, vm_uuid: &str) -> String {
        format!(
            "{}/{sr_uuid}/{}/{vm_uuid}",
            self.mount_root, self.subdirectory
        )
    }

    /// Artifact written by the backup job `job_uuid`.
    #[must_use]
    pub fn artifact_path(&self, sr_uuid: &str, vm_uuid: &str, job_uuid: Uuid) -> String {
        format!("{}/{job_uuid}.xva", self.directory(sr_uuid, vm_uuid))
    }
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self::new("/run/sr-mount", "xcp-backups")
    }
}

/// Settings shared by both controllers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WorkflowSettings {
    /// Artifact locations.
    pub layout: ArtifactLayout,
    /// Which backups a "latest backup" restore may use.
    pub latest_policy: LatestBackupPolicy,
}

/// Result of an orchestration attempt, returned for both outcomes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct JobReport {
    /// Storage key of the job.
    pub job_id: JobId,
    /// Job UUID.
    pub job_uuid: Uuid,
    /// Terminal status.
    pub status: JobStatus,
    /// Captured output or error text.
    pub output: String,
    /// Artifact written or read.
    pub artifact_path: Option<String>,
}

impl From<Job> for JobReport {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            job_uuid: job.uuid,
            status: job.status,
            output: job.output,
            artifact_path: job.artifact_path,
        }
    }
}

/// A restore request as received from the API.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RestoreRequest {
    /// Address of the host that performs the import.
    pub host_ip: String,
    /// Storage repository receiving the VM.
    pub sr_uuid: String,
    /// Restore definition supplying the import flags.
    pub restore_id: RestoreId,
    /// Whether to use the latest backup rather than an explicit job.
    #[serde(default = "latest_by_default")]
    pub is_latest_backup: bool,
    /// Backup definition to draw from; defaults to the restore definition's.
    #[serde(default)]
    pub backup_id: Option<BackupId>,
    /// Explicit source backup job, required when `is_latest_backup` is off.
    #[serde(default)]
    pub job_uuid: Option<Uuid>,
}

const fn latest_by_default() -> bool {
    true
}

/// Errors that stop a request before or outside a job.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The request is malformed; no job was created.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A referenced record does not exist; no job was created.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Record kind.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
    /// Reading the registries failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The ledger refused a write; the job may be left non-terminal.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The task running the attempt panicked or was cancelled.
    #[error("orchestration task ended abnormally: {0}")]
    Interrupted(String),
}

impl WorkflowError {
    fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Drives backups and restores against the store and the remote executor.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn Store>,
    executor: Arc<dyn RemoteExecutor>,
    locks: VmLocks,
    settings: WorkflowSettings,
}

struct ResolvedRestore {
    host: Host,
    restore_id: RestoreId,
    source_vm: String,
    plan: RestorePlan,
}

impl Orchestrator {
    /// Wires a controller.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<dyn RemoteExecutor>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            executor,
            locks: VmLocks::new(),
            settings,
        }
    }

    /// Runs a backup of the given definition.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NotFound`] when the definition or its host is
    /// missing, and [`WorkflowError::Ledger`] when the job cannot be
    /// recorded. Remote failures are reported through the returned job.
    pub async fn run_backup(&self, backup_id: BackupId) -> Result<JobReport, WorkflowError> {
        let definition = self
            .store
            .get_backup(backup_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("backup definition", backup_id))?;
        let host = self
            .store
            .get_host(definition.host_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("host", definition.host_id))?;

        let span = info_span!("backup", backup_id = %backup_id, host = %host.address);
        let this = self.clone();
        let task = tokio::spawn(async move { this.backup_job(definition, host).await }.instrument(span));
        task.await
            .map_err(|err| WorkflowError::Interrupted(err.to_string()))?
    }

    /// Runs a restore.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Validation`] for malformed requests and
    /// [`WorkflowError::NotFound`] when the host, restore definition, backup
    /// definition, or source job cannot be resolved; no job is created in
    /// either case.
    pub async fn run_restore(&self, request: RestoreRequest) -> Result<JobReport, WorkflowError> {
        let resolved = self.resolve_restore(request).await?;
        let span = info_span!(
            "restore",
            restore_id = %resolved.restore_id,
            host = %resolved.host.address
        );
        let this = self.clone();
        let task = tokio::spawn(async move { this.restore_job(resolved).await }.instrument(span));
        task.await
            .map_err(|err| WorkflowError::Interrupted(err.to_string()))?
    }

    async fn backup_job(
        &self,
        definition: BackupDefinition,
        host: Host,
    ) -> Result<JobReport, WorkflowError> {
        let _permit = self
            .locks
            .acquire(VmKey::new(&host.address, &definition.vm_uuid))
            .await;

        let job = self.store.create(JobParent::Backup(definition.id)).await?;
        info!(job_uuid = %job.uuid, vm_uuid = %definition.vm_uuid, "backup job started");

        let layout = &self.settings.layout;
        let plan = BackupPlan::new(
            &definition.vm_uuid,
            job.uuid,
            layout.directory(&definition.sr_uuid, &definition.vm_uuid),
            layout.artifact_path(&definition.sr_uuid, &definition.vm_uuid, job.uuid),
        );
        self.start(&job, &plan.artifact_path).await?;

        let target = host.target();
        let mut steps = StepRunner::new(self.executor.as_ref(), &target, job.uuid);
        let outcome = backup::execute(&mut steps, &plan).await;
        self.finish(job.uuid, outcome).await
    }

    async fn restore_job(&self, resolved: ResolvedRestore) -> Result<JobReport, WorkflowError> {
        let _permit = self
            .locks
            .acquire(VmKey::new(&resolved.host.address, &resolved.source_vm))
            .await;

        let job = self
            .store
            .create(JobParent::Restore(resolved.restore_id))
            .await?;
        info!(
            job_uuid = %job.uuid,
            artifact = %resolved.plan.artifact_path,
            sr_uuid = %resolved.plan.sr_uuid,
            "restore job started"
        );
        self.start(&job, &resolved.plan.artifact_path).await?;

        let target = resolved.host.target();
        let mut steps = StepRunner::new(self.executor.as_ref(), &target, job.uuid);
        let outcome = restore::execute(&mut steps, &resolved.plan).await;
        self.finish(job.uuid, outcome).await
    }

    /// Moves a fresh job to `Running`, failing it if the ledger refuses.
    async fn start(&self, job: &Job, artifact_path: &str) -> Result<(), WorkflowError> {
        if let Err(err) = self
            .store
            .mark_running(job.uuid, Some(artifact_path.to_owned()))
            .await
        {
            error!(job_uuid = %job.uuid, error = %err, "could not mark job running");
            self.store
                .complete(job.uuid, JobOutcome::Failed(err.to_string()))
                .await?;
            return Err(err.into());
        }
        Ok(())
    }

    async fn finish(&self, job_uuid: Uuid, outcome: JobOutcome) -> Result<JobReport, WorkflowError> {
        let job = self
            .store
            .complete(job_uuid, outcome)
            .await
            .inspect_err(|err| {
                error!(%job_uuid, error = %err, "could not record job outcome");
            })?;
        info!(%job_uuid, status = %job.status, "job finished");
        Ok(JobReport::from(job))
    }

    async fn resolve_restore(&self, request: RestoreRequest) -> Result<ResolvedRestore, WorkflowError> {
        let host_ip = require_text(&request.host_ip, "host_ip")?;
        let sr_uuid = require_identifier(&request.sr_uuid, "sr_uuid")?;

        let host = self
            .store
            .find_host_by_address(&host_ip)
            .await?
            .ok_or_else(|| WorkflowError::not_found("host", &host_ip))?;
        let restore_definition = self
            .store
            .get_restore(request.restore_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("restore definition", request.restore_id))?;

        let (source_job, source_definition) = if request.is_latest_backup {
            let backup_id = request
                .backup_id
                .or(restore_definition.backup_id)
                .ok_or_else(|| {
                    ValidationError::new(
                        "backup_id",
                        "is required when is_latest_backup is set and the restore definition has no backup",
                    )
                })?;
            let definition = self
                .store
                .get_backup(backup_id)
                .await?
                .ok_or_else(|| WorkflowError::not_found("backup definition", backup_id))?;
            let history = self
                .store
                .list_by_parent(JobParent::Backup(backup_id))
                .await?;
            let latest = latest_backup(&history, self.settings.latest_policy)
                .cloned()
                .ok_or_else(|| {
                    WorkflowError::not_found("backup job", format!("for definition {backup_id}"))
                })?;
            (latest, definition)
        } else {
            let job_uuid = request.job_uuid.ok_or_else(|| {
                ValidationError::new("job_uuid", "is required when is_latest_backup is false")
            })?;
            let job = self
                .store
                .find_by_uuid(job_uuid)
                .await?
                .ok_or_else(|| WorkflowError::not_found("backup job", job_uuid))?;
            let backup_id = job
                .parent
                .backup_id()
                .ok_or_else(|| WorkflowError::not_found("backup job", job_uuid))?;
            let definition = self
                .store
                .get_backup(backup_id)
                .await?
                .ok_or_else(|| WorkflowError::not_found("backup definition", backup_id))?;
            (job, definition)
        };

        let artifact_path = source_job.artifact_path.clone().unwrap_or_else(|| {
            self.settings.layout.artifact_path(
                &source_definition.sr_uuid,
                &source_definition.vm_uuid,
                source_job.uuid,
            )
        });

        Ok(ResolvedRestore {
            host,
            restore_id: restore_definition.id,
            source_vm: source_definition.vm_uuid,
            plan: RestorePlan {
                artifact_path,
                sr_uuid,
                preserve: restore_definition.preserve,
                power_on: restore_definition.power_on_after_restore,
            },
        })
    }
}
