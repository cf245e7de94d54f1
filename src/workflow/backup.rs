//! Snapshot, export, and cleanup of one VM.

use tracing::warn;
use uuid::Uuid;

use super::steps::{StepFailure, StepRunner, append_cleanup_note, first_value};
use crate::model::JobOutcome;
use crate::remote::RemoteCommand;

/// Everything the backup sequence needs, resolved before the job starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct BackupPlan {
    pub(crate) vm_uuid: String,
    pub(crate) snapshot_label: String,
    pub(crate) directory: String,
    pub(crate) artifact_path: String,
}

impl BackupPlan {
    pub(crate) fn new(vm_uuid: &str, job_uuid: Uuid, directory: String, artifact_path: String) -> Self {
        Self {
            vm_uuid: vm_uuid.to_owned(),
            snapshot_label: job_uuid.to_string(),
            directory,
            artifact_path,
        }
    }
}

pub(crate) fn snapshot_command(vm_uuid: &str, label: &str) -> RemoteCommand {
    RemoteCommand::xe("vm-snapshot")
        .param("uuid", vm_uuid)
        .param("new-name-label", label)
}

pub(crate) fn snapshot_lookup_command(label: &str) -> RemoteCommand {
    RemoteCommand::xe("snapshot-list")
        .param("name-label", label)
        .arg("--minimal")
}

pub(crate) fn unmark_template_command(snapshot_uuid: &str) -> RemoteCommand {
    RemoteCommand::xe("template-param-set")
        .flag("is-a-template", false)
        .flag("ha-always-run", false)
        .param("uuid", snapshot_uuid)
}

pub(crate) fn create_directory_command(directory: &str) -> RemoteCommand {
    RemoteCommand::new("mkdir").arg("-p").arg(directory)
}

pub(crate) fn export_command(snapshot_uuid: &str, artifact_path: &str) -> RemoteCommand {
    RemoteCommand::xe("vm-export")
        .param("uuid", snapshot_uuid)
        .param("filename", artifact_path)
        .flag("compress", true)
}

pub(crate) fn uninstall_command(snapshot_uuid: &str) -> RemoteCommand {
    RemoteCommand::xe("snapshot-uninstall")
        .param("snapshot-uuid", snapshot_uuid)
        .flag("force", true)
}

/// Runs the backup sequence. Once a snapshot exists it is always
/// uninstalled, whatever happened after it was taken.
pub(crate) async fn execute(steps: &mut StepRunner<'_>, plan: &BackupPlan) -> JobOutcome {
    let created = match steps
        .run(
            "vm-snapshot",
            &snapshot_command(&plan.vm_uuid, &plan.snapshot_label),
        )
        .await
    {
        Ok(created) => created,
        Err(failure) => return abandon_snapshot(steps, &failure).await,
    };

    let listed = steps
        .run(
            "snapshot-list",
            &snapshot_lookup_command(&plan.snapshot_label),
        )
        .await;
    let resolved = listed
        .as_ref()
        .ok()
        .and_then(|stdout| first_value(stdout))
        .or_else(|| first_value(&created));
    let Some(snapshot_uuid) = resolved else {
        let failure = listed.err().unwrap_or_else(|| {
            StepFailure::new(
                "snapshot-list",
                format!("no snapshot labelled {}", plan.snapshot_label),
            )
        });
        return JobOutcome::Failed(failure.to_string());
    };

    let exported = match listed {
        Ok(_) => export_snapshot(steps, plan, &snapshot_uuid).await,
        Err(failure) => Err(failure),
    };
    let cleanup = steps
        .run("snapshot-uninstall", &uninstall_command(&snapshot_uuid))
        .await;

    match (exported, cleanup) {
        (Ok(()), Ok(_)) => JobOutcome::Success(steps.success_output(&plan.artifact_path, None)),
        (Ok(()), Err(cleanup)) => {
            warn!(snapshot = %snapshot_uuid, error = %cleanup, "export succeeded but snapshot was left behind");
            let note = format!("warning: {} failed: {cleanup}", cleanup.step());
            JobOutcome::Success(steps.success_output(&plan.artifact_path, Some(&note)))
        }
        (Err(failure), cleanup) => {
            JobOutcome::Failed(append_cleanup_note(failure.to_string(), cleanup.err().as_ref()))
        }
    }
}

/// The snapshot step reported a failure. If it still printed a snapshot
/// uuid, that snapshot exists and is uninstalled before giving up.
async fn abandon_snapshot(steps: &mut StepRunner<'_>, failure: &StepFailure) -> JobOutcome {
    let Some(snapshot_uuid) = first_value(failure.stdout()) else {
        return JobOutcome::Failed(failure.to_string());
    };
    warn!(snapshot = %snapshot_uuid, "snapshot step failed after creating a snapshot");
    let cleanup = steps
        .run("snapshot-uninstall", &uninstall_command(&snapshot_uuid))
        .await;
    JobOutcome::Failed(append_cleanup_note(failure.to_string(), cleanup.err().as_ref()))
}

async fn export_snapshot(
    steps: &mut StepRunner<'_>,
    plan: &BackupPlan,
    snapshot_uuid: &str,
) -> Result<(), StepFailure> {
    steps
        .run(
            "template-param-set",
            &unmark_template_command(snapshot_uuid),
        )
        .await?;
    steps
        .run("mkdir", &create_directory_command(&plan.directory))
        .await?;
    steps
        .run(
            "vm-export",
            &export_command(snapshot_uuid, &plan.artifact_path),
        )
        .await?;
    Ok(())
}
