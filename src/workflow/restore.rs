//! Import of an exported VM, optionally followed by a power-on.

use super::steps::{StepRunner, first_value};
use crate::model::JobOutcome;
use crate::remote::RemoteCommand;

/// Resolved restore inputs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct RestorePlan {
    pub(crate) artifact_path: String,
    pub(crate) sr_uuid: String,
    pub(crate) preserve: bool,
    pub(crate) power_on: bool,
}

pub(crate) fn import_command(artifact_path: &str, sr_uuid: &str, preserve: bool) -> RemoteCommand {
    RemoteCommand::xe("vm-import")
        .param("filename", artifact_path)
        .param("sr-uuid", sr_uuid)
        .flag("preserve", preserve)
}

pub(crate) fn start_command(vm_uuid: &str) -> RemoteCommand {
    RemoteCommand::xe("vm-start").param("uuid", vm_uuid)
}

pub(crate) async fn execute(steps: &mut StepRunner<'_>, plan: &RestorePlan) -> JobOutcome {
    let imported = match steps
        .run(
            "vm-import",
            &import_command(&plan.artifact_path, &plan.sr_uuid, plan.preserve),
        )
        .await
    {
        Ok(imported) => imported,
        Err(failure) => return JobOutcome::Failed(failure.to_string()),
    };

    if plan.power_on {
        let Some(vm_uuid) = first_value(&imported) else {
            return JobOutcome::Failed(String::from(
                "vm-import did not report the imported VM uuid",
            ));
        };
        if let Err(failure) = steps.run("vm-start", &start_command(&vm_uuid)).await {
            return JobOutcome::Failed(failure.to_string());
        }
    }

    JobOutcome::Success(steps.success_output(&plan.artifact_path, None))
}
