//! Sequential remote steps with failure classification.

use std::fmt;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::HostTarget;
use crate::remote::{RemoteCommand, RemoteExecutor};

/// Why a step did not succeed: the channel failed, the command exited
/// non-zero, or it wrote to stderr.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct StepFailure {
    step: &'static str,
    message: String,
    stdout: String,
}

impl StepFailure {
    pub(crate) fn new(step: &'static str, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            stdout: String::new(),
        }
    }

    fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.trim().to_owned();
        self
    }

    pub(crate) const fn step(&self) -> &'static str {
        self.step
    }

    /// Whatever the command printed before it was judged a failure.
    pub(crate) fn stdout(&self) -> &str {
        &self.stdout
    }
}

/// Renders the error text exactly as the host or channel reported it.
impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Runs a job's commands against one host, collecting their stdout.
pub(crate) struct StepRunner<'a> {
    executor: &'a dyn RemoteExecutor,
    target: &'a HostTarget,
    job_uuid: Uuid,
    transcript: Vec<String>,
}

impl<'a> StepRunner<'a> {
    pub(crate) fn new(
        executor: &'a dyn RemoteExecutor,
        target: &'a HostTarget,
        job_uuid: Uuid,
    ) -> Self {
        Self {
            executor,
            target,
            job_uuid,
            transcript: Vec::new(),
        }
    }

    /// Runs one step and returns its trimmed stdout.
    pub(crate) async fn run(
        &mut self,
        step: &'static str,
        command: &RemoteCommand,
    ) -> Result<String, StepFailure> {
        let output = match self.executor.execute(self.target, command).await {
            Ok(output) => output,
            Err(err) => {
                warn!(job_uuid = %self.job_uuid, step, error = %err, "remote channel failed");
                return Err(StepFailure::new(step, err.to_string()));
            }
        };

        if !output.is_clean() {
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                output.code.map_or_else(
                    || String::from("terminated without an exit status"),
                    |code| format!("exited with status {code}"),
                )
            } else {
                stderr.to_owned()
            };
            warn!(job_uuid = %self.job_uuid, step, code = ?output.code, %message, "step failed");
            return Err(StepFailure::new(step, message).with_stdout(&output.stdout));
        }

        let stdout = output.stdout.trim().to_owned();
        debug!(job_uuid = %self.job_uuid, step, "step finished");
        if !stdout.is_empty() {
            self.transcript.push(stdout.clone());
        }
        Ok(stdout)
    }

    /// Builds success output: every step's stdout followed by the artifact.
    pub(crate) fn success_output(&self, artifact_path: &str, note: Option<&str>) -> String {
        let mut lines = self.transcript.clone();
        lines.push(format!("artifact: {artifact_path}"));
        if let Some(note) = note {
            lines.push(note.to_owned());
        }
        lines.join("\n")
    }
}

/// Returns the first UUID in `xe --minimal` style output, which separates
/// multiple values with commas.
pub(crate) fn first_value(output: &str) -> Option<String> {
    output
        .split([',', '\n'])
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Appends the cleanup failure, if any, to a step failure message.
pub(crate) fn append_cleanup_note(message: String, cleanup: Option<&StepFailure>) -> String {
    let Some(cleanup) = cleanup else {
        return message;
    };
    format!(
        "{message}\n{} also failed during cleanup: {cleanup}",
        cleanup.step()
    )
}
