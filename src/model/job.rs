//! Job records and their lifecycle.
//!
//! A job moves `Started → Running → {Success, Failed}`. A job that fails
//! before any work is dispatched may go straight from `Started` to `Failed`.
//! Terminal jobs never change again, and `completed_at` is present exactly
//! when the status is terminal.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{BackupId, JobId, RestoreId};

/// Kind of orchestration attempt.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Snapshot and export of a VM.
    Backup,
    /// Import of a previously exported VM.
    Restore,
}

impl JobKind {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum JobStatus {
    /// Recorded but not yet dispatched.
    Started,
    /// Remote work in progress.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// Returns `true` for `Success` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "Started",
            Self::Running => "Running",
            Self::Success => "Success",
            Self::Failed => "Failed",
        }
    }

    const fn allows(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Started, Self::Running | Self::Failed)
                | (Self::Running, Self::Success | Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Started" => Ok(Self::Started),
            "Running" => Ok(Self::Running),
            "Success" => Ok(Self::Success),
            "Failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// The definition a job belongs to. The variant fixes the job's kind.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JobParent {
    /// Parent of a backup job.
    Backup(BackupId),
    /// Parent of a restore job.
    Restore(RestoreId),
}

impl JobParent {
    /// Kind of the jobs owned by this parent.
    #[must_use]
    pub const fn kind(self) -> JobKind {
        match self {
            Self::Backup(_) => JobKind::Backup,
            Self::Restore(_) => JobKind::Restore,
        }
    }

    /// Backup definition, when this is a backup parent.
    #[must_use]
    pub const fn backup_id(self) -> Option<BackupId> {
        match self {
            Self::Backup(id) => Some(id),
            Self::Restore(_) => None,
        }
    }

    /// Restore definition, when this is a restore parent.
    #[must_use]
    pub const fn restore_id(self) -> Option<RestoreId> {
        match self {
            Self::Restore(id) => Some(id),
            Self::Backup(_) => None,
        }
    }
}

/// Final result handed to the ledger when a job completes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobOutcome {
    /// The work succeeded; carries captured standard output.
    Success(String),
    /// The work failed; carries the error text.
    Failed(String),
}

impl JobOutcome {
    /// Terminal status corresponding to this outcome.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        match self {
            Self::Success(_) => JobStatus::Success,
            Self::Failed(_) => JobStatus::Failed,
        }
    }

    /// Output text recorded on the job.
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::Success(output) | Self::Failed(output) => output,
        }
    }
}

/// Raised when a job is asked to make a transition its state forbids.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("job {job_uuid} cannot move from {from} to {to}")]
pub struct TransitionError {
    /// Job being transitioned.
    pub job_uuid: Uuid,
    /// Current status.
    pub from: JobStatus,
    /// Requested status.
    pub to: JobStatus,
}

/// One orchestration attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Job {
    /// Storage key, increasing with creation order.
    pub id: JobId,
    /// Globally unique identifier; also names the backup artifact.
    pub uuid: Uuid,
    /// Owning definition.
    pub parent: JobParent,
    /// Current state.
    pub status: JobStatus,
    /// Captured output or error text.
    pub output: String,
    /// Export artifact the job writes (backup) or reads (restore). Recorded
    /// when the job starts running so later edits to the definition cannot
    /// change where the artifact is looked up.
    pub artifact_path: Option<String>,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// Time the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Builds a freshly started job.
    #[must_use]
    pub fn open(id: JobId, uuid: Uuid, parent: JobParent, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            uuid,
            parent,
            status: JobStatus::Started,
            output: format!("{} job started", parent.kind()),
            artifact_path: None,
            started_at,
            completed_at: None,
        }
    }

    /// Kind derived from the parent.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        self.parent.kind()
    }

    /// Moves the job to `Running` and records the artifact it works on.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] unless the job is `Started`.
    pub fn mark_running(&mut self, artifact_path: Option<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running)?;
        self.artifact_path = artifact_path;
        Ok(())
    }

    /// Records the final outcome and completion time.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the job is already terminal, or when
    /// a success is reported for a job that never ran.
    pub fn complete(
        &mut self,
        outcome: JobOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(outcome.status())?;
        self.output = match outcome {
            JobOutcome::Success(output) | JobOutcome::Failed(output) => output,
        };
        self.completed_at = Some(completed_at);
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.allows(next) {
            return Err(TransitionError {
                job_uuid: self.uuid,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn started() -> Job {
        Job::open(
            JobId::new(1),
            Uuid::new_v4(),
            JobParent::Backup(BackupId::new(7)),
            Utc::now(),
        )
    }

    #[test]
    fn opened_job_is_started_without_completion() {
        let job = started();
        assert_eq!(job.status, JobStatus::Started);
        assert_eq!(job.kind(), JobKind::Backup);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn running_job_completes_successfully() {
        let mut job = started();
        job.mark_running(Some(String::from("/srv/a.xva")))
            .expect("started -> running");
        job.complete(JobOutcome::Success(String::from("ok")), Utc::now())
            .expect("running -> success");
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.artifact_path.as_deref(), Some("/srv/a.xva"));
        assert_eq!(job.output, "ok");
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn started_job_may_fail_before_dispatch() {
        let mut job = started();
        job.complete(JobOutcome::Failed(String::from("boom")), Utc::now())
            .expect("started -> failed");
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn started_job_cannot_succeed_without_running() {
        let mut job = started();
        let err = job
            .complete(JobOutcome::Success(String::new()), Utc::now())
            .expect_err("success requires running");
        assert_eq!(err.from, JobStatus::Started);
        assert!(job.completed_at.is_none());
    }

    #[rstest]
    #[case(JobOutcome::Success(String::from("again")))]
    #[case(JobOutcome::Failed(String::from("again")))]
    fn terminal_jobs_are_immutable(#[case] second: JobOutcome) {
        let mut job = started();
        job.mark_running(None).expect("running");
        job.complete(JobOutcome::Failed(String::from("first")), Utc::now())
            .expect("first completion");
        let completed_at = job.completed_at;

        let err = job
            .complete(second, Utc::now())
            .expect_err("terminal job must not change");
        assert_eq!(err.from, JobStatus::Failed);
        assert_eq!(job.output, "first");
        assert_eq!(job.completed_at, completed_at);
        assert!(job.mark_running(None).is_err());
    }

    #[test]
    fn status_parses_its_own_representation() {
        for status in [
            JobStatus::Started,
            JobStatus::Running,
            JobStatus::Success,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("Done".parse::<JobStatus>().is_err());
    }
}
