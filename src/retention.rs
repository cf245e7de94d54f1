//! Retention and latest-backup selection over a definition's job history.
//!
//! Both functions are pure: they order what the ledger returns and never
//! delete anything.

use std::cmp::Ordering;

use crate::model::{Job, JobKind, JobStatus};

/// Which backup jobs a "latest backup" restore may draw from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LatestBackupPolicy {
    /// Only successful backups.
    #[default]
    LatestSuccessful,
    /// Any finished backup, successful or not.
    LatestAttempt,
}

impl LatestBackupPolicy {
    const fn admits(self, status: JobStatus) -> bool {
        match self {
            Self::LatestSuccessful => matches!(status, JobStatus::Success),
            Self::LatestAttempt => status.is_terminal(),
        }
    }
}

/// Newest first: `started_at` descending, then storage id descending so
/// jobs started within the same clock tick still order by creation.
fn newest_first(a: &Job, b: &Job) -> Ordering {
    b.started_at
        .cmp(&a.started_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Returns the successful backup jobs that count as current under
/// `retention`, newest first. The result holds `min(retention, successes)`
/// jobs.
#[must_use]
pub fn retained_backups(jobs: &[Job], retention: u32) -> Vec<&Job> {
    let mut successes: Vec<&Job> = jobs
        .iter()
        .filter(|job| job.kind() == JobKind::Backup && job.status == JobStatus::Success)
        .collect();
    successes.sort_by(|a, b| newest_first(a, b));
    successes.truncate(usize::try_from(retention).unwrap_or(usize::MAX));
    successes
}

/// Picks the backup job a "latest backup" restore should import.
#[must_use]
pub fn latest_backup(jobs: &[Job], policy: LatestBackupPolicy) -> Option<&Job> {
    jobs.iter()
        .filter(|job| job.kind() == JobKind::Backup && policy.admits(job.status))
        .min_by(|a, b| newest_first(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackupId, JobId, JobOutcome, JobParent, RestoreId};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rstest::rstest;
    use uuid::Uuid;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn job(id: i64, minutes: i64, status: JobStatus) -> Job {
        let started = base() + Duration::minutes(minutes);
        let mut job = Job::open(
            JobId::new(id),
            Uuid::new_v4(),
            JobParent::Backup(BackupId::new(1)),
            started,
        );
        match status {
            JobStatus::Started => {}
            JobStatus::Running => job.mark_running(None).expect("running"),
            JobStatus::Success => {
                job.mark_running(None).expect("running");
                job.complete(JobOutcome::Success(String::new()), started)
                    .expect("success");
            }
            JobStatus::Failed => {
                job.mark_running(None).expect("running");
                job.complete(JobOutcome::Failed(String::new()), started)
                    .expect("failed");
            }
        }
        job
    }

    fn ids(jobs: &[&Job]) -> Vec<i64> {
        jobs.iter().map(|job| job.id.get()).collect()
    }

    #[test]
    fn retention_keeps_newest_successes() {
        // Day 1 success, day 2 failure, day 3 success, day 4 success.
        let history = vec![
            job(1, 0, JobStatus::Success),
            job(2, 1440, JobStatus::Failed),
            job(3, 2880, JobStatus::Success),
            job(4, 4320, JobStatus::Success),
        ];
        assert_eq!(ids(&retained_backups(&history, 2)), vec![4, 3]);
    }

    #[rstest]
    #[case(1, 1)]
    #[case(3, 3)]
    #[case(10, 3)]
    fn retention_returns_min_of_count_and_successes(#[case] retention: u32, #[case] expected: usize) {
        let history = vec![
            job(1, 0, JobStatus::Success),
            job(2, 1, JobStatus::Success),
            job(3, 2, JobStatus::Failed),
            job(4, 3, JobStatus::Success),
            job(5, 4, JobStatus::Running),
        ];
        let retained = retained_backups(&history, retention);
        assert_eq!(retained.len(), expected);
        assert!(
            retained
                .windows(2)
                .all(|pair| pair[0].started_at >= pair[1].started_at)
        );
    }

    #[test]
    fn identical_timestamps_fall_back_to_creation_order() {
        let history = vec![
            job(7, 0, JobStatus::Success),
            job(8, 0, JobStatus::Success),
            job(9, 0, JobStatus::Success),
        ];
        assert_eq!(ids(&retained_backups(&history, 2)), vec![9, 8]);
        assert_eq!(
            latest_backup(&history, LatestBackupPolicy::LatestSuccessful).map(|job| job.id.get()),
            Some(9)
        );
    }

    #[test]
    fn restore_jobs_never_count() {
        let mut restore = job(1, 10, JobStatus::Success);
        restore.parent = JobParent::Restore(RestoreId::new(1));
        let history = vec![restore, job(2, 0, JobStatus::Success)];
        assert_eq!(ids(&retained_backups(&history, 5)), vec![2]);
    }

    #[rstest]
    #[case(LatestBackupPolicy::LatestSuccessful, Some(1))]
    #[case(LatestBackupPolicy::LatestAttempt, Some(2))]
    fn latest_backup_honours_policy(
        #[case] policy: LatestBackupPolicy,
        #[case] expected: Option<i64>,
    ) {
        let history = vec![
            job(1, 0, JobStatus::Success),
            job(2, 5, JobStatus::Failed),
            job(3, 10, JobStatus::Running),
        ];
        assert_eq!(
            latest_backup(&history, policy).map(|job| job.id.get()),
            expected
        );
    }

    #[test]
    fn latest_backup_of_empty_history_is_none() {
        assert!(latest_backup(&[], LatestBackupPolicy::default()).is_none());
    }
}
