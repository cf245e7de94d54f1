//! Integration tests for the SQLite-backed registries and job ledger.

use rstest::rstest;
use tempfile::TempDir;

use vmvault::model::{
    BackupId, HostId, JobOutcome, JobParent, JobStatus, NewHost, Password, RestoreId,
};
use vmvault::store::{JobLedger, LedgerError, Registry, SqliteStore, StoreError};
use vmvault::test_support::{seed_backup, seed_host, seed_restore};

async fn store() -> SqliteStore {
    SqliteStore::in_memory()
        .await
        .unwrap_or_else(|err| panic!("in-memory store: {err}"))
}

#[tokio::test]
async fn host_addresses_are_unique() {
    let store = store().await;
    seed_host(&store, "10.0.0.5").await.expect("first host");

    let err = seed_host(&store, "10.0.0.5")
        .await
        .expect_err("duplicate address");
    assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");

    let found = store
        .find_host_by_address("10.0.0.5")
        .await
        .expect("lookup")
        .expect("host exists");
    assert_eq!(found.password.expose(), "secret");
    assert!(found.connected);
}

#[tokio::test]
async fn host_update_can_move_address_unless_taken() {
    let store = store().await;
    let first = seed_host(&store, "10.0.0.5").await.expect("first host");
    seed_host(&store, "10.0.0.6").await.expect("second host");

    let mut moved = first.clone();
    moved.address = String::from("10.0.0.6");
    let err = store.update_host(moved).await.expect_err("address taken");
    assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");

    let mut renamed = first;
    renamed.name = String::from("pool-master");
    renamed.connected = false;
    let stored = store.update_host(renamed).await.expect("update");
    assert_eq!(stored.name, "pool-master");
    assert!(!stored.connected);
}

#[tokio::test]
async fn definitions_require_existing_parents() {
    let store = store().await;

    let err = seed_backup(&store, HostId::new(9), "vm-1", "sr-1", 1)
        .await
        .expect_err("host is missing");
    assert!(matches!(err, StoreError::NotFound { entity: "host", .. }), "{err:?}");

    let err = seed_restore(&store, Some(BackupId::new(9)), "sr-1", true, false)
        .await
        .expect_err("backup is missing");
    assert!(
        matches!(err, StoreError::NotFound { entity: "backup definition", .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn referenced_host_cannot_be_deleted() {
    let store = store().await;
    let host = seed_host(&store, "10.0.0.5").await.expect("host");
    seed_backup(&store, host.id, "vm-1", "sr-1", 1)
        .await
        .expect("backup");

    let err = store.delete_host(host.id).await.expect_err("referenced");
    assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");
}

#[tokio::test]
async fn job_lifecycle_is_persisted() {
    let store = store().await;
    let host = seed_host(&store, "10.0.0.5").await.expect("host");
    let backup = seed_backup(&store, host.id, "vm-1", "sr-1", 2)
        .await
        .expect("backup");

    let job = store
        .create(JobParent::Backup(backup.id))
        .await
        .expect("create");
    assert_eq!(job.status, JobStatus::Started);
    assert!(job.completed_at.is_none());

    let running = store
        .mark_running(job.uuid, Some(String::from("/run/sr-mount/a.xva")))
        .await
        .expect("running");
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.completed_at.is_none());

    let done = store
        .complete(job.uuid, JobOutcome::Success(String::from("exported")))
        .await
        .expect("complete");
    assert_eq!(done.status, JobStatus::Success);
    assert!(done.completed_at.is_some());

    let reloaded = store
        .find_by_uuid(job.uuid)
        .await
        .expect("lookup")
        .expect("job exists");
    assert_eq!(reloaded, done);
    assert_eq!(reloaded.artifact_path.as_deref(), Some("/run/sr-mount/a.xva"));
    assert_eq!(reloaded.output, "exported");
}

#[rstest]
#[case(JobOutcome::Success(String::from("again")))]
#[case(JobOutcome::Failed(String::from("again")))]
#[tokio::test]
async fn terminal_jobs_cannot_change(#[case] second: JobOutcome) {
    let store = store().await;
    let host = seed_host(&store, "10.0.0.5").await.expect("host");
    let backup = seed_backup(&store, host.id, "vm-1", "sr-1", 2)
        .await
        .expect("backup");
    let job = store
        .create(JobParent::Backup(backup.id))
        .await
        .expect("create");
    store
        .complete(job.uuid, JobOutcome::Failed(String::from("boom")))
        .await
        .expect("first completion");

    let err = store
        .complete(job.uuid, second)
        .await
        .expect_err("already terminal");
    assert!(matches!(err, LedgerError::Transition(_)), "{err:?}");

    let err = store
        .mark_running(job.uuid, None)
        .await
        .expect_err("already terminal");
    assert!(matches!(err, LedgerError::Transition(_)), "{err:?}");

    let reloaded = store
        .find_by_uuid(job.uuid)
        .await
        .expect("lookup")
        .expect("job exists");
    assert_eq!(reloaded.output, "boom");
}

#[tokio::test]
async fn ledger_rejects_unknown_parents_and_jobs() {
    let store = store().await;

    let err = store
        .create(JobParent::Restore(RestoreId::new(3)))
        .await
        .expect_err("no parent");
    assert!(
        matches!(err, LedgerError::Store(StoreError::NotFound { .. })),
        "{err:?}"
    );

    let unknown = uuid::Uuid::new_v4();
    let err = store
        .complete(unknown, JobOutcome::Failed(String::new()))
        .await
        .expect_err("no job");
    assert!(matches!(err, LedgerError::UnknownJob(id) if id == unknown), "{err:?}");
}

#[tokio::test]
async fn history_is_listed_in_creation_order_per_parent() {
    let store = store().await;
    let host = seed_host(&store, "10.0.0.5").await.expect("host");
    let first = seed_backup(&store, host.id, "vm-1", "sr-1", 2)
        .await
        .expect("backup");
    let second = seed_backup(&store, host.id, "vm-2", "sr-1", 2)
        .await
        .expect("backup");

    let mut expected = Vec::new();
    for _ in 0..3 {
        expected.push(
            store
                .create(JobParent::Backup(first.id))
                .await
                .expect("create")
                .id,
        );
        store
            .create(JobParent::Backup(second.id))
            .await
            .expect("create");
    }

    let history = store
        .list_by_parent(JobParent::Backup(first.id))
        .await
        .expect("history");
    let ids: Vec<_> = history.iter().map(|job| job.id).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn deleting_a_backup_with_history_needs_cascade() {
    let store = store().await;
    let host = seed_host(&store, "10.0.0.5").await.expect("host");
    let backup = seed_backup(&store, host.id, "vm-1", "sr-1", 2)
        .await
        .expect("backup");
    let restore = seed_restore(&store, Some(backup.id), "sr-1", true, false)
        .await
        .expect("restore");
    let job = store
        .create(JobParent::Backup(backup.id))
        .await
        .expect("create");

    let err = store
        .delete_backup(backup.id, false)
        .await
        .expect_err("history exists");
    assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");

    store.delete_backup(backup.id, true).await.expect("cascade");
    assert!(store.get_backup(backup.id).await.expect("lookup").is_none());
    assert!(store.find_by_uuid(job.uuid).await.expect("lookup").is_none());

    let detached = store
        .get_restore(restore.id)
        .await
        .expect("lookup")
        .expect("restore survives");
    assert_eq!(detached.backup_id, None);

    let err = store
        .delete_backup(backup.id, true)
        .await
        .expect_err("already gone");
    assert!(matches!(err, StoreError::NotFound { .. }), "{err:?}");
}

#[tokio::test]
async fn file_backed_store_survives_reconnect() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let url = format!("sqlite://{}", tmp.path().join("vmvault.db").display());

    let first = SqliteStore::connect(&url).await.expect("connect");
    first.migrate().await.expect("migrate");
    first
        .insert_host(NewHost {
            name: Some(String::from("pool-master")),
            host_ip: String::from("10.0.0.5"),
            username: String::from("root"),
            password: Password::new("secret"),
        })
        .await
        .expect("insert");
    first.close().await;

    let second = SqliteStore::connect(&url).await.expect("reconnect");
    second.migrate().await.expect("migrations are idempotent");
    let hosts = second.list_hosts().await.expect("list");
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts.first().map(|host| host.name.as_str()), Some("pool-master"));
    second.close().await;
}
