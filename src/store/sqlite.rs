//! SQLite store built on `sqlx`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::info;
use uuid::Uuid;

use super::{JobLedger, LedgerError, LedgerFuture, Registry, StoreError, StoreFuture};
use crate::model::{
    BackupDefinition, BackupId, Host, HostId, Job, JobId, JobOutcome, JobParent, JobStatus,
    NewBackupDefinition, NewHost, NewRestoreDefinition, Password, RestoreDefinition, RestoreId,
    TransitionError,
};

const HOST_COLUMNS: &str = "id, name, address, username, password, connected";
const BACKUP_COLUMNS: &str = "id, name, description, vm_uuid, host_id, sr_uuid, active, \
     retention, cron_schedule, created_at";
const RESTORE_COLUMNS: &str =
    "id, sr_uuid, preserve, power_on_after_restore, backup_id, created_at";
const JOB_COLUMNS: &str =
    "id, uuid, kind, status, output, artifact_path, started_at, completed_at, backup_id, \
     restore_id";

/// Store persisting to a SQLite database.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to `url`, creating the database file when missing. Call
    /// [`SqliteStore::migrate`] before first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the URL is invalid or the
    /// database cannot be opened.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        info!(url, "connecting to database");
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Opens a private in-memory database with the schema applied.
    ///
    /// Every connection to `sqlite::memory:` sees its own database, so the
    /// pool is pinned to a single connection that never expires.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be created or
    /// migrated.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Applies pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Migration`] when a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        info!("running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn count(&self, sql: &str, id: i64) -> Result<i64, StoreError> {
        let row = sqlx::query(sql).bind(id).fetch_one(&self.pool).await?;
        Ok(row.try_get(0)?)
    }

    async fn job_by_uuid(&self, job_uuid: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE uuid = ?"))
            .bind(job_uuid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Writes a transition computed on `job`, guarded by the status it was
    /// computed from so concurrent writers cannot both succeed.
    async fn persist_transition(&self, from: JobStatus, job: &Job) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = ?, output = ?, artifact_path = ?, completed_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(job.status.as_str())
        .bind(&job.output)
        .bind(&job.artifact_path)
        .bind(job.completed_at)
        .bind(job.id.get())
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            let current = self
                .job_by_uuid(job.uuid)
                .await?
                .ok_or(LedgerError::UnknownJob(job.uuid))?;
            return Err(TransitionError {
                job_uuid: job.uuid,
                from: current.status,
                to: job.status,
            }
            .into());
        }
        Ok(())
    }

    async fn update_job(
        &self,
        job_uuid: Uuid,
        apply: impl FnOnce(&mut Job) -> Result<(), TransitionError> + Send,
    ) -> Result<Job, LedgerError> {
        let mut job = self
            .job_by_uuid(job_uuid)
            .await?
            .ok_or(LedgerError::UnknownJob(job_uuid))?;
        let from = job.status;
        apply(&mut job)?;
        self.persist_transition(from, &job).await?;
        Ok(job)
    }

    async fn delete_with_history(
        &self,
        entity: &'static str,
        table: &str,
        job_column: &str,
        id: i64,
        cascade: bool,
    ) -> Result<(), StoreError> {
        let jobs = self
            .count(
                &format!("SELECT COUNT(*) FROM jobs WHERE {job_column} = ?"),
                id,
            )
            .await?;
        if jobs > 0 && !cascade {
            return Err(StoreError::Conflict(format!(
                "{entity} {id} has job history; pass cascade=true to delete it"
            )));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM jobs WHERE {job_column} = ?"))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::not_found(entity, id));
        }
        tx.commit().await?;
        Ok(())
    }
}

fn unique_conflict(err: sqlx::Error, message: impl FnOnce() -> String) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(message()),
        _ => StoreError::Database(err),
    }
}

fn corrupt(entity: &'static str, message: impl ToString) -> StoreError {
    StoreError::Corrupt {
        entity,
        message: message.to_string(),
    }
}

fn host_from_row(row: &SqliteRow) -> Result<Host, StoreError> {
    Ok(Host {
        id: HostId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        username: row.try_get("username")?,
        password: Password::new(row.try_get::<String, _>("password")?),
        connected: row.try_get("connected")?,
    })
}

fn backup_from_row(row: &SqliteRow) -> Result<BackupDefinition, StoreError> {
    let retention: i64 = row.try_get("retention")?;
    Ok(BackupDefinition {
        id: BackupId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        vm_uuid: row.try_get("vm_uuid")?,
        host_id: HostId::new(row.try_get("host_id")?),
        sr_uuid: row.try_get("sr_uuid")?,
        active: row.try_get("active")?,
        retention: u32::try_from(retention).map_err(|err| corrupt("backup definition", err))?,
        cron_schedule: row.try_get("cron_schedule")?,
        created_at: row.try_get("created_at")?,
    })
}

fn restore_from_row(row: &SqliteRow) -> Result<RestoreDefinition, StoreError> {
    Ok(RestoreDefinition {
        id: RestoreId::new(row.try_get("id")?),
        sr_uuid: row.try_get("sr_uuid")?,
        preserve: row.try_get("preserve")?,
        power_on_after_restore: row.try_get("power_on_after_restore")?,
        backup_id: row.try_get::<Option<i64>, _>("backup_id")?.map(BackupId::new),
        created_at: row.try_get("created_at")?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<Job, StoreError> {
    let kind: String = row.try_get("kind")?;
    let backup_id: Option<i64> = row.try_get("backup_id")?;
    let restore_id: Option<i64> = row.try_get("restore_id")?;
    let parent = match (kind.as_str(), backup_id, restore_id) {
        ("backup", Some(id), None) => JobParent::Backup(BackupId::new(id)),
        ("restore", None, Some(id)) => JobParent::Restore(RestoreId::new(id)),
        _ => return Err(corrupt("job", format!("inconsistent parent for kind '{kind}'"))),
    };
    let uuid: String = row.try_get("uuid")?;
    let status: String = row.try_get("status")?;
    Ok(Job {
        id: JobId::new(row.try_get("id")?),
        uuid: Uuid::parse_str(&uuid).map_err(|err| corrupt("job", err))?,
        parent,
        status: status.parse().map_err(|err: String| corrupt("job", err))?,
        output: row.try_get("output")?,
        artifact_path: row.try_get("artifact_path")?,
        started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

impl Registry for SqliteStore {
    fn insert_host(&self, host: NewHost) -> StoreFuture<'_, Host> {
        Box::pin(async move {
            let name = host
                .name
                .clone()
                .unwrap_or_else(|| format!("Host-{}", host.host_ip));
            let result = sqlx::query(
                "INSERT INTO hosts (name, address, username, password, connected) \
                 VALUES (?, ?, ?, ?, 1)",
            )
            .bind(&name)
            .bind(&host.host_ip)
            .bind(&host.username)
            .bind(host.password.expose())
            .execute(&self.pool)
            .await
            .map_err(|err| {
                unique_conflict(err, || format!("host {} is already registered", host.host_ip))
            })?;
            Ok(Host {
                id: HostId::new(result.last_insert_rowid()),
                name,
                address: host.host_ip,
                username: host.username,
                password: host.password,
                connected: true,
            })
        })
    }

    fn list_hosts(&self) -> StoreFuture<'_, Vec<Host>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!("SELECT {HOST_COLUMNS} FROM hosts ORDER BY id"))
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(host_from_row).collect()
        })
    }

    fn get_host(&self, id: HostId) -> StoreFuture<'_, Option<Host>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {HOST_COLUMNS} FROM hosts WHERE id = ?"))
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(host_from_row).transpose()
        })
    }

    fn find_host_by_address<'a>(&'a self, address: &'a str) -> StoreFuture<'a, Option<Host>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {HOST_COLUMNS} FROM hosts WHERE address = ?"
            ))
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(host_from_row).transpose()
        })
    }

    fn update_host(&self, host: Host) -> StoreFuture<'_, Host> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE hosts SET name = ?, address = ?, username = ?, password = ?, \
                 connected = ? WHERE id = ?",
            )
            .bind(&host.name)
            .bind(&host.address)
            .bind(&host.username)
            .bind(host.password.expose())
            .bind(host.connected)
            .bind(host.id.get())
            .execute(&self.pool)
            .await
            .map_err(|err| {
                unique_conflict(err, || format!("host {} is already registered", host.address))
            })?;
            if result.rows_affected() == 0 {
                return Err(StoreError::not_found("host", host.id));
            }
            Ok(host)
        })
    }

    fn delete_host(&self, id: HostId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let references = self
                .count(
                    "SELECT COUNT(*) FROM backup_definitions WHERE host_id = ?",
                    id.get(),
                )
                .await?;
            if references > 0 {
                return Err(StoreError::Conflict(format!(
                    "host {id} is referenced by backup definitions"
                )));
            }
            let result = sqlx::query("DELETE FROM hosts WHERE id = ?")
                .bind(id.get())
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::not_found("host", id));
            }
            Ok(())
        })
    }

    fn insert_backup(
        &self,
        definition: NewBackupDefinition,
    ) -> StoreFuture<'_, BackupDefinition> {
        Box::pin(async move {
            if self.get_host(definition.host_id).await?.is_none() {
                return Err(StoreError::not_found("host", definition.host_id));
            }
            let created_at = Utc::now();
            let result = sqlx::query(
                "INSERT INTO backup_definitions (name, description, vm_uuid, host_id, sr_uuid, \
                 active, retention, cron_schedule, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&definition.name)
            .bind(&definition.description)
            .bind(&definition.vm_uuid)
            .bind(definition.host_id.get())
            .bind(&definition.sr_uuid)
            .bind(definition.active)
            .bind(i64::from(definition.retention))
            .bind(&definition.cron_schedule)
            .bind(created_at)
            .execute(&self.pool)
            .await?;
            Ok(BackupDefinition {
                id: BackupId::new(result.last_insert_rowid()),
                name: definition.name,
                description: definition.description,
                vm_uuid: definition.vm_uuid,
                host_id: definition.host_id,
                sr_uuid: definition.sr_uuid,
                active: definition.active,
                retention: definition.retention,
                cron_schedule: definition.cron_schedule,
                created_at,
            })
        })
    }

    fn list_backups(&self) -> StoreFuture<'_, Vec<BackupDefinition>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {BACKUP_COLUMNS} FROM backup_definitions ORDER BY id"
            ))
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(backup_from_row).collect()
        })
    }

    fn get_backup(&self, id: BackupId) -> StoreFuture<'_, Option<BackupDefinition>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {BACKUP_COLUMNS} FROM backup_definitions WHERE id = ?"
            ))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(backup_from_row).transpose()
        })
    }

    fn update_backup(&self, definition: BackupDefinition) -> StoreFuture<'_, BackupDefinition> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE backup_definitions SET name = ?, description = ?, sr_uuid = ?, \
                 active = ?, retention = ?, cron_schedule = ? WHERE id = ?",
            )
            .bind(&definition.name)
            .bind(&definition.description)
            .bind(&definition.sr_uuid)
            .bind(definition.active)
            .bind(i64::from(definition.retention))
            .bind(&definition.cron_schedule)
            .bind(definition.id.get())
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::not_found("backup definition", definition.id));
            }
            self.get_backup(definition.id)
                .await?
                .ok_or_else(|| StoreError::not_found("backup definition", definition.id))
        })
    }

    fn delete_backup(&self, id: BackupId, cascade: bool) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.delete_with_history(
                "backup definition",
                "backup_definitions",
                "backup_id",
                id.get(),
                cascade,
            )
            .await
        })
    }

    fn insert_restore(
        &self,
        definition: NewRestoreDefinition,
    ) -> StoreFuture<'_, RestoreDefinition> {
        Box::pin(async move {
            if let Some(backup_id) = definition.backup_id {
                if self.get_backup(backup_id).await?.is_none() {
                    return Err(StoreError::not_found("backup definition", backup_id));
                }
            }
            let created_at = Utc::now();
            let result = sqlx::query(
                "INSERT INTO restore_definitions (sr_uuid, preserve, power_on_after_restore, \
                 backup_id, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&definition.sr_uuid)
            .bind(definition.preserve)
            .bind(definition.power_on_after_restore)
            .bind(definition.backup_id.map(BackupId::get))
            .bind(created_at)
            .execute(&self.pool)
            .await?;
            Ok(RestoreDefinition {
                id: RestoreId::new(result.last_insert_rowid()),
                sr_uuid: definition.sr_uuid,
                preserve: definition.preserve,
                power_on_after_restore: definition.power_on_after_restore,
                backup_id: definition.backup_id,
                created_at,
            })
        })
    }

    fn list_restores(&self) -> StoreFuture<'_, Vec<RestoreDefinition>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {RESTORE_COLUMNS} FROM restore_definitions ORDER BY id"
            ))
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(restore_from_row).collect()
        })
    }

    fn get_restore(&self, id: RestoreId) -> StoreFuture<'_, Option<RestoreDefinition>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {RESTORE_COLUMNS} FROM restore_definitions WHERE id = ?"
            ))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(restore_from_row).transpose()
        })
    }

    fn update_restore(
        &self,
        definition: RestoreDefinition,
    ) -> StoreFuture<'_, RestoreDefinition> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE restore_definitions SET preserve = ?, power_on_after_restore = ? \
                 WHERE id = ?",
            )
            .bind(definition.preserve)
            .bind(definition.power_on_after_restore)
            .bind(definition.id.get())
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::not_found("restore definition", definition.id));
            }
            self.get_restore(definition.id)
                .await?
                .ok_or_else(|| StoreError::not_found("restore definition", definition.id))
        })
    }

    fn delete_restore(&self, id: RestoreId, cascade: bool) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.delete_with_history(
                "restore definition",
                "restore_definitions",
                "restore_id",
                id.get(),
                cascade,
            )
            .await
        })
    }
}

impl JobLedger for SqliteStore {
    fn create(&self, parent: JobParent) -> LedgerFuture<'_, Job> {
        Box::pin(async move {
            let uuid = Uuid::new_v4();
            let started_at = Utc::now();
            let kind = parent.kind();
            let provisional = Job::open(JobId::new(0), uuid, parent, started_at);
            let result = sqlx::query(
                "INSERT INTO jobs (uuid, kind, status, output, started_at, backup_id, restore_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(uuid.to_string())
            .bind(kind.as_str())
            .bind(JobStatus::Started.as_str())
            .bind(&provisional.output)
            .bind(started_at)
            .bind(parent.backup_id().map(BackupId::get))
            .bind(parent.restore_id().map(RestoreId::get))
            .execute(&self.pool)
            .await
            .map_err(|err| match &err {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    match parent {
                        JobParent::Backup(id) => StoreError::not_found("backup definition", id),
                        JobParent::Restore(id) => {
                            StoreError::not_found("restore definition", id)
                        }
                    }
                }
                _ => StoreError::Database(err),
            })?;
            Ok(Job {
                id: JobId::new(result.last_insert_rowid()),
                ..provisional
            })
        })
    }

    fn mark_running(&self, job_uuid: Uuid, artifact_path: Option<String>) -> LedgerFuture<'_, Job> {
        Box::pin(async move {
            self.update_job(job_uuid, move |job| job.mark_running(artifact_path))
                .await
        })
    }

    fn complete(&self, job_uuid: Uuid, outcome: JobOutcome) -> LedgerFuture<'_, Job> {
        Box::pin(async move {
            self.update_job(job_uuid, move |job| job.complete(outcome, Utc::now()))
                .await
        })
    }

    fn list_by_parent(&self, parent: JobParent) -> LedgerFuture<'_, Vec<Job>> {
        Box::pin(async move {
            let (column, id) = match parent {
                JobParent::Backup(id) => ("backup_id", id.get()),
                JobParent::Restore(id) => ("restore_id", id.get()),
            };
            let rows = sqlx::query(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE {column} = ? AND kind = ? ORDER BY id"
            ))
            .bind(id)
            .bind(parent.kind().as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
            Ok(rows
                .iter()
                .map(job_from_row)
                .collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn find_by_uuid(&self, job_uuid: Uuid) -> LedgerFuture<'_, Option<Job>> {
        Box::pin(async move { Ok(self.job_by_uuid(job_uuid).await?) })
    }
}
