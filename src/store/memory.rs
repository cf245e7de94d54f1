//! In-process store backed by ordered maps.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{JobLedger, LedgerError, LedgerFuture, Registry, StoreError, StoreFuture};
use crate::model::{
    BackupDefinition, BackupId, Host, HostId, Job, JobId, JobOutcome, JobParent,
    NewBackupDefinition, NewHost, NewRestoreDefinition, RestoreDefinition, RestoreId,
};

#[derive(Debug, Default)]
struct State {
    hosts: BTreeMap<HostId, Host>,
    backups: BTreeMap<BackupId, BackupDefinition>,
    restores: BTreeMap<RestoreId, RestoreDefinition>,
    jobs: BTreeMap<JobId, Job>,
    last_host: i64,
    last_backup: i64,
    last_restore: i64,
    last_job: i64,
}

impl State {
    fn address_taken(&self, address: &str, except: Option<HostId>) -> bool {
        self.hosts
            .values()
            .any(|host| host.address == address && Some(host.id) != except)
    }

    fn job_by_uuid_mut(&mut self, job_uuid: Uuid) -> Result<&mut Job, LedgerError> {
        self.jobs
            .values_mut()
            .find(|job| job.uuid == job_uuid)
            .ok_or(LedgerError::UnknownJob(job_uuid))
    }

    fn has_jobs(&self, parent: JobParent) -> bool {
        self.jobs.values().any(|job| job.parent == parent)
    }

    fn drop_jobs(&mut self, parent: JobParent) {
        self.jobs.retain(|_, job| job.parent != parent);
    }
}

/// Store that keeps everything in memory. Cloning shares the same data.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn history_conflict(entity: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::Conflict(format!(
        "{entity} {id} has job history; pass cascade=true to delete it"
    ))
}

impl Registry for MemoryStore {
    fn insert_host(&self, host: NewHost) -> StoreFuture<'_, Host> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.address_taken(&host.host_ip, None) {
                return Err(StoreError::Conflict(format!(
                    "host {} is already registered",
                    host.host_ip
                )));
            }
            state.last_host += 1;
            let id = HostId::new(state.last_host);
            let stored = Host {
                id,
                name: host.name.unwrap_or_else(|| format!("Host-{}", host.host_ip)),
                address: host.host_ip,
                username: host.username,
                password: host.password,
                connected: true,
            };
            state.hosts.insert(id, stored.clone());
            Ok(stored)
        })
    }

    fn list_hosts(&self) -> StoreFuture<'_, Vec<Host>> {
        Box::pin(async move { Ok(self.state.lock().await.hosts.values().cloned().collect()) })
    }

    fn get_host(&self, id: HostId) -> StoreFuture<'_, Option<Host>> {
        Box::pin(async move { Ok(self.state.lock().await.hosts.get(&id).cloned()) })
    }

    fn find_host_by_address<'a>(&'a self, address: &'a str) -> StoreFuture<'a, Option<Host>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .await
                .hosts
                .values()
                .find(|host| host.address == address)
                .cloned())
        })
    }

    fn update_host(&self, host: Host) -> StoreFuture<'_, Host> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.hosts.contains_key(&host.id) {
                return Err(StoreError::not_found("host", host.id));
            }
            if state.address_taken(&host.address, Some(host.id)) {
                return Err(StoreError::Conflict(format!(
                    "host {} is already registered",
                    host.address
                )));
            }
            state.hosts.insert(host.id, host.clone());
            Ok(host)
        })
    }

    fn delete_host(&self, id: HostId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.hosts.contains_key(&id) {
                return Err(StoreError::not_found("host", id));
            }
            if state.backups.values().any(|backup| backup.host_id == id) {
                return Err(StoreError::Conflict(format!(
                    "host {id} is referenced by backup definitions"
                )));
            }
            state.hosts.remove(&id);
            Ok(())
        })
    }

    fn insert_backup(
        &self,
        definition: NewBackupDefinition,
    ) -> StoreFuture<'_, BackupDefinition> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.hosts.contains_key(&definition.host_id) {
                return Err(StoreError::not_found("host", definition.host_id));
            }
            state.last_backup += 1;
            let id = BackupId::new(state.last_backup);
            let stored = BackupDefinition {
                id,
                name: definition.name,
                description: definition.description,
                vm_uuid: definition.vm_uuid,
                host_id: definition.host_id,
                sr_uuid: definition.sr_uuid,
                active: definition.active,
                retention: definition.retention,
                cron_schedule: definition.cron_schedule,
                created_at: Utc::now(),
            };
            state.backups.insert(id, stored.clone());
            Ok(stored)
        })
    }

    fn list_backups(&self) -> StoreFuture<'_, Vec<BackupDefinition>> {
        Box::pin(async move { Ok(self.state.lock().await.backups.values().cloned().collect()) })
    }

    fn get_backup(&self, id: BackupId) -> StoreFuture<'_, Option<BackupDefinition>> {
        Box::pin(async move { Ok(self.state.lock().await.backups.get(&id).cloned()) })
    }

    fn update_backup(&self, definition: BackupDefinition) -> StoreFuture<'_, BackupDefinition> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let Some(existing) = state.backups.get_mut(&definition.id) else {
                return Err(StoreError::not_found("backup definition", definition.id));
            };
            *existing = BackupDefinition {
                vm_uuid: existing.vm_uuid.clone(),
                host_id: existing.host_id,
                created_at: existing.created_at,
                ..definition
            };
            Ok(existing.clone())
        })
    }

    fn delete_backup(&self, id: BackupId, cascade: bool) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.backups.contains_key(&id) {
                return Err(StoreError::not_found("backup definition", id));
            }
            let parent = JobParent::Backup(id);
            if state.has_jobs(parent) && !cascade {
                return Err(history_conflict("backup definition", id));
            }
            state.drop_jobs(parent);
            for restore in state.restores.values_mut() {
                if restore.backup_id == Some(id) {
                    restore.backup_id = None;
                }
            }
            state.backups.remove(&id);
            Ok(())
        })
    }

    fn insert_restore(
        &self,
        definition: NewRestoreDefinition,
    ) -> StoreFuture<'_, RestoreDefinition> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if let Some(backup_id) = definition.backup_id {
                if !state.backups.contains_key(&backup_id) {
                    return Err(StoreError::not_found("backup definition", backup_id));
                }
            }
            state.last_restore += 1;
            let id = RestoreId::new(state.last_restore);
            let stored = RestoreDefinition {
                id,
                sr_uuid: definition.sr_uuid,
                preserve: definition.preserve,
                power_on_after_restore: definition.power_on_after_restore,
                backup_id: definition.backup_id,
                created_at: Utc::now(),
            };
            state.restores.insert(id, stored.clone());
            Ok(stored)
        })
    }

    fn list_restores(&self) -> StoreFuture<'_, Vec<RestoreDefinition>> {
        Box::pin(async move { Ok(self.state.lock().await.restores.values().cloned().collect()) })
    }

    fn get_restore(&self, id: RestoreId) -> StoreFuture<'_, Option<RestoreDefinition>> {
        Box::pin(async move { Ok(self.state.lock().await.restores.get(&id).cloned()) })
    }

    fn update_restore(
        &self,
        definition: RestoreDefinition,
    ) -> StoreFuture<'_, RestoreDefinition> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let Some(existing) = state.restores.get_mut(&definition.id) else {
                return Err(StoreError::not_found("restore definition", definition.id));
            };
            existing.preserve = definition.preserve;
            existing.power_on_after_restore = definition.power_on_after_restore;
            Ok(existing.clone())
        })
    }

    fn delete_restore(&self, id: RestoreId, cascade: bool) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.restores.contains_key(&id) {
                return Err(StoreError::not_found("restore definition", id));
            }
            let parent = JobParent::Restore(id);
            if state.has_jobs(parent) && !cascade {
                return Err(history_conflict("restore definition", id));
            }
            state.drop_jobs(parent);
            state.restores.remove(&id);
            Ok(())
        })
    }
}

impl JobLedger for MemoryStore {
    fn create(&self, parent: JobParent) -> LedgerFuture<'_, Job> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let parent_exists = match parent {
                JobParent::Backup(id) => state.backups.contains_key(&id),
                JobParent::Restore(id) => state.restores.contains_key(&id),
            };
            if !parent_exists {
                let err = match parent {
                    JobParent::Backup(id) => StoreError::not_found("backup definition", id),
                    JobParent::Restore(id) => StoreError::not_found("restore definition", id),
                };
                return Err(err.into());
            }
            state.last_job += 1;
            let id = JobId::new(state.last_job);
            let job = Job::open(id, Uuid::new_v4(), parent, Utc::now());
            state.jobs.insert(id, job.clone());
            Ok(job)
        })
    }

    fn mark_running(&self, job_uuid: Uuid, artifact_path: Option<String>) -> LedgerFuture<'_, Job> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let job = state.job_by_uuid_mut(job_uuid)?;
            job.mark_running(artifact_path)?;
            Ok(job.clone())
        })
    }

    fn complete(&self, job_uuid: Uuid, outcome: JobOutcome) -> LedgerFuture<'_, Job> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let job = state.job_by_uuid_mut(job_uuid)?;
            job.complete(outcome, Utc::now())?;
            Ok(job.clone())
        })
    }

    fn list_by_parent(&self, parent: JobParent) -> LedgerFuture<'_, Vec<Job>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .await
                .jobs
                .values()
                .filter(|job| job.parent == parent)
                .cloned()
                .collect())
        })
    }

    fn find_by_uuid(&self, job_uuid: Uuid) -> LedgerFuture<'_, Option<Job>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .await
                .jobs
                .values()
                .find(|job| job.uuid == job_uuid)
                .cloned())
        })
    }
}
