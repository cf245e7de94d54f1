//! Persistence for hosts, definitions, and the job ledger.
//!
//! Two implementations share the traits below: [`SqliteStore`] for the
//! service and [`MemoryStore`] for tests and throwaway runs.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    BackupDefinition, BackupId, Host, HostId, Job, JobOutcome, JobParent, NewBackupDefinition,
    NewHost, NewRestoreDefinition, RestoreDefinition, RestoreId, TransitionError,
};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Boxed future returned by [`Registry`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Boxed future returned by [`JobLedger`] methods.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// Errors raised by the registries.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Record kind.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
    /// The change would break a uniqueness or reference rule.
    #[error("{0}")]
    Conflict(String),
    /// A stored row could not be turned back into a record.
    #[error("corrupt {entity} row: {message}")]
    Corrupt {
        /// Record kind.
        entity: &'static str,
        /// Decoding failure.
        message: String,
    },
    /// The database driver failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Applying migrations failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Errors raised by the job ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No job carries the given UUID.
    #[error("job {0} not found")]
    UnknownJob(Uuid),
    /// The requested status change is not allowed.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Hosts, backup definitions, and restore definitions.
pub trait Registry: Send + Sync {
    /// Stores a normalised host.
    ///
    /// Fails with [`StoreError::Conflict`] when the address is taken.
    fn insert_host(&self, host: NewHost) -> StoreFuture<'_, Host>;

    /// Lists hosts in id order.
    fn list_hosts(&self) -> StoreFuture<'_, Vec<Host>>;

    /// Fetches one host.
    fn get_host(&self, id: HostId) -> StoreFuture<'_, Option<Host>>;

    /// Fetches the host registered under `address`.
    fn find_host_by_address<'a>(&'a self, address: &'a str) -> StoreFuture<'a, Option<Host>>;

    /// Replaces a host's fields.
    ///
    /// Fails with [`StoreError::Conflict`] when the new address is taken.
    fn update_host(&self, host: Host) -> StoreFuture<'_, Host>;

    /// Deletes a host.
    ///
    /// Fails with [`StoreError::Conflict`] while a backup definition
    /// references it.
    fn delete_host(&self, id: HostId) -> StoreFuture<'_, ()>;

    /// Stores a normalised backup definition.
    ///
    /// Fails with [`StoreError::NotFound`] when the host does not exist.
    fn insert_backup(&self, definition: NewBackupDefinition)
    -> StoreFuture<'_, BackupDefinition>;

    /// Lists backup definitions in id order.
    fn list_backups(&self) -> StoreFuture<'_, Vec<BackupDefinition>>;

    /// Fetches one backup definition.
    fn get_backup(&self, id: BackupId) -> StoreFuture<'_, Option<BackupDefinition>>;

    /// Replaces a backup definition's mutable fields.
    fn update_backup(&self, definition: BackupDefinition) -> StoreFuture<'_, BackupDefinition>;

    /// Deletes a backup definition.
    ///
    /// Fails with [`StoreError::Conflict`] while jobs reference it, unless
    /// `cascade` is set, in which case its job history goes with it.
    /// Restore definitions drawing from it lose their default source.
    fn delete_backup(&self, id: BackupId, cascade: bool) -> StoreFuture<'_, ()>;

    /// Stores a normalised restore definition.
    ///
    /// Fails with [`StoreError::NotFound`] when the referenced backup
    /// definition does not exist.
    fn insert_restore(
        &self,
        definition: NewRestoreDefinition,
    ) -> StoreFuture<'_, RestoreDefinition>;

    /// Lists restore definitions in id order.
    fn list_restores(&self) -> StoreFuture<'_, Vec<RestoreDefinition>>;

    /// Fetches one restore definition.
    fn get_restore(&self, id: RestoreId) -> StoreFuture<'_, Option<RestoreDefinition>>;

    /// Replaces a restore definition's mutable fields.
    fn update_restore(&self, definition: RestoreDefinition)
    -> StoreFuture<'_, RestoreDefinition>;

    /// Deletes a restore definition, with the same job history rule as
    /// [`Registry::delete_backup`].
    fn delete_restore(&self, id: RestoreId, cascade: bool) -> StoreFuture<'_, ()>;
}

/// Append-and-update record of orchestration attempts.
pub trait JobLedger: Send + Sync {
    /// Records a new `Started` job under `parent` with a fresh UUID.
    fn create(&self, parent: JobParent) -> LedgerFuture<'_, Job>;

    /// Moves a job from `Started` to `Running`, recording its artifact.
    fn mark_running(&self, job_uuid: Uuid, artifact_path: Option<String>)
    -> LedgerFuture<'_, Job>;

    /// Records a job's terminal outcome.
    ///
    /// Completing a terminal job fails with [`LedgerError::Transition`].
    fn complete(&self, job_uuid: Uuid, outcome: JobOutcome) -> LedgerFuture<'_, Job>;

    /// Lists a parent's jobs in creation order.
    fn list_by_parent(&self, parent: JobParent) -> LedgerFuture<'_, Vec<Job>>;

    /// Fetches a job by UUID.
    fn find_by_uuid(&self, job_uuid: Uuid) -> LedgerFuture<'_, Option<Job>>;
}

/// Everything the service persists.
pub trait Store: Registry + JobLedger {}

impl<T: Registry + JobLedger> Store for T {}
