//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, MutexGuard};

use crate::config::ServiceConfig;
use crate::inventory::{
    InventoryClient, InventoryError, InventoryFuture, StorageRepository, VirtualMachine,
};
use crate::model::{
    BackupDefinition, BackupId, Host, HostId, HostTarget, NewBackupDefinition, NewHost,
    NewRestoreDefinition, Password, RestoreDefinition,
};
use crate::remote::{
    CommandOutput, CommandRequest, CommandRunner, RemoteCommand, RemoteError, RemoteExecutor,
    RemoteFuture,
};
use crate::store::{Registry, StoreError};

type Queue<T> = Arc<StdMutex<VecDeque<T>>>;
type Log<T> = Arc<StdMutex<Vec<T>>>;

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn output(code: Option<i32>, stdout: impl Into<String>, stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        code,
        stdout: stdout.into(),
        stderr: stderr.into(),
    }
}

/// Scripted process runner that returns pre-seeded results in FIFO order.
///
/// Used to drive deterministic outcomes through [`crate::remote::SshExecutor`]
/// without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Queue<Result<CommandOutput, RemoteError>>,
    requests: Log<CommandRequest>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all requests recorded so far.
    #[must_use]
    pub fn requests(&self) -> Vec<CommandRequest> {
        lock(&self.requests).clone()
    }

    /// Pushes a successful exit status with no output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(Ok(output(code, stdout, stderr)));
    }

    /// Pushes a runner error such as a timeout.
    pub fn push_error(&self, error: RemoteError) {
        lock(&self.responses).push_back(Err(error));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, request: &'a CommandRequest) -> RemoteFuture<'a, CommandOutput> {
        lock(&self.requests).push(request.clone());
        let next = lock(&self.responses).pop_front();
        Box::pin(async move {
            next.unwrap_or_else(|| {
                Err(RemoteError::Spawn {
                    program: request.program.clone(),
                    message: String::from("no scripted response available"),
                })
            })
        })
    }
}

/// A command seen by [`ScriptedExecutor`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutedCommand {
    /// Host address the command targeted.
    pub host: String,
    /// Rendered command line.
    pub command: String,
}

/// Scripted [`RemoteExecutor`] returning queued results in FIFO order.
#[derive(Clone, Debug, Default)]
pub struct ScriptedExecutor {
    responses: Queue<Result<CommandOutput, RemoteError>>,
    calls: Log<ExecutedCommand>,
}

impl ScriptedExecutor {
    /// Creates an executor with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a clean exit with the given stdout.
    pub fn push_success(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Queues a non-zero exit with the given stderr.
    pub fn push_failure(&self, stderr: impl Into<String>) {
        self.push_output(Some(1), "", stderr);
    }

    /// Queues an explicit command output.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(Ok(output(code, stdout, stderr)));
    }

    /// Queues a channel failure.
    pub fn push_error(&self, error: RemoteError) {
        lock(&self.responses).push_back(Err(error));
    }

    /// Queues the clean responses of a successful backup, from the
    /// snapshot through to its uninstall.
    pub fn push_backup_success(&self, snapshot_uuid: &str) {
        self.push_success(snapshot_uuid);
        self.push_success(snapshot_uuid);
        self.push_success("");
        self.push_success("");
        self.push_success("");
        self.push_success("");
    }

    /// Returns every command executed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ExecutedCommand> {
        lock(&self.calls).clone()
    }

    /// Returns the rendered command lines executed so far.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .map(|call| call.command.clone())
            .collect()
    }
}

impl RemoteExecutor for ScriptedExecutor {
    fn execute<'a>(
        &'a self,
        target: &'a HostTarget,
        command: &'a RemoteCommand,
    ) -> RemoteFuture<'a, CommandOutput> {
        lock(&self.calls).push(ExecutedCommand {
            host: target.address.clone(),
            command: command.render(),
        });
        let next = lock(&self.responses).pop_front();
        Box::pin(async move {
            next.unwrap_or_else(|| {
                Err(RemoteError::Spawn {
                    program: String::from("ssh"),
                    message: String::from("no scripted response available"),
                })
            })
        })
    }
}

/// How [`FakeInventory`] answers login attempts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LoginBehaviour {
    /// Accept any credentials.
    #[default]
    Accept,
    /// Reject credentials.
    Reject,
    /// Fail as if the host were down.
    Unreachable,
}

/// In-memory [`InventoryClient`] with canned listings.
#[derive(Clone, Debug, Default)]
pub struct FakeInventory {
    login: LoginBehaviour,
    storage: Vec<StorageRepository>,
    vms: Vec<VirtualMachine>,
    logins: Log<String>,
}

impl FakeInventory {
    /// Creates an inventory that accepts logins and lists nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the login behaviour.
    #[must_use]
    pub fn with_login(mut self, login: LoginBehaviour) -> Self {
        self.login = login;
        self
    }

    /// Sets the storage listing.
    #[must_use]
    pub fn with_storage(mut self, storage: Vec<StorageRepository>) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the VM listing.
    #[must_use]
    pub fn with_vms(mut self, vms: Vec<VirtualMachine>) -> Self {
        self.vms = vms;
        self
    }

    /// Addresses that attempted a login, in order.
    #[must_use]
    pub fn logins(&self) -> Vec<String> {
        lock(&self.logins).clone()
    }

    fn check_login(&self, target: &HostTarget) -> Result<(), InventoryError> {
        lock(&self.logins).push(target.address.clone());
        match self.login {
            LoginBehaviour::Accept => Ok(()),
            LoginBehaviour::Reject => Err(InventoryError::Authentication {
                address: target.address.clone(),
            }),
            LoginBehaviour::Unreachable => Err(InventoryError::Transport {
                address: target.address.clone(),
                message: String::from("connection refused"),
            }),
        }
    }
}

impl InventoryClient for FakeInventory {
    fn verify_login<'a>(&'a self, target: &'a HostTarget) -> InventoryFuture<'a, ()> {
        let result = self.check_login(target);
        Box::pin(async move { result })
    }

    fn storage_repositories<'a>(
        &'a self,
        target: &'a HostTarget,
    ) -> InventoryFuture<'a, Vec<StorageRepository>> {
        let result = self.check_login(target).map(|()| self.storage.clone());
        Box::pin(async move { result })
    }

    fn virtual_machines<'a>(
        &'a self,
        target: &'a HostTarget,
    ) -> InventoryFuture<'a, Vec<VirtualMachine>> {
        let result = self.check_login(target).map(|()| self.vms.clone());
        Box::pin(async move { result })
    }
}

/// Builds a storage repository record for listings.
#[must_use]
pub fn storage_repository(uuid: &str, name: &str, sr_type: &str) -> StorageRepository {
    StorageRepository {
        uuid: uuid.to_owned(),
        name: name.to_owned(),
        sr_type: sr_type.to_owned(),
        physical_size_bytes: 1 << 40,
        physical_utilisation_bytes: 1 << 30,
        content_type: String::from("user"),
    }
}

/// Service configuration with every default filled in.
#[must_use]
pub fn service_config() -> ServiceConfig {
    ServiceConfig {
        bind_address: String::from("127.0.0.1:0"),
        database_url: String::from("sqlite::memory:"),
        ssh_bin: String::from("ssh"),
        sshpass_bin: String::from("sshpass"),
        ssh_port: 22,
        ssh_connect_timeout_secs: 10,
        command_timeout_secs: 7200,
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        backup_mount_root: String::from("/run/sr-mount"),
        backup_subdirectory: String::from("xcp-backups"),
        xapi_scheme: String::from("http"),
        xapi_timeout_secs: 30,
        restore_latest_requires_success: true,
        cors_allow_origin: None,
    }
}

/// Registers a host with fixed credentials.
///
/// # Errors
///
/// Propagates store failures.
pub async fn seed_host(store: &dyn Registry, address: &str) -> Result<Host, StoreError> {
    store
        .insert_host(NewHost {
            name: Some(format!("xcp-{address}")),
            host_ip: address.to_owned(),
            username: String::from("root"),
            password: Password::new("secret"),
        })
        .await
}

/// Creates an active backup definition.
///
/// # Errors
///
/// Propagates store failures.
pub async fn seed_backup(
    store: &dyn Registry,
    host_id: HostId,
    vm_uuid: &str,
    sr_uuid: &str,
    retention: u32,
) -> Result<BackupDefinition, StoreError> {
    store
        .insert_backup(NewBackupDefinition {
            name: format!("backup-{vm_uuid}"),
            description: String::new(),
            vm_uuid: vm_uuid.to_owned(),
            host_id,
            sr_uuid: sr_uuid.to_owned(),
            active: true,
            retention,
            cron_schedule: None,
        })
        .await
}

/// Creates a restore definition.
///
/// # Errors
///
/// Propagates store failures.
pub async fn seed_restore(
    store: &dyn Registry,
    backup_id: Option<BackupId>,
    sr_uuid: &str,
    preserve: bool,
    power_on_after_restore: bool,
) -> Result<RestoreDefinition, StoreError> {
    store
        .insert_restore(NewRestoreDefinition {
            sr_uuid: sr_uuid.to_owned(),
            preserve,
            power_on_after_restore,
            backup_id,
        })
        .await
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
