//! Remote command execution on hypervisor hosts over SSH.
//!
//! Each command runs in its own `ssh` process. Host passwords reach the
//! client through `sshpass -e`, which reads them from the `SSHPASS`
//! environment variable so they never appear on a command line.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::debug;

use crate::model::HostTarget;

mod command;
mod error;
mod types;

pub use command::RemoteCommand;
pub use error::RemoteError;
pub use types::{
    CommandOutput, CommandRequest, CommandRunner, ProcessCommandRunner, RemoteFuture,
};

/// `ssh` exit status for connection-level failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// `sshpass` exit status for a rejected password.
const SSHPASS_BAD_PASSWORD: i32 = 5;

/// `sshpass` exit status for an unknown host key under strict checking.
const SSHPASS_HOST_KEY_UNKNOWN: i32 = 6;

/// Leading stderr text that `ssh` or `sshpass` write about the connection
/// itself rather than the remote command.
const CLIENT_MESSAGE_PREFIXES: &[&str] = &[
    "ssh:",
    "sshpass:",
    "Permission denied",
    "Host key verification failed",
    "kex_exchange_identification",
    "Connection closed",
    "Connection reset",
    "Connection timed out",
];

/// Runs a single command line on a host.
pub trait RemoteExecutor: Send + Sync {
    /// Executes `command` on `target` and returns its captured output.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the channel fails: the client cannot be
    /// spawned, the host is unreachable, authentication is rejected, or the
    /// execution timeout elapses. A command that runs and fails is reported
    /// through the returned [`CommandOutput`].
    fn execute<'a>(
        &'a self,
        target: &'a HostTarget,
        command: &'a RemoteCommand,
    ) -> RemoteFuture<'a, CommandOutput>;
}

/// SSH client settings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Path to the `sshpass` executable.
    pub sshpass_bin: String,
    /// SSH port on the hosts.
    pub port: u16,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Upper bound on a single command, including the connection.
    pub command_timeout: Duration,
    /// Whether to enforce host key checking.
    pub strict_host_key_checking: bool,
    /// Known hosts file handed to ssh.
    pub known_hosts_file: String,
}

/// [`RemoteExecutor`] backed by the OpenSSH client.
#[derive(Clone, Debug)]
pub struct SshExecutor<R: CommandRunner> {
    settings: SshSettings,
    runner: R,
}

impl SshExecutor<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub const fn with_process_runner(settings: SshSettings) -> Self {
        Self::new(settings, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshExecutor<R> {
    /// Creates an executor using the provided runner.
    #[must_use]
    pub const fn new(settings: SshSettings, runner: R) -> Self {
        Self { settings, runner }
    }

    /// Returns the SSH settings.
    #[must_use]
    pub const fn settings(&self) -> &SshSettings {
        &self.settings
    }

    fn build_request(&self, target: &HostTarget, command: &RemoteCommand) -> CommandRequest {
        let mut args = vec![
            OsString::from("-e"),
            OsString::from(&self.settings.ssh_bin),
            OsString::from("-p"),
            OsString::from(self.settings.port.to_string()),
            OsString::from("-o"),
            OsString::from(format!(
                "ConnectTimeout={}",
                self.settings.connect_timeout.as_secs().max(1)
            )),
            OsString::from("-o"),
            OsString::from("NumberOfPasswordPrompts=1"),
            OsString::from("-o"),
            OsString::from("PubkeyAuthentication=no"),
            OsString::from("-o"),
            OsString::from("LogLevel=ERROR"),
        ];

        if !self.settings.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.settings.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.settings.known_hosts_file
            )));
        }

        args.push(OsString::from(format!(
            "{}@{}",
            target.username,
            ssh_host(&target.address)
        )));
        args.push(OsString::from(command.render()));

        CommandRequest {
            program: self.settings.sshpass_bin.clone(),
            args,
            envs: vec![(
                String::from("SSHPASS"),
                target.password.expose().to_owned(),
            )],
            timeout: self.settings.command_timeout,
        }
    }
}

impl<R: CommandRunner> RemoteExecutor for SshExecutor<R> {
    fn execute<'a>(
        &'a self,
        target: &'a HostTarget,
        command: &'a RemoteCommand,
    ) -> RemoteFuture<'a, CommandOutput> {
        Box::pin(async move {
            let request = self.build_request(target, command);
            debug!(host = %target.address, command = %command, "running remote command");
            let output = self.runner.run(&request).await?;
            classify(target, output)
        })
    }
}

/// Separates channel failures from command failures using the exit codes
/// `ssh` and `sshpass` reserve for themselves.
///
/// Both clients pass the remote exit status through, so a reserved code only
/// counts as a channel failure when stderr is empty or carries one of the
/// clients' own messages. Anything else is the remote command's output.
fn classify(target: &HostTarget, output: CommandOutput) -> Result<CommandOutput, RemoteError> {
    if !is_client_message(&output.stderr) {
        return Ok(output);
    }
    match output.code {
        Some(SSHPASS_BAD_PASSWORD) => Err(RemoteError::Authentication {
            host: target.address.clone(),
            username: target.username.clone(),
        }),
        Some(SSHPASS_HOST_KEY_UNKNOWN) => Err(RemoteError::Connection {
            host: target.address.clone(),
            message: String::from("host key is not trusted"),
        }),
        Some(SSH_CONNECTION_FAILURE) => Err(RemoteError::Connection {
            host: target.address.clone(),
            message: connection_message(&output.stderr),
        }),
        _ => Ok(output),
    }
}

fn is_client_message(stderr: &str) -> bool {
    let trimmed = stderr.trim_start();
    trimmed.is_empty()
        || CLIENT_MESSAGE_PREFIXES
            .iter()
            .any(|prefix| trimmed.starts_with(prefix))
}

fn connection_message(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::from("ssh exited with status 255")
    } else {
        trimmed.to_owned()
    }
}

/// Strips a control-plane port from `address`, leaving the host part that
/// ssh expects.
fn ssh_host(address: &str) -> String {
    if let Ok(socket) = address.parse::<SocketAddr>() {
        return socket.ip().to_string();
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
            host.to_owned()
        }
        _ => address.to_owned(),
    }
}

#[cfg(test)]
mod tests;
