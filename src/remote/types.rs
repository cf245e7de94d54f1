//! Process runner abstraction underneath the SSH executor.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::RemoteError;

/// Boxed future returned by [`CommandRunner`] and the remote executor.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns `true` when the command exited zero and wrote nothing to
    /// standard error. `xe` reports several failures on stderr while still
    /// exiting zero, so both conditions count.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.is_success() && self.stderr.trim().is_empty()
    }
}

/// A local process invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandRequest {
    /// Program to execute.
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<OsString>,
    /// Extra environment variables for the child.
    pub envs: Vec<(String, String)>,
    /// Upper bound on the run time of the process.
    pub timeout: Duration,
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs the request, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started, or
    /// [`RemoteError::Timeout`] when it outlives `request.timeout`.
    fn run<'a>(&'a self, request: &'a CommandRequest) -> RemoteFuture<'a, CommandOutput>;
}

/// Real command runner that spawns child processes on the local machine.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(&'a self, request: &'a CommandRequest) -> RemoteFuture<'a, CommandOutput> {
        Box::pin(async move {
            let mut command = Command::new(&request.program);
            command
                .args(&request.args)
                .envs(request.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(Stdio::null())
                .kill_on_drop(true);

            // Dropping the output future on timeout kills the child.
            let output = tokio::time::timeout(request.timeout, command.output())
                .await
                .map_err(|_| RemoteError::Timeout {
                    seconds: request.timeout.as_secs(),
                })?
                .map_err(|err| RemoteError::Spawn {
                    program: request.program.clone(),
                    message: err.to_string(),
                })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}
