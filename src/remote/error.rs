//! Errors raised while reaching a host over SSH.

use thiserror::Error;

/// Failures of the remote command channel itself. A command that runs and
/// reports an error is not a [`RemoteError`]; its exit code and stderr are
/// returned to the caller.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// The local client process could not be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error text.
        message: String,
    },
    /// The command did not finish within the execution timeout.
    #[error("remote command timed out after {seconds}s")]
    Timeout {
        /// Configured timeout in seconds.
        seconds: u64,
    },
    /// The host rejected the supplied credentials.
    #[error("authentication failed for {username}@{host}")]
    Authentication {
        /// Host address.
        host: String,
        /// Account name.
        username: String,
    },
    /// The SSH connection could not be established.
    #[error("could not connect to {host}: {message}")]
    Connection {
        /// Host address.
        host: String,
        /// Client error text.
        message: String,
    },
}
