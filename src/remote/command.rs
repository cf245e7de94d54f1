//! Shell command lines sent to hypervisor hosts.
//!
//! Every interpolated value is shell-escaped. Values that are already safe
//! (UUIDs, absolute paths) render unchanged, which keeps logged commands
//! readable.

use std::borrow::Cow;
use std::fmt;

use shell_escape::unix::escape;

/// One command line to run on a host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
}

impl RemoteCommand {
    /// Starts a command for `program`.
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
            args: Vec::new(),
        }
    }

    /// Starts an `xe` command for the given subcommand.
    #[must_use]
    pub fn xe(subcommand: &str) -> Self {
        Self::new("xe").arg(subcommand)
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn arg(mut self, value: &str) -> Self {
        self.args.push(quote(value));
        self
    }

    /// Appends a `key=value` argument, escaping the value.
    #[must_use]
    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.args.push(format!("{key}={}", quote(value)));
        self
    }

    /// Appends a boolean `key=true|false` argument.
    #[must_use]
    pub fn flag(self, key: &str, value: bool) -> Self {
        self.param(key, if value { "true" } else { "false" })
    }

    /// Renders the command line.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}
