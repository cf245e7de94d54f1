//! Command-line interface definitions for the `vmvault` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `vmvault` binary.
#[derive(Debug, Parser)]
#[command(
    name = "vmvault",
    version,
    about = "Back up and restore XCP-ng virtual machines over an HTTP API",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Apply migrations and serve the HTTP API until interrupted.
    #[command(name = "serve", about = "Serve the HTTP API")]
    Serve(ServeCommand),
    /// Create or upgrade the database schema and exit.
    #[command(name = "migrate", about = "Apply database migrations and exit")]
    Migrate,
}

/// Arguments for the `vmvault serve` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ServeCommand {
    /// Override the configured listen address, for example `127.0.0.1:5000`.
    #[arg(long, value_name = "ADDR")]
    pub(crate) bind: Option<String>,
}
