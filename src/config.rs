//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use axum::http::HeaderValue;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::remote::SshSettings;
use crate::workflow::{ArtifactLayout, LatestBackupPolicy, WorkflowSettings};

/// Default address the HTTP API listens on.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5000";

/// Default SQLite database location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://vmvault.db?mode=rwc";

/// Service settings merged from defaults, `vmvault.toml`, and `VMVAULT_*`
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VMVAULT",
    discovery(
        app_name = "vmvault",
        env_var = "VMVAULT_CONFIG_PATH",
        config_file_name = "vmvault.toml",
        dotfile_name = ".vmvault.toml",
        project_file_name = "vmvault.toml"
    )
)]
pub struct ServiceConfig {
    /// Socket address for the HTTP API.
    #[ortho_config(default = DEFAULT_BIND_ADDRESS.to_owned())]
    pub bind_address: String,
    /// sqlx connection string for the job ledger and registries.
    #[ortho_config(default = DEFAULT_DATABASE_URL.to_owned())]
    pub database_url: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `sshpass` executable used to feed host passwords to ssh.
    #[ortho_config(default = "sshpass".to_owned())]
    pub sshpass_bin: String,
    /// SSH port on the hypervisor hosts.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Seconds allowed for establishing an SSH connection.
    #[ortho_config(default = 10)]
    pub ssh_connect_timeout_secs: u64,
    /// Seconds allowed for a single remote command, exports included.
    #[ortho_config(default = 7200)]
    pub command_timeout_secs: u64,
    /// Whether to enforce SSH host key checking.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file handed to ssh.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Directory under which storage repositories are mounted on the hosts.
    #[ortho_config(default = "/run/sr-mount".to_owned())]
    pub backup_mount_root: String,
    /// Directory inside each storage repository that holds exports.
    #[ortho_config(default = "xcp-backups".to_owned())]
    pub backup_subdirectory: String,
    /// URL scheme for the XAPI control plane (`http` or `https`).
    #[ortho_config(default = "http".to_owned())]
    pub xapi_scheme: String,
    /// Seconds allowed for a single XAPI call.
    #[ortho_config(default = 30)]
    pub xapi_timeout_secs: u64,
    /// Whether "latest backup" restores only consider successful jobs.
    #[ortho_config(default = true)]
    pub restore_latest_requires_success: bool,
    /// Origin allowed by CORS, for a browser front end.
    pub cors_allow_origin: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to vmvault.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

impl ServiceConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("vmvault")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is blank,
    /// or [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.bind_address,
                FieldMetadata::new("bind address", "VMVAULT_BIND_ADDRESS", "bind_address"),
            ),
            (
                &self.database_url,
                FieldMetadata::new("database URL", "VMVAULT_DATABASE_URL", "database_url"),
            ),
            (
                &self.ssh_bin,
                FieldMetadata::new("ssh executable", "VMVAULT_SSH_BIN", "ssh_bin"),
            ),
            (
                &self.sshpass_bin,
                FieldMetadata::new("sshpass executable", "VMVAULT_SSHPASS_BIN", "sshpass_bin"),
            ),
            (
                &self.ssh_known_hosts_file,
                FieldMetadata::new(
                    "known hosts file",
                    "VMVAULT_SSH_KNOWN_HOSTS_FILE",
                    "ssh_known_hosts_file",
                ),
            ),
            (
                &self.backup_mount_root,
                FieldMetadata::new(
                    "storage repository mount root",
                    "VMVAULT_BACKUP_MOUNT_ROOT",
                    "backup_mount_root",
                ),
            ),
            (
                &self.backup_subdirectory,
                FieldMetadata::new(
                    "backup subdirectory",
                    "VMVAULT_BACKUP_SUBDIRECTORY",
                    "backup_subdirectory",
                ),
            ),
        ];
        for (value, metadata) in &required {
            if value.trim().is_empty() {
                return Err(metadata.missing());
            }
        }

        if !matches!(self.xapi_scheme.as_str(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "xapi_scheme must be http or https, got '{}'",
                self.xapi_scheme
            )));
        }
        for (value, field) in [
            (self.ssh_connect_timeout_secs, "ssh_connect_timeout_secs"),
            (self.command_timeout_secs, "command_timeout_secs"),
            (self.xapi_timeout_secs, "xapi_timeout_secs"),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be greater than zero"
                )));
            }
        }
        if self.ssh_port == 0 {
            return Err(ConfigError::Invalid(String::from(
                "ssh_port must be greater than zero",
            )));
        }
        self.cors_origin()?;
        Ok(())
    }

    /// Origin accepted by CORS, or `None` to accept any.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the origin is not a valid header
    /// value.
    pub fn cors_origin(&self) -> Result<Option<HeaderValue>, ConfigError> {
        let Some(origin) = self.cors_allow_origin.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if origin.is_empty() || origin == "*" {
            return Ok(None);
        }
        HeaderValue::from_str(origin).map(Some).map_err(|err| {
            ConfigError::Invalid(format!("cors_allow_origin '{origin}' is not usable: {err}"))
        })
    }

    /// SSH settings for the remote executor.
    #[must_use]
    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            ssh_bin: self.ssh_bin.clone(),
            sshpass_bin: self.sshpass_bin.clone(),
            port: self.ssh_port,
            connect_timeout: Duration::from_secs(self.ssh_connect_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            strict_host_key_checking: self.ssh_strict_host_key_checking,
            known_hosts_file: self.ssh_known_hosts_file.clone(),
        }
    }

    /// Settings shared by the backup and restore workflows.
    #[must_use]
    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            layout: ArtifactLayout::new(&self.backup_mount_root, &self.backup_subdirectory),
            latest_policy: if self.restore_latest_requires_success {
                LatestBackupPolicy::LatestSuccessful
            } else {
                LatestBackupPolicy::LatestAttempt
            },
        }
    }

    /// Per-call timeout for the XAPI client.
    #[must_use]
    pub const fn xapi_timeout(&self) -> Duration {
        Duration::from_secs(self.xapi_timeout_secs)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The `ortho-config` loader failed.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
