//! Backup and restore definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BackupId, HostId, RestoreId, ValidationError, require_identifier, require_text};

/// Identifies a protected VM, where its artifacts go, and how many of them
/// stay current.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BackupDefinition {
    /// Storage key.
    pub id: BackupId,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// UUID of the protected VM on the hypervisor.
    pub vm_uuid: String,
    /// Host that owns the VM.
    pub host_id: HostId,
    /// Storage repository receiving the exported artifacts.
    pub sr_uuid: String,
    /// Whether the definition is enabled.
    pub active: bool,
    /// Number of successful artifacts considered current. Always at least 1.
    pub retention: u32,
    /// Inert schedule expression kept for external schedulers.
    pub cron_schedule: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Payload used to create a [`BackupDefinition`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NewBackupDefinition {
    /// Display name.
    #[serde(alias = "backup_name")]
    pub name: String,
    /// Free-text description.
    #[serde(default, alias = "backup_description")]
    pub description: String,
    /// UUID of the protected VM.
    pub vm_uuid: String,
    /// Owning host.
    pub host_id: HostId,
    /// Target storage repository.
    pub sr_uuid: String,
    /// Whether the definition is enabled.
    #[serde(default = "enabled")]
    pub active: bool,
    /// Retention count.
    pub retention: u32,
    /// Inert schedule expression.
    #[serde(default)]
    pub cron_schedule: Option<String>,
}

const fn enabled() -> bool {
    true
}

impl NewBackupDefinition {
    /// Trims and validates the payload.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when a required field is blank, an
    /// identifier contains unsafe characters, or `retention` is zero.
    pub fn normalise(self) -> Result<Self, ValidationError> {
        Ok(Self {
            name: require_text(&self.name, "name")?,
            description: self.description.trim().to_owned(),
            vm_uuid: require_identifier(&self.vm_uuid, "vm_uuid")?,
            host_id: self.host_id,
            sr_uuid: require_identifier(&self.sr_uuid, "sr_uuid")?,
            active: self.active,
            retention: require_retention(self.retention)?,
            cron_schedule: normalise_schedule(self.cron_schedule),
        })
    }
}

/// Mutable fields of a [`BackupDefinition`]. The VM and its host are fixed
/// for the lifetime of a definition so its job history stays meaningful.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BackupUpdate {
    /// New display name.
    #[serde(default, alias = "backup_name")]
    pub name: Option<String>,
    /// New description.
    #[serde(default, alias = "backup_description")]
    pub description: Option<String>,
    /// New target storage repository.
    #[serde(default)]
    pub sr_uuid: Option<String>,
    /// Enable or disable the definition.
    #[serde(default)]
    pub active: Option<bool>,
    /// New retention count.
    #[serde(default)]
    pub retention: Option<u32>,
    /// New schedule expression; an empty string clears it.
    #[serde(default)]
    pub cron_schedule: Option<String>,
}

impl BackupUpdate {
    /// Returns `definition` with the supplied fields applied.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when a supplied field is invalid.
    pub fn apply(self, definition: &BackupDefinition) -> Result<BackupDefinition, ValidationError> {
        let mut updated = definition.clone();
        if let Some(name) = self.name {
            updated.name = require_text(&name, "name")?;
        }
        if let Some(description) = self.description {
            updated.description = description.trim().to_owned();
        }
        if let Some(sr_uuid) = self.sr_uuid {
            updated.sr_uuid = require_identifier(&sr_uuid, "sr_uuid")?;
        }
        if let Some(active) = self.active {
            updated.active = active;
        }
        if let Some(retention) = self.retention {
            updated.retention = require_retention(retention)?;
        }
        if self.cron_schedule.is_some() {
            updated.cron_schedule = normalise_schedule(self.cron_schedule);
        }
        Ok(updated)
    }
}

/// A request to materialise a VM from a backup onto a storage repository.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RestoreDefinition {
    /// Storage key.
    pub id: RestoreId,
    /// Storage repository receiving the imported VM.
    pub sr_uuid: String,
    /// Whether the import keeps the original VM identifiers.
    pub preserve: bool,
    /// Whether the imported VM is started once the import succeeds.
    pub power_on_after_restore: bool,
    /// Backup definition this restore draws from by default.
    pub backup_id: Option<BackupId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Payload used to create a [`RestoreDefinition`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NewRestoreDefinition {
    /// Target storage repository.
    pub sr_uuid: String,
    /// Preserve flag; defaults to `true`.
    #[serde(default = "enabled")]
    pub preserve: bool,
    /// Power-on flag; defaults to `false`.
    #[serde(default)]
    pub power_on_after_restore: bool,
    /// Optional source backup definition.
    #[serde(default)]
    pub backup_id: Option<BackupId>,
}

impl NewRestoreDefinition {
    /// Trims and validates the payload.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the storage repository is blank or
    /// unsafe.
    pub fn normalise(self) -> Result<Self, ValidationError> {
        Ok(Self {
            sr_uuid: require_identifier(&self.sr_uuid, "sr_uuid")?,
            ..self
        })
    }
}

/// Mutable fields of a [`RestoreDefinition`].
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RestoreUpdate {
    /// New preserve flag.
    #[serde(default)]
    pub preserve: Option<bool>,
    /// New power-on flag.
    #[serde(default)]
    pub power_on_after_restore: Option<bool>,
}

impl RestoreUpdate {
    /// Returns `definition` with the supplied fields applied.
    #[must_use]
    pub fn apply(self, definition: &RestoreDefinition) -> RestoreDefinition {
        let mut updated = definition.clone();
        if let Some(preserve) = self.preserve {
            updated.preserve = preserve;
        }
        if let Some(power_on) = self.power_on_after_restore {
            updated.power_on_after_restore = power_on;
        }
        updated
    }
}

fn require_retention(retention: u32) -> Result<u32, ValidationError> {
    if retention == 0 {
        return Err(ValidationError::new("retention", "must be at least 1"));
    }
    Ok(retention)
}

fn normalise_schedule(schedule: Option<String>) -> Option<String> {
    schedule
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
