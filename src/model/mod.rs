//! Domain records shared by the job ledger, the registries, and the
//! backup/restore workflows.
//!
//! Records are plain values: the workflows receive fully resolved hosts and
//! definitions instead of navigating relationships lazily.

mod definition;
mod host;
mod job;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use definition::{
    BackupDefinition, BackupUpdate, NewBackupDefinition, NewRestoreDefinition,
    RestoreDefinition, RestoreUpdate,
};
pub use host::{Host, HostTarget, HostUpdate, NewHost, Password};
pub use job::{Job, JobKind, JobOutcome, JobParent, JobStatus, TransitionError};

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw storage key.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw storage key.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

record_id!(
    /// Storage key of a [`Host`].
    HostId
);
record_id!(
    /// Storage key of a [`BackupDefinition`].
    BackupId
);
record_id!(
    /// Storage key of a [`RestoreDefinition`].
    RestoreId
);
record_id!(
    /// Storage key of a [`Job`]. Distinct from the job's UUID, which is the
    /// identifier that travels across systems.
    JobId
);

/// Raised when a request carries a missing or malformed field.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Name of the offending field as it appears on the wire.
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl ValidationError {
    /// Builds a validation error for `field`.
    #[must_use]
    pub fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Trims `value` and rejects it when empty.
pub(crate) fn require_text(value: &str, field: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    Ok(trimmed.to_owned())
}

/// Trims `value` and checks it is safe to interpolate into a remote path.
///
/// Storage repository and VM identifiers end up inside file names on the
/// hypervisor, so path separators and shell metacharacters are refused even
/// though every command argument is also shell-escaped.
pub(crate) fn require_identifier(value: &str, field: &str) -> Result<String, ValidationError> {
    let trimmed = require_text(value, field)?;
    let allowed = |ch: char| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':');
    if !trimmed.chars().all(allowed) || trimmed.starts_with('.') {
        return Err(ValidationError::new(
            field,
            "may only contain ASCII letters, digits, '-', '_', '.', and ':'",
        ));
    }
    Ok(trimmed)
}
