//! Hypervisor hosts and the credentials used to reach them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{HostId, ValidationError, require_text};

/// Password for a host account. `Debug` output is redacted.
#[derive(Clone, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    /// Wraps a plaintext password.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the plaintext password.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// A registered hypervisor endpoint. Unique by address.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Host {
    /// Storage key.
    pub id: HostId,
    /// Display name.
    pub name: String,
    /// Network address used for both SSH and the control plane.
    #[serde(rename = "host_ip")]
    pub address: String,
    /// Account name on the host.
    pub username: String,
    /// Account password; never serialised.
    #[serde(skip_serializing)]
    pub password: Password,
    /// Whether the last explicit connection test succeeded.
    pub connected: bool,
}

impl Host {
    /// Returns the connection details the remote executor and the inventory
    /// client need.
    #[must_use]
    pub fn target(&self) -> HostTarget {
        HostTarget {
            address: self.address.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Resolved connection details for one host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostTarget {
    /// Hostname or IP address, optionally with a port for the control plane.
    pub address: String,
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: Password,
}

/// Payload used to register a host.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NewHost {
    /// Optional display name; defaults to `Host-<address>`.
    #[serde(default)]
    pub name: Option<String>,
    /// Network address.
    pub host_ip: String,
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: Password,
}

impl NewHost {
    /// Trims and validates the payload.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the address, username, or password is
    /// blank.
    pub fn normalise(self) -> Result<Self, ValidationError> {
        let host_ip = require_text(&self.host_ip, "host_ip")?;
        let username = require_text(&self.username, "username")?;
        if self.password.expose().is_empty() {
            return Err(ValidationError::new("password", "must not be empty"));
        }
        let name = match self.name {
            Some(name) if !name.trim().is_empty() => name.trim().to_owned(),
            _ => format!("Host-{host_ip}"),
        };
        Ok(Self {
            name: Some(name),
            host_ip,
            username,
            password: self.password,
        })
    }

    /// Connection details for verifying the credentials before the host is
    /// stored.
    #[must_use]
    pub fn target(&self) -> HostTarget {
        HostTarget {
            address: self.host_ip.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Mutable fields of a host.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HostUpdate {
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
    /// New address.
    #[serde(default)]
    pub host_ip: Option<String>,
    /// New account name.
    #[serde(default)]
    pub username: Option<String>,
    /// New password.
    #[serde(default)]
    pub password: Option<Password>,
}

impl HostUpdate {
    /// Applies the update to `host` after validating every supplied field.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when a supplied field is blank; `host` is
    /// left untouched in that case.
    pub fn apply(self, host: &Host) -> Result<Host, ValidationError> {
        let mut updated = host.clone();
        if let Some(name) = self.name {
            updated.name = require_text(&name, "name")?;
        }
        if let Some(address) = self.host_ip {
            updated.address = require_text(&address, "host_ip")?;
        }
        if let Some(username) = self.username {
            updated.username = require_text(&username, "username")?;
        }
        if let Some(password) = self.password {
            if password.expose().is_empty() {
                return Err(ValidationError::new("password", "must not be empty"));
            }
            updated.password = password;
        }
        if updated.address != host.address
            || updated.username != host.username
            || updated.password != host.password
        {
            updated.connected = false;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host {
            id: HostId::new(1),
            name: String::from("pool-master"),
            address: String::from("10.0.0.5"),
            username: String::from("root"),
            password: Password::new("secret"),
            connected: true,
        }
    }

    #[test]
    fn password_debug_is_redacted() {
        let rendered = format!("{:?}", host());
        assert!(!rendered.contains("secret"), "leaked: {rendered}");
    }

    #[test]
    fn serialised_host_omits_password() {
        let json = serde_json::to_value(host()).expect("serialises");
        assert_eq!(json.get("host_ip").and_then(|v| v.as_str()), Some("10.0.0.5"));
        assert!(json.get("password").is_none());
    }

    #[test]
    fn new_host_defaults_name_from_address() {
        let payload = NewHost {
            name: None,
            host_ip: String::from(" 10.0.0.9 "),
            username: String::from("root"),
            password: Password::new("pw"),
        };
        let normalised = payload.normalise().expect("valid payload");
        assert_eq!(normalised.host_ip, "10.0.0.9");
        assert_eq!(normalised.name.as_deref(), Some("Host-10.0.0.9"));
    }

    #[test]
    fn credential_change_clears_connected_flag() {
        let update = HostUpdate {
            password: Some(Password::new("rotated")),
            ..HostUpdate::default()
        };
        let updated = update.apply(&host()).expect("valid update");
        assert!(!updated.connected);
        assert_eq!(updated.password.expose(), "rotated");
    }

    #[test]
    fn rename_keeps_connected_flag() {
        let update = HostUpdate {
            name: Some(String::from("renamed")),
            ..HostUpdate::default()
        };
        let updated = update.apply(&host()).expect("valid update");
        assert!(updated.connected);
        assert_eq!(updated.name, "renamed");
    }

    #[test]
    fn blank_username_is_rejected() {
        let update = HostUpdate {
            username: Some(String::from("  ")),
            ..HostUpdate::default()
        };
        let err = update.apply(&host()).expect_err("blank username");
        assert_eq!(err.field, "username");
    }

    #[test]
    fn unknown_update_fields_are_refused() {
        let result: Result<HostUpdate, _> = serde_json::from_str(r#"{"connected": true}"#);
        assert!(result.is_err());
    }
}
