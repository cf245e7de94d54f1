//! Inventory records returned to API callers, and the raw XAPI shapes they
//! are decoded from.

use serde::{Deserialize, Deserializer, Serialize};

/// A storage repository visible to a host.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StorageRepository {
    /// Repository UUID.
    pub uuid: String,
    /// Display name.
    pub name: String,
    /// Driver type, for example `nfs` or `lvm`.
    #[serde(rename = "type")]
    pub sr_type: String,
    /// Capacity in bytes.
    pub physical_size_bytes: u64,
    /// Used space in bytes.
    pub physical_utilisation_bytes: u64,
    /// Content type label.
    pub content_type: String,
}

impl StorageRepository {
    /// Returns `true` for NFS-backed repositories, the only kind that can
    /// hold exported artifacts.
    #[must_use]
    pub fn is_nfs(&self) -> bool {
        self.sr_type.eq_ignore_ascii_case("nfs")
    }
}

/// A guest VM.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VirtualMachine {
    /// VM UUID.
    pub uuid: String,
    /// Display name.
    pub name_label: String,
    /// Power state as reported by the hypervisor.
    pub power_state: String,
    /// Static memory ceiling in bytes.
    pub memory_static_max: u64,
    /// Maximum virtual CPU count.
    #[serde(rename = "VCPUs_max")]
    pub vcpus_max: u64,
    /// UUID of the host the VM currently runs on.
    pub host_uuid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SrRecord {
    pub(crate) uuid: String,
    #[serde(default)]
    pub(crate) name_label: String,
    #[serde(rename = "type", default)]
    pub(crate) sr_type: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub(crate) physical_size: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub(crate) physical_utilisation: u64,
    #[serde(default)]
    pub(crate) content_type: String,
}

impl From<SrRecord> for StorageRepository {
    fn from(record: SrRecord) -> Self {
        Self {
            uuid: record.uuid,
            name: record.name_label,
            sr_type: record.sr_type,
            physical_size_bytes: record.physical_size,
            physical_utilisation_bytes: record.physical_utilisation,
            content_type: record.content_type,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct VmRecord {
    pub(crate) uuid: String,
    #[serde(default)]
    pub(crate) name_label: String,
    #[serde(default)]
    pub(crate) power_state: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub(crate) memory_static_max: u64,
    #[serde(rename = "VCPUs_max", default, deserialize_with = "lenient_u64")]
    pub(crate) vcpus_max: u64,
    #[serde(default)]
    pub(crate) is_a_template: bool,
    #[serde(default)]
    pub(crate) is_control_domain: bool,
    #[serde(default)]
    pub(crate) resident_on: Option<String>,
}

impl VmRecord {
    /// Templates, snapshots, and dom0 are not guests an operator can back up.
    pub(crate) const fn is_guest(&self) -> bool {
        !self.is_a_template && !self.is_control_domain
    }

    /// Host reference, ignoring XAPI's null reference for halted VMs.
    pub(crate) fn host_ref(&self) -> Option<&str> {
        self.resident_on
            .as_deref()
            .filter(|reference| !reference.is_empty() && *reference != NULL_REF)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct HostRecord {
    pub(crate) uuid: String,
}

/// XAPI's placeholder for an unset object reference.
pub(crate) const NULL_REF: &str = "OpaqueRef:NULL";

/// XAPI JSON-RPC encodes 64-bit integers as strings; older builds send plain
/// numbers. Negative sentinels (`-1` for unknown) collapse to zero.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Unsigned(u64),
        Signed(i64),
        Text(String),
    }

    match Wire::deserialize(deserializer)? {
        Wire::Unsigned(value) => Ok(value),
        Wire::Signed(value) => Ok(u64::try_from(value).unwrap_or(0)),
        Wire::Text(text) => {
            let trimmed = text.trim();
            if trimmed.starts_with('-') {
                return trimmed
                    .parse::<i64>()
                    .map(|_| 0)
                    .map_err(serde::de::Error::custom);
            }
            trimmed.parse::<u64>().map_err(serde::de::Error::custom)
        }
    }
}
