//! XAPI JSON-RPC client.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::types::{HostRecord, SrRecord, VmRecord};
use super::{InventoryClient, InventoryError, InventoryFuture, StorageRepository, VirtualMachine};
use crate::model::HostTarget;

const LOGIN_METHOD: &str = "session.login_with_password";
const AUTH_FAILED: &str = "SESSION_AUTHENTICATION_FAILED";
const API_VERSION: &str = "1.0";
const ORIGINATOR: &str = "vmvault";

/// [`InventoryClient`] speaking XAPI JSON-RPC at `<scheme>://<address>/jsonrpc`.
#[derive(Debug)]
pub struct XapiClient {
    http: reqwest::Client,
    scheme: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Vec<Value>,
}

impl RpcFault {
    fn describe(&self) -> String {
        let details: Vec<String> = self
            .data
            .iter()
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect();
        if details.is_empty() {
            self.message.clone()
        } else {
            format!("{} ({})", self.message, details.join(", "))
        }
    }
}

impl XapiClient {
    /// Builds a client using `scheme` (`http` or `https`) and a per-request
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Transport`] when the HTTP client cannot be
    /// constructed.
    pub fn new(scheme: &str, timeout: Duration) -> Result<Self, InventoryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| InventoryError::Transport {
                address: String::from("<client>"),
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            scheme: scheme.to_owned(),
            next_id: AtomicU64::new(1),
        })
    }

    fn endpoint(&self, address: &str) -> String {
        format!("{}://{address}/jsonrpc", self.scheme)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        address: &str,
        method: &str,
        params: Value,
    ) -> Result<T, InventoryError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });
        let transport = |err: reqwest::Error| InventoryError::Transport {
            address: address.to_owned(),
            message: err.to_string(),
        };

        let response: RpcResponse = self
            .http
            .post(self.endpoint(address))
            .json(&body)
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(|err| InventoryError::Decode {
                method: method.to_owned(),
                message: err.to_string(),
            })?;

        if let Some(fault) = response.error {
            if method == LOGIN_METHOD && fault.message == AUTH_FAILED {
                return Err(InventoryError::Authentication {
                    address: address.to_owned(),
                });
            }
            return Err(InventoryError::Rpc {
                method: method.to_owned(),
                message: fault.describe(),
            });
        }

        let result = response.result.ok_or_else(|| InventoryError::Decode {
            method: method.to_owned(),
            message: String::from("response carried neither result nor error"),
        })?;
        serde_json::from_value(result).map_err(|err| InventoryError::Decode {
            method: method.to_owned(),
            message: err.to_string(),
        })
    }

    async fn login(&self, target: &HostTarget) -> Result<String, InventoryError> {
        self.call(
            &target.address,
            LOGIN_METHOD,
            json!([
                target.username,
                target.password.expose(),
                API_VERSION,
                ORIGINATOR
            ]),
        )
        .await
    }

    async fn logout(&self, target: &HostTarget, session: &str) {
        let result: Result<Value, _> = self
            .call(&target.address, "session.logout", json!([session]))
            .await;
        if let Err(err) = result {
            warn!(host = %target.address, error = %err, "failed to close control plane session");
        }
    }

    async fn list_storage(
        &self,
        target: &HostTarget,
        session: &str,
    ) -> Result<Vec<StorageRepository>, InventoryError> {
        let records: BTreeMap<String, SrRecord> = self
            .call(&target.address, "SR.get_all_records", json!([session]))
            .await?;
        let mut repositories: Vec<StorageRepository> = records
            .into_values()
            .map(StorageRepository::from)
            .collect();
        repositories.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.uuid.cmp(&b.uuid)));
        Ok(repositories)
    }

    async fn list_vms(
        &self,
        target: &HostTarget,
        session: &str,
    ) -> Result<Vec<VirtualMachine>, InventoryError> {
        let records: BTreeMap<String, VmRecord> = self
            .call(&target.address, "VM.get_all_records", json!([session]))
            .await?;

        let mut host_uuids: HashMap<String, Option<String>> = HashMap::new();
        let mut vms = Vec::new();
        for record in records.into_values().filter(VmRecord::is_guest) {
            let host_uuid = match record.host_ref() {
                Some(host_ref) => {
                    if !host_uuids.contains_key(host_ref) {
                        let uuid = self.host_uuid(target, session, host_ref).await;
                        host_uuids.insert(host_ref.to_owned(), uuid);
                    }
                    host_uuids.get(host_ref).cloned().flatten()
                }
                None => None,
            };
            vms.push(VirtualMachine {
                uuid: record.uuid,
                name_label: record.name_label,
                power_state: record.power_state,
                memory_static_max: record.memory_static_max,
                vcpus_max: record.vcpus_max,
                host_uuid,
            });
        }
        vms.sort_by(|a, b| {
            a.name_label
                .cmp(&b.name_label)
                .then_with(|| a.uuid.cmp(&b.uuid))
        });
        Ok(vms)
    }

    /// Resolves a host reference; lookup failures leave the VM's host blank
    /// rather than failing the listing.
    async fn host_uuid(&self, target: &HostTarget, session: &str, host_ref: &str) -> Option<String> {
        let record: Result<HostRecord, _> = self
            .call(&target.address, "host.get_record", json!([session, host_ref]))
            .await;
        match record {
            Ok(record) => Some(record.uuid),
            Err(err) => {
                debug!(host = %target.address, host_ref, error = %err, "host lookup failed");
                None
            }
        }
    }
}

impl InventoryClient for XapiClient {
    fn verify_login<'a>(&'a self, target: &'a HostTarget) -> InventoryFuture<'a, ()> {
        Box::pin(async move {
            let session = self.login(target).await?;
            self.logout(target, &session).await;
            Ok(())
        })
    }

    fn storage_repositories<'a>(
        &'a self,
        target: &'a HostTarget,
    ) -> InventoryFuture<'a, Vec<StorageRepository>> {
        Box::pin(async move {
            let session = self.login(target).await?;
            let result = self.list_storage(target, &session).await;
            self.logout(target, &session).await;
            result
        })
    }

    fn virtual_machines<'a>(
        &'a self,
        target: &'a HostTarget,
    ) -> InventoryFuture<'a, Vec<VirtualMachine>> {
        Box::pin(async move {
            let session = self.login(target).await?;
            let result = self.list_vms(target, &session).await;
            self.logout(target, &session).await;
            result
        })
    }
}
