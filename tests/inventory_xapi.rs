//! Integration tests for the XAPI client against a local JSON-RPC fake.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use vmvault::inventory::{InventoryClient, InventoryError, XapiClient};
use vmvault::model::{HostTarget, Password};

const SESSION: &str = "OpaqueRef:session-1";

#[derive(Clone, Default)]
struct FakeXapi {
    calls: Arc<Mutex<Vec<String>>>,
    fail_sr_listing: bool,
}

impl FakeXapi {
    fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn fault(message: &str, data: &[&str]) -> Value {
    json!({ "code": 1, "message": message, "data": data })
}

async fn jsonrpc(State(fake): State<FakeXapi>, Json(request): Json<Value>) -> Json<Value> {
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let params = request.get("params").cloned().unwrap_or(Value::Null);
    fake.calls
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(method.clone());

    let outcome = match method.as_str() {
        "session.login_with_password" => {
            if params.get(1).and_then(Value::as_str) == Some("secret") {
                Ok(json!(SESSION))
            } else {
                Err(fault("SESSION_AUTHENTICATION_FAILED", &["root", "bad"]))
            }
        }
        "session.logout" => Ok(Value::Null),
        "SR.get_all_records" if fake.fail_sr_listing => {
            Err(fault("PERMISSION_DENIED", &["SR.get_all_records"]))
        }
        "SR.get_all_records" => Ok(json!({
            "OpaqueRef:sr-b": {
                "uuid": "sr-b", "name_label": "Backups", "type": "nfs",
                "physical_size": "1099511627776", "physical_utilisation": "1073741824",
                "content_type": "user"
            },
            "OpaqueRef:sr-a": {
                "uuid": "sr-a", "name_label": "Local storage", "type": "lvm",
                "physical_size": 500, "physical_utilisation": -1,
                "content_type": "user"
            }
        })),
        "VM.get_all_records" => Ok(json!({
            "OpaqueRef:vm-1": {
                "uuid": "vm-1", "name_label": "web", "power_state": "Running",
                "memory_static_max": "2147483648", "VCPUs_max": "2",
                "is_a_template": false, "is_control_domain": false,
                "resident_on": "OpaqueRef:host-1"
            },
            "OpaqueRef:vm-2": {
                "uuid": "vm-2", "name_label": "db", "power_state": "Halted",
                "memory_static_max": "4294967296", "VCPUs_max": "4",
                "is_a_template": false, "is_control_domain": false,
                "resident_on": "OpaqueRef:NULL"
            },
            "OpaqueRef:vm-3": {
                "uuid": "vm-3", "name_label": "app", "power_state": "Running",
                "memory_static_max": "1073741824", "VCPUs_max": "1",
                "is_a_template": false, "is_control_domain": false,
                "resident_on": "OpaqueRef:host-gone"
            },
            "OpaqueRef:tpl": {
                "uuid": "tpl-1", "name_label": "Debian template", "power_state": "Halted",
                "is_a_template": true, "is_control_domain": false
            },
            "OpaqueRef:dom0": {
                "uuid": "dom0", "name_label": "Control domain", "power_state": "Running",
                "is_a_template": false, "is_control_domain": true
            }
        })),
        "host.get_record" => match params.get(1).and_then(Value::as_str) {
            Some("OpaqueRef:host-1") => Ok(json!({ "uuid": "host-uuid-1" })),
            _ => Err(fault("HANDLE_INVALID", &["host"])),
        },
        _ => Err(fault("MESSAGE_METHOD_UNKNOWN", &[method.as_str()])),
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    Json(match outcome {
        Ok(result) => json!({ "jsonrpc": "2.0", "result": result, "id": id }),
        Err(error) => json!({ "jsonrpc": "2.0", "error": error, "id": id }),
    })
}

async fn spawn(fake: FakeXapi) -> SocketAddr {
    let app = Router::new()
        .route("/jsonrpc", post(jsonrpc))
        .with_state(fake);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap_or_else(|err| panic!("bind: {err}"));
    let address = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("local addr: {err}"));
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    address
}

fn target(address: SocketAddr, password: &str) -> HostTarget {
    HostTarget {
        address: address.to_string(),
        username: String::from("root"),
        password: Password::new(password),
    }
}

fn client() -> XapiClient {
    XapiClient::new("http", Duration::from_secs(5)).unwrap_or_else(|err| panic!("client: {err}"))
}

#[tokio::test]
async fn storage_listing_is_sorted_and_session_is_closed() {
    let fake = FakeXapi::default();
    let address = spawn(fake.clone()).await;

    let repositories = client()
        .storage_repositories(&target(address, "secret"))
        .await
        .expect("listing succeeds");

    let names: Vec<_> = repositories.iter().map(|sr| sr.name.as_str()).collect();
    assert_eq!(names, ["Backups", "Local storage"]);
    let backups = repositories.first().expect("one repository");
    assert!(backups.is_nfs());
    assert_eq!(backups.physical_size_bytes, 1_099_511_627_776);
    let local = repositories.last().expect("two repositories");
    assert_eq!(local.physical_utilisation_bytes, 0);

    assert_eq!(
        fake.calls(),
        [
            "session.login_with_password",
            "SR.get_all_records",
            "session.logout"
        ]
    );
}

#[tokio::test]
async fn vm_listing_skips_templates_and_resolves_hosts() {
    let fake = FakeXapi::default();
    let address = spawn(fake.clone()).await;

    let vms = client()
        .virtual_machines(&target(address, "secret"))
        .await
        .expect("listing succeeds");

    let summary: Vec<_> = vms
        .iter()
        .map(|vm| (vm.uuid.as_str(), vm.host_uuid.as_deref()))
        .collect();
    assert_eq!(
        summary,
        [
            ("vm-3", None),
            ("vm-2", None),
            ("vm-1", Some("host-uuid-1")),
        ]
    );
    let web = vms.last().expect("web vm");
    assert_eq!(web.vcpus_max, 2);
    assert_eq!(web.memory_static_max, 2_147_483_648);
    assert_eq!(fake.calls().last().map(String::as_str), Some("session.logout"));
}

#[tokio::test]
async fn rejected_credentials_are_classified() {
    let fake = FakeXapi::default();
    let address = spawn(fake.clone()).await;

    let err = client()
        .verify_login(&target(address, "wrong"))
        .await
        .expect_err("login fails");

    assert_eq!(
        err,
        InventoryError::Authentication {
            address: address.to_string()
        }
    );
    assert_eq!(fake.calls(), ["session.login_with_password"]);
}

#[tokio::test]
async fn api_faults_still_close_the_session() {
    let fake = FakeXapi {
        fail_sr_listing: true,
        ..FakeXapi::default()
    };
    let address = spawn(fake.clone()).await;

    let err = client()
        .storage_repositories(&target(address, "secret"))
        .await
        .expect_err("listing fails");

    assert_eq!(
        err,
        InventoryError::Rpc {
            method: String::from("SR.get_all_records"),
            message: String::from("PERMISSION_DENIED (SR.get_all_records)"),
        }
    );
    assert_eq!(fake.calls().last().map(String::as_str), Some("session.logout"));
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap_or_else(|err| panic!("bind: {err}"));
    let address = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("local addr: {err}"));
    drop(listener);

    let err = client()
        .verify_login(&target(address, "secret"))
        .await
        .expect_err("nothing is listening");

    assert!(
        matches!(err, InventoryError::Transport { ref address, .. } if address.starts_with("127.0.0.1")),
        "{err:?}"
    );
}
