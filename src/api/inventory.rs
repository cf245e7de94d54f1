//! Live listings read from a host's control plane.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use serde::Deserialize;

use super::{ApiError, AppState, found};
use crate::inventory::{StorageRepository, VirtualMachine};
use crate::model::{Host, require_text};

#[derive(Debug, Deserialize)]
pub(super) struct StorageQuery {
    host_ip: String,
    #[serde(default)]
    nfs_only: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct HostQuery {
    host_ip: String,
}

async fn registered_host(state: &AppState, host_ip: &str) -> Result<Host, ApiError> {
    let address = require_text(host_ip, "host_ip")?;
    found(
        state.store.find_host_by_address(&address).await?,
        "host",
        &address,
    )
}

pub(super) async fn storage(
    State(state): State<AppState>,
    query: Result<Query<StorageQuery>, QueryRejection>,
) -> Result<Json<Vec<StorageRepository>>, ApiError> {
    let Query(query) = query?;
    let host = registered_host(&state, &query.host_ip).await?;
    let mut repositories = state
        .inventory
        .storage_repositories(&host.target())
        .await?;
    if query.nfs_only {
        repositories.retain(StorageRepository::is_nfs);
    }
    Ok(Json(repositories))
}

pub(super) async fn virtual_machines(
    State(state): State<AppState>,
    query: Result<Query<HostQuery>, QueryRejection>,
) -> Result<Json<Vec<VirtualMachine>>, ApiError> {
    let Query(query) = query?;
    let host = registered_host(&state, &query.host_ip).await?;
    Ok(Json(state.inventory.virtual_machines(&host.target()).await?))
}
