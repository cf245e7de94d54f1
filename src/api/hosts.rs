//! Host registration and connection tests.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

use super::{ApiError, AppState, found};
use crate::model::{Host, HostId, HostUpdate, NewHost, require_text};

/// Body of `POST /api/hosts/test-connection`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ConnectionTest {
    host_ip: String,
}

pub(super) async fn create(
    State(state): State<AppState>,
    payload: Result<Json<NewHost>, JsonRejection>,
) -> Result<(StatusCode, Json<Host>), ApiError> {
    let Json(payload) = payload?;
    let host = payload.normalise()?;
    state.inventory.verify_login(&host.target()).await?;
    let stored = state.store.insert_host(host).await?;
    info!(host_id = %stored.id, address = %stored.address, "host registered");
    Ok((StatusCode::CREATED, Json(stored)))
}

pub(super) async fn list(State(state): State<AppState>) -> Result<Json<Vec<Host>>, ApiError> {
    Ok(Json(state.store.list_hosts().await?))
}

pub(super) async fn update(
    State(state): State<AppState>,
    id: Result<Path<HostId>, PathRejection>,
    payload: Result<Json<HostUpdate>, JsonRejection>,
) -> Result<Json<Host>, ApiError> {
    let Path(id) = id?;
    let Json(update) = payload?;
    let current = found(state.store.get_host(id).await?, "host", id)?;
    let updated = update.apply(&current)?;
    Ok(Json(state.store.update_host(updated).await?))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    id: Result<Path<HostId>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    state.store.delete_host(id).await?;
    info!(host_id = %id, "host removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Logs in to the host's control plane and records whether it worked.
pub(super) async fn test_connection(
    State(state): State<AppState>,
    payload: Result<Json<ConnectionTest>, JsonRejection>,
) -> Result<Json<Host>, ApiError> {
    let Json(request) = payload?;
    let address = require_text(&request.host_ip, "host_ip")?;
    let mut host = found(
        state.store.find_host_by_address(&address).await?,
        "host",
        &address,
    )?;

    let verdict = state.inventory.verify_login(&host.target()).await;
    host.connected = verdict.is_ok();
    let stored = state.store.update_host(host).await?;
    match verdict {
        Ok(()) => Ok(Json(stored)),
        Err(err) => {
            warn!(address = %stored.address, error = %err, "connection test failed");
            Err(err.into())
        }
    }
}
