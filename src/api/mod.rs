//! HTTP surface of the service.
//!
//! Handlers validate and normalise payloads, delegate to the store, the
//! inventory client, or the orchestrator, and map every error to a JSON
//! body of the form `{"error": "..."}`.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::inventory::{InventoryClient, InventoryError};
use crate::model::ValidationError;
use crate::store::{LedgerError, Store, StoreError};
use crate::workflow::{Orchestrator, WorkflowError};

mod backups;
mod hosts;
mod inventory;
mod jobs;
mod orchestration;
mod restores;

pub use jobs::JobView;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn Store>,
    inventory: Arc<dyn InventoryClient>,
    orchestrator: Orchestrator,
}

impl AppState {
    /// Bundles the collaborators the handlers need.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        inventory: Arc<dyn InventoryClient>,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            store,
            inventory,
            orchestrator,
        }
    }
}

/// Builds the service router.
///
/// With no `allow_origin` every origin is accepted.
#[must_use]
pub fn router(state: AppState, allow_origin: Option<HeaderValue>) -> Router {
    let cors = allow_origin.map_or_else(CorsLayer::permissive, |origin| {
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any)
    });

    Router::new()
        .route("/health", get(health))
        .route("/api/hosts", post(hosts::create).get(hosts::list))
        .route("/api/hosts/test-connection", post(hosts::test_connection))
        .route(
            "/api/hosts/{id}",
            patch(hosts::update).delete(hosts::remove),
        )
        .route("/api/storage", get(inventory::storage))
        .route("/api/vms", get(inventory::virtual_machines))
        .route("/api/backups", post(backups::create).get(backups::list))
        .route(
            "/api/backups/{id}",
            get(backups::fetch)
                .patch(backups::update)
                .delete(backups::remove),
        )
        .route("/api/backups/{id}/jobs", get(backups::jobs))
        .route("/api/backups/{id}/retained", get(backups::retained))
        .route("/api/restores", post(restores::create).get(restores::list))
        .route(
            "/api/restores/{id}",
            get(restores::fetch)
                .patch(restores::update)
                .delete(restores::remove),
        )
        .route("/api/restores/{id}/jobs", get(restores::jobs))
        .route("/api/jobs/{job_uuid}", get(jobs::fetch))
        .route("/api/backup", post(orchestration::backup))
        .route("/api/restore", post(orchestration::restore))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Request failures and how they map onto HTTP.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed body, query, or path.
    #[error("{0}")]
    BadRequest(String),
    /// Referenced record is missing.
    #[error("{0}")]
    NotFound(String),
    /// Uniqueness or reference rule violated.
    #[error("{0}")]
    Conflict(String),
    /// The host control plane could not be reached or refused the login.
    #[error(transparent)]
    Upstream(#[from] InventoryError),
    /// Anything the caller cannot fix.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn internal(err: &impl std::error::Error) -> Self {
        error!(error = %err, "request failed");
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::Corrupt { .. } | StoreError::Database(_) | StoreError::Migration(_) => {
                Self::internal(&err)
            }
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Store(store) => store.into(),
            LedgerError::UnknownJob(_) => Self::NotFound(err.to_string()),
            LedgerError::Transition(_) => Self::internal(&err),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Validation(validation) => validation.into(),
            WorkflowError::NotFound { .. } => Self::NotFound(err.to_string()),
            WorkflowError::Store(store) => store.into(),
            WorkflowError::Ledger(_) | WorkflowError::Interrupted(_) => Self::internal(&err),
        }
    }
}

/// Looks up a record or reports it missing.
fn found<T>(record: Option<T>, entity: &str, id: impl std::fmt::Display) -> Result<T, ApiError> {
    record.ok_or_else(|| ApiError::NotFound(format!("{entity} {id} not found")))
}
