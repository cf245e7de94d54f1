//! Read-only access to a host's control plane.
//!
//! The inventory client backs host registration, connection tests, and the
//! storage and VM listings. The backup and restore workflows never use it.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::model::HostTarget;

mod types;
mod xapi;

pub use types::{StorageRepository, VirtualMachine};
pub use xapi::XapiClient;

/// Boxed future returned by [`InventoryClient`] methods.
pub type InventoryFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, InventoryError>> + Send + 'a>>;

/// Queries a host's control plane. Every call opens and closes its own
/// session.
pub trait InventoryClient: Send + Sync {
    /// Logs in and out again, proving the credentials work.
    fn verify_login<'a>(&'a self, target: &'a HostTarget) -> InventoryFuture<'a, ()>;

    /// Lists every storage repository the host can see.
    fn storage_repositories<'a>(
        &'a self,
        target: &'a HostTarget,
    ) -> InventoryFuture<'a, Vec<StorageRepository>>;

    /// Lists guest VMs, excluding templates and the control domain.
    fn virtual_machines<'a>(
        &'a self,
        target: &'a HostTarget,
    ) -> InventoryFuture<'a, Vec<VirtualMachine>>;
}

/// Errors raised while talking to the control plane.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InventoryError {
    /// The HTTP request failed or returned a non-success status.
    #[error("control plane at {address} is unreachable: {message}")]
    Transport {
        /// Host address.
        address: String,
        /// Transport error text.
        message: String,
    },
    /// The host rejected the credentials.
    #[error("control plane at {address} rejected the credentials")]
    Authentication {
        /// Host address.
        address: String,
    },
    /// The host answered with an API error.
    #[error("{method} failed: {message}")]
    Rpc {
        /// Remote method name.
        method: String,
        /// Error description from the host.
        message: String,
    },
    /// The response could not be decoded.
    #[error("could not decode {method} response: {message}")]
    Decode {
        /// Remote method name.
        method: String,
        /// Decoder error text.
        message: String,
    },
}
