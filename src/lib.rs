//! Core library for the vmvault backup service.
//!
//! The crate drives snapshot, export, and import command sequences on
//! XCP-ng hosts over SSH, records every attempt as a job in a SQLite ledger,
//! and exposes definitions, job history, and retention views over HTTP.

pub mod admission;
pub mod api;
pub mod config;
pub mod inventory;
pub mod model;
pub mod remote;
pub mod retention;
pub mod shutdown;
pub mod store;
pub mod test_support;
pub mod workflow;

pub use config::{ConfigError, ServiceConfig};
pub use model::{Job, JobOutcome, JobParent, JobStatus};
pub use store::{JobLedger, MemoryStore, Registry, SqliteStore, Store};
pub use workflow::{JobReport, Orchestrator, RestoreRequest, WorkflowError, WorkflowSettings};
