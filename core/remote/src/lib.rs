//! Remote data service abstraction for the offline-sync core.
//!
//! The backend is an external collaborator providing per-entity CRUD, a
//! device-registration endpoint, an append-only audit log for queued
//! operations, and cache diagnostics. The queue processor and the pull
//! synchronizer use the same interface.
//!
//! # Design Principles
//! - One seam: no HTTP details above the `RemoteService` trait
//! - Unified error semantics: transport failures map to `Error::Network`,
//!   backend validation/permission responses to `Error::Rejected`
//! - Substitutable backends: REST for production, memory for tests

pub mod memory;
pub mod rest;
pub mod service;

pub use memory::MemoryRemote;
pub use rest::RestRemote;
pub use service::{AuditEntry, AuditStatus, RemoteService};
