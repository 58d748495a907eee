//! Opaque document-store contract.
//!
//! The detection engine and the artifact subsystem treat the underlying
//! search/storage engine as an external collaborator exposing exactly the
//! operations they need: cursor-capable search, bulk index with per-document
//! status, and get/update/delete by id. This crate defines that contract
//! ([`DocumentStore`]), the typed query model it accepts, and an in-memory
//! reference implementation used by local mode and tests.

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use client::DocumentStore;
pub use error::StoreError;
pub use memory::{field_value, MemoryStore};
pub use types::*;
