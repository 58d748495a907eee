//! Artifact-manifest distribution subsystem.
//!
//! Versions, diffs, compresses, and serves binary artifact bundles to remote
//! agents:
//! - [`manifest`]: the versioned artifact → entry mapping with set-difference
//!   diffing and semantic-version bumping
//! - [`compression`]: zlib encoding and content hashing of artifact bodies
//! - [`manager`]: the single authority for manifest lifecycle transitions
//!   (refresh → commit → dispatch → GC)
//! - [`cache`]: bounded in-memory cache fronting the durable store on the
//!   download path

pub mod cache;
pub mod compression;
pub mod error;
pub mod manager;
pub mod manifest;

pub use cache::ArtifactCache;
pub use error::ArtifactError;
pub use manager::{ArtifactSource, ManifestDispatcher, ManifestManager};
pub use manifest::{
    CompressionAlgorithm, DiffType, InternalArtifact, Manifest, ManifestDiff, ManifestEntry,
    ManifestSavedObject, ManifestSpec, SchemaVersion,
};
