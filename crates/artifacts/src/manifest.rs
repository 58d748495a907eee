//! Versioned artifact manifest.
//!
//! A [`Manifest`] maps artifact identifiers to compressed binary entries and
//! carries a semantic version that is bumped exactly when the entry set
//! changes relative to the manifest it was derived from. Diffs are derived
//! values recomputed from the two entry key sets, never persisted.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::compression::{compress_zlib, sha256_hex};
use crate::error::ArtifactError;

pub const DEFAULT_SEMANTIC_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaVersion {
    #[serde(rename = "v1")]
    V1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    Zlib,
}

impl CompressionAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Zlib => "zlib",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionAlgorithm {
    None,
}

/// An immutable binary artifact plus its content hashes.
///
/// `body` holds the encoded form; while `compression_algorithm` is `none`,
/// encoded and decoded are the same bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalArtifact {
    pub identifier: String,
    pub decoded_sha256: String,
    pub decoded_size: usize,
    pub encoded_sha256: String,
    pub encoded_size: usize,
    pub compression_algorithm: CompressionAlgorithm,
    pub encryption_algorithm: EncryptionAlgorithm,
    #[serde(with = "b64_body")]
    pub body: Vec<u8>,
}

/// Serialize artifact bodies as base64 so they survive JSON document storage.
mod b64_body {
    use super::{Engine, BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s).map_err(serde::de::Error::custom)
    }
}

impl InternalArtifact {
    /// Build an uncompressed artifact from a decoded body.
    pub fn from_decoded(identifier: impl Into<String>, body: Vec<u8>) -> Self {
        let sha = sha256_hex(&body);
        let size = body.len();
        Self {
            identifier: identifier.into(),
            decoded_sha256: sha.clone(),
            decoded_size: size,
            encoded_sha256: sha,
            encoded_size: size,
            compression_algorithm: CompressionAlgorithm::None,
            encryption_algorithm: EncryptionAlgorithm::None,
            body,
        }
    }

    /// Stable content-derived id: `{identifier}-{decoded_sha256}`.
    pub fn artifact_id(&self) -> String {
        format!("{}-{}", self.identifier, self.decoded_sha256)
    }

    pub fn is_compressed(&self) -> bool {
        self.compression_algorithm == CompressionAlgorithm::Zlib
    }

    /// Return a zlib-compressed copy. Compressing an already-compressed
    /// artifact returns it unchanged.
    pub fn compressed(&self) -> Result<Self, ArtifactError> {
        if self.is_compressed() {
            return Ok(self.clone());
        }
        let encoded = compress_zlib(&self.body)
            .map_err(|e| ArtifactError::Compression(self.artifact_id(), e.to_string()))?;
        Ok(Self {
            identifier: self.identifier.clone(),
            decoded_sha256: self.decoded_sha256.clone(),
            decoded_size: self.decoded_size,
            encoded_sha256: sha256_hex(&encoded),
            encoded_size: encoded.len(),
            compression_algorithm: CompressionAlgorithm::Zlib,
            encryption_algorithm: EncryptionAlgorithm::None,
            body: encoded,
        })
    }
}

/// One manifest entry; owned exclusively by its manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub artifact: InternalArtifact,
}

impl ManifestEntry {
    pub fn new(artifact: InternalArtifact) -> Self {
        Self { artifact }
    }

    pub fn doc_id(&self) -> String {
        self.artifact.artifact_id()
    }

    pub fn relative_url(&self) -> String {
        format!(
            "/api/artifacts/download/{}/{}",
            self.artifact.identifier, self.artifact.decoded_sha256
        )
    }

    fn record(&self) -> ManifestEntryRecord {
        ManifestEntryRecord {
            relative_url: self.relative_url(),
            decoded_sha256: self.artifact.decoded_sha256.clone(),
            decoded_size: self.artifact.decoded_size,
            encoded_sha256: self.artifact.encoded_sha256.clone(),
            encoded_size: self.artifact.encoded_size,
            encryption_algorithm: self.artifact.encryption_algorithm,
            compression_algorithm: self.artifact.compression_algorithm,
        }
    }
}

/// Wire-format entry served to remote agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntryRecord {
    pub relative_url: String,
    pub decoded_sha256: String,
    pub decoded_size: usize,
    pub encoded_sha256: String,
    pub encoded_size: usize,
    pub encryption_algorithm: EncryptionAlgorithm,
    pub compression_algorithm: CompressionAlgorithm,
}

/// Wire-format manifest, grouped by identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSpec {
    pub manifest_version: String,
    pub schema_version: SchemaVersion,
    pub artifacts: BTreeMap<String, ManifestEntryRecord>,
}

impl ManifestSpec {
    /// Structural validation before the wire format leaves the process.
    fn validate(&self) -> Result<(), ArtifactError> {
        Version::parse(&self.manifest_version)
            .map_err(|e| ArtifactError::Validation(format!("manifest_version: {e}")))?;
        for (identifier, record) in &self.artifacts {
            for (label, sha) in [
                ("decoded_sha256", &record.decoded_sha256),
                ("encoded_sha256", &record.encoded_sha256),
            ] {
                if sha.len() != 64 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ArtifactError::Validation(format!(
                        "{identifier}: {label} is not a sha256 hex digest"
                    )));
                }
            }
            if !record.relative_url.starts_with("/api/artifacts/download/") {
                return Err(ArtifactError::Validation(format!(
                    "{identifier}: bad relative_url {}",
                    record.relative_url
                )));
            }
        }
        Ok(())
    }
}

/// Minimal persistence form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSavedObject {
    pub ids: Vec<String>,
    pub semantic_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    Add,
    Delete,
}

/// Derived value describing one entry-set difference between two manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDiff {
    #[serde(rename = "type")]
    pub diff_type: DiffType,
    pub id: String,
}

/// Bump the patch component. Returns `InvalidVersion` on malformed input.
pub fn bump_semantic_version(version: &str) -> Result<String, ArtifactError> {
    let mut parsed =
        Version::parse(version).map_err(|_| ArtifactError::InvalidVersion(version.to_string()))?;
    parsed.patch += 1;
    Ok(parsed.to_string())
}

/// Versioned mapping of artifact ids to entries.
#[derive(Debug, Clone)]
pub struct Manifest {
    schema_version: SchemaVersion,
    semantic_version: String,
    /// Opaque storage revision token of the persisted saved object.
    so_version: Option<String>,
    entries: BTreeMap<String, ManifestEntry>,
    /// Diffs against the manifest this one was derived from.
    diffs: Vec<ManifestDiff>,
}

impl Manifest {
    /// The default manifest used when none has been committed yet.
    pub fn default_manifest(schema_version: SchemaVersion) -> Self {
        Self {
            schema_version,
            semantic_version: DEFAULT_SEMANTIC_VERSION.to_string(),
            so_version: None,
            entries: BTreeMap::new(),
            diffs: Vec::new(),
        }
    }

    /// Reconstruct a manifest from its saved object plus the artifact records
    /// it references.
    pub fn from_saved_object(
        saved: &ManifestSavedObject,
        artifacts: Vec<InternalArtifact>,
        schema_version: SchemaVersion,
        so_version: Option<String>,
    ) -> Result<Self, ArtifactError> {
        Version::parse(&saved.semantic_version)
            .map_err(|_| ArtifactError::InvalidVersion(saved.semantic_version.clone()))?;
        let mut entries = BTreeMap::new();
        for artifact in artifacts {
            let entry = ManifestEntry::new(artifact);
            entries.insert(entry.doc_id(), entry);
        }
        for id in &saved.ids {
            if !entries.contains_key(id) {
                return Err(ArtifactError::NotFound(id.clone()));
            }
        }
        Ok(Self {
            schema_version,
            semantic_version: saved.semantic_version.clone(),
            so_version,
            entries,
            diffs: Vec::new(),
        })
    }

    /// Build a new manifest from the current artifact set, reusing entries
    /// (and their finished compression) from `old` where the content id is
    /// unchanged. Bumps the semantic version exactly when the entry set
    /// differs from `old`.
    pub fn from_artifacts(
        artifacts: Vec<InternalArtifact>,
        old: &Manifest,
        schema_version: SchemaVersion,
    ) -> Result<Self, ArtifactError> {
        Version::parse(&old.semantic_version)
            .map_err(|_| ArtifactError::InvalidVersion(old.semantic_version.clone()))?;

        let mut entries = BTreeMap::new();
        for artifact in artifacts {
            let id = artifact.artifact_id();
            let entry = match old.entries.get(&id) {
                // Reuse the already-compressed entry.
                Some(existing) => existing.clone(),
                None => ManifestEntry::new(artifact),
            };
            entries.insert(id, entry);
        }

        let mut manifest = Self {
            schema_version,
            semantic_version: old.semantic_version.clone(),
            so_version: old.so_version.clone(),
            entries,
            diffs: Vec::new(),
        };
        manifest.diffs = manifest.diff(old);
        if !manifest.diffs.is_empty() {
            manifest.semantic_version = bump_semantic_version(&old.semantic_version)?;
        }
        Ok(manifest)
    }

    /// Symmetric set difference against `other`: ids only in `other` become
    /// deletes, ids only in `self` become adds.
    pub fn diff(&self, other: &Manifest) -> Vec<ManifestDiff> {
        let mut diffs = Vec::new();
        for id in other.entries.keys() {
            if !self.contains(id) {
                diffs.push(ManifestDiff {
                    diff_type: DiffType::Delete,
                    id: id.clone(),
                });
            }
        }
        for id in self.entries.keys() {
            if !other.contains(id) {
                diffs.push(ManifestDiff {
                    diff_type: DiffType::Add,
                    id: id.clone(),
                });
            }
        }
        diffs
    }

    /// Compress the entry with the given id in place.
    ///
    /// A missing id is a corruption signal, not a recoverable condition.
    pub fn compress_entry(&mut self, id: &str) -> Result<(), ArtifactError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| ArtifactError::NotFound(format!("corrupted manifest: {id}")))?;
        let compressed = entry.artifact.compressed()?;
        if !compressed.is_compressed() {
            return Err(ArtifactError::Compression(
                id.to_string(),
                "compression did not yield a complete artifact".to_string(),
            ));
        }
        // The artifact id changes only with decoded content, so the key holds.
        self.entries.insert(id.to_string(), ManifestEntry::new(compressed));
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn entry(&self, id: &str) -> Option<&ManifestEntry> {
        self.entries.get(id)
    }

    pub fn artifact(&self, id: &str) -> Option<&InternalArtifact> {
        self.entries.get(id).map(|e| &e.artifact)
    }

    pub fn entry_ids(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn diffs(&self) -> &[ManifestDiff] {
        &self.diffs
    }

    /// Ids added relative to the manifest this one was derived from.
    pub fn added_ids(&self) -> Vec<String> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Add)
            .map(|d| d.id.clone())
            .collect()
    }

    /// Ids superseded by this manifest, eligible for GC after commit.
    pub fn deleted_ids(&self) -> Vec<String> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Delete)
            .map(|d| d.id.clone())
            .collect()
    }

    pub fn schema_version(&self) -> SchemaVersion {
        self.schema_version
    }

    pub fn semantic_version(&self) -> &str {
        &self.semantic_version
    }

    pub fn so_version(&self) -> Option<&str> {
        self.so_version.as_deref()
    }

    /// Serialize to the validated wire schema, grouped by identifier.
    pub fn to_endpoint_format(&self) -> Result<ManifestSpec, ArtifactError> {
        let spec = ManifestSpec {
            manifest_version: self.semantic_version.clone(),
            schema_version: self.schema_version,
            artifacts: self
                .entries
                .values()
                .map(|e| (e.artifact.identifier.clone(), e.record()))
                .collect(),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Minimal persistence form: entry ids plus the semantic version.
    pub fn to_saved_object(&self) -> ManifestSavedObject {
        ManifestSavedObject {
            ids: self.entries.keys().cloned().collect(),
            semantic_version: self.semantic_version.clone(),
        }
    }
}
