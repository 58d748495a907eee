//! Manifest lifecycle orchestration.
//!
//! [`ManifestManager`] is the single authority for manifest transitions:
//! `Loaded → Diffed → Compressed → Committed → Dispatched → GC'd`. Every step
//! before commit is pure against current state and retryable from scratch;
//! after commit, GC failures are tolerated and retried on the next cycle.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use sentinel_store::{BulkOperation, DocumentStore, StoreError};

use crate::error::ArtifactError;
use crate::manifest::{InternalArtifact, Manifest, ManifestSpec, SchemaVersion};

pub const MANIFEST_INDEX: &str = "manifests";
pub const MANIFEST_DOC_ID: &str = "manifest-latest";
pub const ARTIFACT_INDEX: &str = "artifacts";

/// Produces the full artifact set for the current source state
/// (e.g. the exception/allow lists as they stand right now).
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn build_artifacts(&self) -> Result<Vec<InternalArtifact>, ArtifactError>;
}

/// A downstream consumer of committed manifests (agent policy config etc.).
#[async_trait]
pub trait ManifestDispatcher: Send + Sync {
    fn name(&self) -> &str;
    async fn dispatch(&self, spec: &ManifestSpec) -> Result<(), ArtifactError>;
}

pub struct ManifestManager {
    store: Arc<dyn DocumentStore>,
    source: Arc<dyn ArtifactSource>,
    dispatchers: Vec<Arc<dyn ManifestDispatcher>>,
    schema_version: SchemaVersion,
}

impl ManifestManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        source: Arc<dyn ArtifactSource>,
        dispatchers: Vec<Arc<dyn ManifestDispatcher>>,
    ) -> Self {
        Self {
            store,
            source,
            dispatchers,
            schema_version: SchemaVersion::V1,
        }
    }

    /// Load the last-committed manifest, rehydrating entries from the
    /// durable artifact store. `Ok(None)` means nothing committed yet.
    pub async fn last_computed_manifest(&self) -> Result<Option<Manifest>, ArtifactError> {
        let saved = match self.store.get(MANIFEST_INDEX, MANIFEST_DOC_ID).await {
            Ok(doc) => doc,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let saved_object: crate::manifest::ManifestSavedObject =
            serde_json::from_value(saved.source)?;

        let mut artifacts = Vec::with_capacity(saved_object.ids.len());
        for id in &saved_object.ids {
            let doc = self.store.get(ARTIFACT_INDEX, id).await?;
            artifacts.push(serde_json::from_value(doc.source)?);
        }

        Manifest::from_saved_object(&saved_object, artifacts, self.schema_version, None).map(Some)
    }

    /// Build the candidate next manifest from current source state without
    /// committing anything. Returns `None` when no baseline exists and
    /// `initialize` is false.
    pub async fn refresh(&self, initialize: bool) -> Result<Option<Manifest>, ArtifactError> {
        let old = match self.last_computed_manifest().await? {
            Some(m) => m,
            None if initialize => Manifest::default_manifest(self.schema_version),
            None => {
                debug!("manifest not available yet");
                return Ok(None);
            }
        };

        let artifacts = self.source.build_artifacts().await?;
        let new = Manifest::from_artifacts(artifacts, &old, self.schema_version)?;
        Ok(Some(new))
    }

    /// Compress every newly-added entry in place.
    pub fn compress_new_entries(&self, manifest: &mut Manifest) -> Result<(), ArtifactError> {
        for id in manifest.added_ids() {
            manifest.compress_entry(&id)?;
        }
        Ok(())
    }

    /// Persist newly-added artifacts to durable storage. Duplicate ids are
    /// fine (a previous cycle already wrote them); other per-document
    /// failures are collected, not thrown.
    pub async fn push_artifacts(&self, manifest: &Manifest) -> Vec<ArtifactError> {
        let mut errors = Vec::new();
        let mut ops = Vec::new();

        for id in manifest.added_ids() {
            match manifest.artifact(&id) {
                Some(artifact) => match serde_json::to_value(artifact) {
                    Ok(document) => ops.push(BulkOperation {
                        index: ARTIFACT_INDEX.to_string(),
                        id: Some(id),
                        document,
                    }),
                    Err(e) => errors.push(ArtifactError::Serialize(e.to_string())),
                },
                None => errors.push(ArtifactError::NotFound(id)),
            }
        }

        if ops.is_empty() {
            return errors;
        }

        match self.store.bulk_index(ops).await {
            Ok(response) => {
                for item in response.items {
                    match item.status {
                        201 => {}
                        409 => debug!(id = %item.id, "artifact already persisted"),
                        status => errors.push(ArtifactError::Store(StoreError::Other(format!(
                            "persist {} failed with status {}: {}",
                            item.id,
                            status,
                            item.error.unwrap_or_default()
                        )))),
                    }
                }
            }
            Err(e) => errors.push(e.into()),
        }

        errors
    }

    /// Commit the manifest's saved object. Idempotent: committing an
    /// unchanged state is a no-op.
    pub async fn commit(&self, manifest: &Manifest) -> Result<(), ArtifactError> {
        let saved_object = manifest.to_saved_object();
        let document = serde_json::to_value(&saved_object)?;

        match self.store.get(MANIFEST_INDEX, MANIFEST_DOC_ID).await {
            Ok(existing) => {
                let current: crate::manifest::ManifestSavedObject =
                    serde_json::from_value(existing.source)?;
                if current.ids == saved_object.ids
                    && current.semantic_version == saved_object.semantic_version
                {
                    debug!("manifest unchanged, commit is a no-op");
                    return Ok(());
                }
                self.store
                    .update(MANIFEST_INDEX, MANIFEST_DOC_ID, document)
                    .await?;
            }
            Err(StoreError::NotFound(_)) => {
                self.store
                    .bulk_index(vec![BulkOperation {
                        index: MANIFEST_INDEX.to_string(),
                        id: Some(MANIFEST_DOC_ID.to_string()),
                        document,
                    }])
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        info!(version = %manifest.semantic_version(), "committed manifest");
        Ok(())
    }

    /// Push the manifest to every downstream consumer, collecting per-consumer
    /// errors so partial delivery failure never aborts the whole dispatch.
    pub async fn try_dispatch(&self, manifest: &Manifest) -> Vec<ArtifactError> {
        let spec = match manifest.to_endpoint_format() {
            Ok(spec) => spec,
            Err(e) => return vec![e],
        };

        let mut errors = Vec::new();
        for dispatcher in &self.dispatchers {
            if let Err(e) = dispatcher.dispatch(&spec).await {
                errors.push(ArtifactError::Dispatch {
                    consumer: dispatcher.name().to_string(),
                    message: e.to_string(),
                });
            }
        }
        errors
    }

    /// Delete superseded artifacts from durable storage. Failures are logged
    /// and returned; the next cycle retries.
    pub async fn delete_artifacts(&self, ids: &[String]) -> Vec<ArtifactError> {
        let mut errors = Vec::new();
        for id in ids {
            match self.store.delete(ARTIFACT_INDEX, id).await {
                Ok(()) => info!(id = %id, "cleaned up superseded artifact"),
                Err(StoreError::NotFound(_)) => {
                    debug!(id = %id, "superseded artifact already gone")
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to clean up artifact");
                    errors.push(e.into());
                }
            }
        }
        errors
    }

    /// Run one full packaging cycle:
    /// refresh → compress new entries → persist artifacts → commit →
    /// dispatch → GC superseded entries.
    ///
    /// Returns the committed semantic version, or `None` when there was
    /// nothing to package.
    pub async fn package(&self, initialize: bool) -> Result<Option<String>, ArtifactError> {
        let mut manifest = match self.refresh(initialize).await? {
            Some(m) => m,
            None => return Ok(None),
        };

        self.compress_new_entries(&mut manifest)?;

        let persist_errors = self.push_artifacts(&manifest).await;
        if !persist_errors.is_empty() {
            report_errors(&persist_errors);
            return Err(ArtifactError::Store(StoreError::Other(
                "unable to persist new artifacts".to_string(),
            )));
        }

        if !manifest.diffs().is_empty() {
            self.commit(&manifest).await?;
        }

        // Partial dispatch failure does not block GC: dispatch is idempotent
        // against the committed manifest and retried next cycle.
        let dispatch_errors = self.try_dispatch(&manifest).await;
        if !dispatch_errors.is_empty() {
            report_errors(&dispatch_errors);
        }

        let delete_errors = self.delete_artifacts(&manifest.deleted_ids()).await;
        if !delete_errors.is_empty() {
            report_errors(&delete_errors);
        }

        Ok(Some(manifest.semantic_version().to_string()))
    }
}

fn report_errors(errors: &[ArtifactError]) {
    for error in errors {
        warn!(error = %error, "manifest packaging error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use sentinel_store::MemoryStore;

    struct StubSource {
        artifacts: Mutex<Vec<InternalArtifact>>,
    }

    impl StubSource {
        fn new(artifacts: Vec<InternalArtifact>) -> Self {
            Self {
                artifacts: Mutex::new(artifacts),
            }
        }

        fn replace(&self, artifacts: Vec<InternalArtifact>) {
            *self.artifacts.lock().unwrap() = artifacts;
        }
    }

    #[async_trait]
    impl ArtifactSource for StubSource {
        async fn build_artifacts(&self) -> Result<Vec<InternalArtifact>, ArtifactError> {
            Ok(self.artifacts.lock().unwrap().clone())
        }
    }

    struct RecordingDispatcher {
        versions: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingDispatcher {
        fn new(fail: bool) -> Self {
            Self {
                versions: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl ManifestDispatcher for RecordingDispatcher {
        fn name(&self) -> &str {
            "recording"
        }

        async fn dispatch(&self, spec: &ManifestSpec) -> Result<(), ArtifactError> {
            if self.fail {
                return Err(ArtifactError::Validation("consumer down".to_string()));
            }
            self.versions
                .lock()
                .unwrap()
                .push(spec.manifest_version.clone());
            Ok(())
        }
    }

    fn artifact(identifier: &str, body: &[u8]) -> InternalArtifact {
        InternalArtifact::from_decoded(identifier, body.to_vec())
    }

    fn manager(
        store: Arc<MemoryStore>,
        source: Arc<StubSource>,
        dispatcher: Arc<RecordingDispatcher>,
    ) -> ManifestManager {
        ManifestManager::new(store, source, vec![dispatcher])
    }

    #[tokio::test]
    async fn refresh_without_baseline_returns_none() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(StubSource::new(vec![artifact("list", b"v1")]));
        let m = manager(store, source, Arc::new(RecordingDispatcher::new(false)));
        assert!(m.refresh(false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn first_package_commits_and_dispatches() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(StubSource::new(vec![artifact("list", b"v1")]));
        let dispatcher = Arc::new(RecordingDispatcher::new(false));
        let m = manager(store.clone(), source, dispatcher.clone());

        let version = m.package(true).await.unwrap().unwrap();
        assert_eq!(version, "1.0.1");
        assert_eq!(dispatcher.versions.lock().unwrap().as_slice(), ["1.0.1"]);

        // Committed state is durable and loadable.
        let loaded = m.last_computed_manifest().await.unwrap().unwrap();
        assert_eq!(loaded.semantic_version(), "1.0.1");
        // Entries were compressed before persisting.
        let id = loaded.entry_ids().next().unwrap().clone();
        assert!(loaded.artifact(&id).unwrap().is_compressed());
    }

    #[tokio::test]
    async fn repeat_package_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(StubSource::new(vec![artifact("list", b"v1")]));
        let dispatcher = Arc::new(RecordingDispatcher::new(false));
        let m = manager(store, source, dispatcher);

        let v1 = m.package(true).await.unwrap().unwrap();
        let v2 = m.package(false).await.unwrap().unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn superseded_artifacts_are_garbage_collected() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(StubSource::new(vec![artifact("list", b"v1")]));
        let dispatcher = Arc::new(RecordingDispatcher::new(false));
        let m = manager(store.clone(), source.clone(), dispatcher);

        m.package(true).await.unwrap();
        let old_id = artifact("list", b"v1").artifact_id();
        assert!(store.get(ARTIFACT_INDEX, &old_id).await.is_ok());

        source.replace(vec![artifact("list", b"v2")]);
        let version = m.package(false).await.unwrap().unwrap();
        assert_eq!(version, "1.0.2");

        // Old blob deleted, new blob present.
        assert!(store.get(ARTIFACT_INDEX, &old_id).await.is_err());
        let new_id = artifact("list", b"v2").artifact_id();
        assert!(store.get(ARTIFACT_INDEX, &new_id).await.is_ok());
    }

    #[tokio::test]
    async fn dispatch_failure_does_not_block_commit_or_gc() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(StubSource::new(vec![artifact("list", b"v1")]));
        let dispatcher = Arc::new(RecordingDispatcher::new(true));
        let m = manager(store.clone(), source.clone(), dispatcher);

        m.package(true).await.unwrap();
        source.replace(vec![artifact("list", b"v2")]);
        m.package(false).await.unwrap();

        let old_id = artifact("list", b"v1").artifact_id();
        assert!(store.get(ARTIFACT_INDEX, &old_id).await.is_err());
        let loaded = m.last_computed_manifest().await.unwrap().unwrap();
        assert_eq!(loaded.semantic_version(), "1.0.2");
    }
}
