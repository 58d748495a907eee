//! Artifact download endpoint.
//!
//! Serves compressed artifact bodies by identifier and content hash, fronted
//! by the bounded in-memory cache. Cached values are the serialized artifact
//! document so a hit can still answer with the right encoding headers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use tracing::{debug, error, warn};

use sentinel_artifacts::cache::cache_key;
use sentinel_artifacts::manager::ARTIFACT_INDEX;
use sentinel_artifacts::InternalArtifact;

use crate::state::AppState;

fn artifact_response(artifact: &InternalArtifact) -> impl IntoResponse {
    let headers = [
        (
            header::CONTENT_TYPE.as_str(),
            "application/octet-stream".to_string(),
        ),
        (
            header::CONTENT_ENCODING.as_str(),
            artifact.compression_algorithm.as_str().to_string(),
        ),
        (
            header::CONTENT_DISPOSITION.as_str(),
            format!("attachment; filename=\"{}.zz\"", artifact.identifier),
        ),
    ];
    (headers, artifact.body.clone())
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    Path((identifier, sha256)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let Some(caller) = state.identity.resolve(&headers) else {
        return Err((
            StatusCode::UNAUTHORIZED,
            "caller identity could not be resolved".to_string(),
        ));
    };

    let key = cache_key(&identifier, &sha256);
    if let Some(cached) = state.artifact_cache.get(&key) {
        let artifact: InternalArtifact = serde_json::from_slice(&cached).map_err(|e| {
            error!(key = %key, error = %e, "cached artifact is malformed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "artifact cache corrupted".to_string(),
            )
        })?;
        debug!(%caller, %identifier, "artifact served from cache");
        return Ok(artifact_response(&artifact));
    }

    let doc_id = format!("{identifier}-{sha256}");
    let got = state
        .store
        .get(ARTIFACT_INDEX, &doc_id)
        .await
        .map_err(|e| match e {
            sentinel_store::StoreError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                format!("no artifact for {identifier}/{sha256}"),
            ),
            other => {
                error!(%doc_id, error = %other, "artifact fetch failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "artifact fetch failed".to_string(),
                )
            }
        })?;

    let artifact: InternalArtifact = serde_json::from_value(got.source).map_err(|e| {
        error!(%doc_id, error = %e, "stored artifact is malformed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "stored artifact is malformed".to_string(),
        )
    })?;
    if artifact.decoded_sha256 != sha256 {
        warn!(%doc_id, "stored artifact hash does not match its id");
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "artifact hash mismatch".to_string(),
        ));
    }

    if let Ok(serialized) = serde_json::to_vec(&artifact) {
        state.artifact_cache.set(key, serialized);
    }
    debug!(%caller, %identifier, "artifact served from store");
    Ok(artifact_response(&artifact))
}
