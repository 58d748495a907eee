//! Caller identity resolution for the artifact download path.

use axum::http::HeaderMap;

/// Resolves the calling agent from request headers. Downloads are refused
/// with 401 when no identity can be resolved.
pub trait CallerIdentity: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Option<String>;
}

/// Bearer-token identity: the configured token maps to a single trusted
/// caller. With no token configured every caller resolves as anonymous,
/// which keeps local mode usable without credentials.
pub struct ApiTokenIdentity {
    token: Option<String>,
}

impl ApiTokenIdentity {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl CallerIdentity for ApiTokenIdentity {
    fn resolve(&self, headers: &HeaderMap) -> Option<String> {
        let Some(expected) = &self.token else {
            return Some("anonymous".to_string());
        };
        let presented = headers
            .get("authorization")?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")?;
        if presented == expected {
            Some("api-token".to_string())
        } else {
            None
        }
    }
}
