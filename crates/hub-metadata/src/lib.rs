//! Hub-Metadata: remote model metadata for modelpack
//!
//! This crate is the only part of modelpack that talks to the network.
//! It answers four read-only questions about a model repository:
//!
//! - which commit is the current revision
//! - which license the model declares
//! - whether downloads are access-restricted ("gated")
//! - what a given file in the repository contains
//!
//! Every answer is treated as untrusted and fallible. Callers decide what a
//! failure means; this crate only reports it.

pub mod cache;
pub mod client;
pub mod error;
pub mod fakes;
pub mod retry;

use async_trait::async_trait;

pub use cache::{CachedSource, LookupKey, LookupStats};
pub use client::{HubClient, HubConfig, DEFAULT_ENDPOINT};
pub use error::HubError;
pub use retry::RetryPolicy;

/// Result type for hub operations
pub type Result<T> = std::result::Result<T, HubError>;

/// Read-only view of a model hub.
///
/// `revision` of `None` means the default branch.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Resolve the commit the default branch currently points at.
    async fn resolve_revision(&self, model_id: &str) -> Result<String>;

    /// Declared license identifier, `Ok(None)` when the model declares none.
    async fn license(&self, model_id: &str, revision: Option<&str>) -> Result<Option<String>>;

    /// Whether the model's weights require authenticated, approved access.
    async fn gated(&self, model_id: &str, revision: Option<&str>) -> Result<bool>;

    /// Contents of a repository file, `Ok(None)` when the file does not exist.
    async fn fetch_file(
        &self,
        model_id: &str,
        revision: Option<&str>,
        filename: &str,
    ) -> Result<Option<String>>;
}

/// A source that is never reachable.
///
/// Used for offline runs: every lookup fails, so the caller's conservative
/// defaults apply to every model.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineSource;

#[async_trait]
impl MetadataSource for OfflineSource {
    async fn resolve_revision(&self, _model_id: &str) -> Result<String> {
        Err(HubError::Offline)
    }

    async fn license(&self, _model_id: &str, _revision: Option<&str>) -> Result<Option<String>> {
        Err(HubError::Offline)
    }

    async fn gated(&self, _model_id: &str, _revision: Option<&str>) -> Result<bool> {
        Err(HubError::Offline)
    }

    async fn fetch_file(
        &self,
        _model_id: &str,
        _revision: Option<&str>,
        _filename: &str,
    ) -> Result<Option<String>> {
        Err(HubError::Offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_source_fails_every_lookup() {
        let source = OfflineSource;
        assert_eq!(
            source.resolve_revision("org/m1").await,
            Err(HubError::Offline)
        );
        assert_eq!(source.license("org/m1", None).await, Err(HubError::Offline));
        assert_eq!(source.gated("org/m1", None).await, Err(HubError::Offline));
        assert_eq!(
            source.fetch_file("org/m1", None, "LICENSE").await,
            Err(HubError::Offline)
        );
    }
}
