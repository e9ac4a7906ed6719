//! In-memory fakes for [`MetadataSource`] (testing only)
//!
//! `StaticSource` answers from tables filled in by the test, can be told to
//! fail or hang for a specific model and lookup kind, and counts every call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HubError;
use crate::{MetadataSource, Result};

/// Which trait method a failure or counter refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    Revision,
    License,
    Gated,
    File,
}

#[derive(Debug, Clone)]
enum Fault {
    Fail(HubError),
    Hang,
}

#[derive(Debug, Default)]
struct Counters {
    revision: AtomicU64,
    license: AtomicU64,
    gated: AtomicU64,
    file: AtomicU64,
}

impl Counters {
    fn counter(&self, lookup: Lookup) -> &AtomicU64 {
        match lookup {
            Lookup::Revision => &self.revision,
            Lookup::License => &self.license,
            Lookup::Gated => &self.gated,
            Lookup::File => &self.file,
        }
    }
}

/// Scriptable metadata source.
///
/// Models not registered for a lookup answer with a 404 status, except
/// `fetch_file` which answers `Ok(None)` for unknown files.
#[derive(Debug, Default, Clone)]
pub struct StaticSource {
    revisions: HashMap<String, String>,
    licenses: HashMap<String, Option<String>>,
    gating: HashMap<String, bool>,
    files: HashMap<(String, String), String>,
    faults: HashMap<(String, Lookup), Fault>,
    counters: Arc<Counters>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register everything needed for a model to resolve cleanly.
    pub fn with_model(
        self,
        model_id: &str,
        sha: &str,
        license: Option<&str>,
        gated: bool,
    ) -> Self {
        self.with_revision(model_id, sha)
            .with_license(model_id, license)
            .with_gated(model_id, gated)
    }

    pub fn with_revision(mut self, model_id: &str, sha: &str) -> Self {
        self.revisions.insert(model_id.to_string(), sha.to_string());
        self
    }

    pub fn with_license(mut self, model_id: &str, license: Option<&str>) -> Self {
        self.licenses
            .insert(model_id.to_string(), license.map(str::to_string));
        self
    }

    pub fn with_gated(mut self, model_id: &str, gated: bool) -> Self {
        self.gating.insert(model_id.to_string(), gated);
        self
    }

    pub fn with_file(mut self, model_id: &str, filename: &str, content: &str) -> Self {
        self.files.insert(
            (model_id.to_string(), filename.to_string()),
            content.to_string(),
        );
        self
    }

    /// Make every `lookup` for `model_id` fail with `error`.
    pub fn failing(mut self, model_id: &str, lookup: Lookup, error: HubError) -> Self {
        self.faults
            .insert((model_id.to_string(), lookup), Fault::Fail(error));
        self
    }

    /// Make every `lookup` for `model_id` never complete.
    pub fn hanging(mut self, model_id: &str, lookup: Lookup) -> Self {
        self.faults.insert((model_id.to_string(), lookup), Fault::Hang);
        self
    }

    /// Number of calls made for `lookup` across all models.
    pub fn calls(&self, lookup: Lookup) -> u64 {
        self.counters.counter(lookup).load(Ordering::SeqCst)
    }

    async fn enter(&self, model_id: &str, lookup: Lookup) -> Result<()> {
        self.counters.counter(lookup).fetch_add(1, Ordering::SeqCst);
        match self.faults.get(&(model_id.to_string(), lookup)) {
            Some(Fault::Fail(err)) => Err(err.clone()),
            Some(Fault::Hang) => std::future::pending().await,
            None => Ok(()),
        }
    }

    fn not_found(model_id: &str) -> HubError {
        HubError::Status {
            url: format!("fake://{}", model_id),
            status: 404,
        }
    }
}

#[async_trait]
impl MetadataSource for StaticSource {
    async fn resolve_revision(&self, model_id: &str) -> Result<String> {
        self.enter(model_id, Lookup::Revision).await?;
        self.revisions
            .get(model_id)
            .cloned()
            .ok_or_else(|| Self::not_found(model_id))
    }

    async fn license(&self, model_id: &str, _revision: Option<&str>) -> Result<Option<String>> {
        self.enter(model_id, Lookup::License).await?;
        self.licenses
            .get(model_id)
            .cloned()
            .ok_or_else(|| Self::not_found(model_id))
    }

    async fn gated(&self, model_id: &str, _revision: Option<&str>) -> Result<bool> {
        self.enter(model_id, Lookup::Gated).await?;
        self.gating
            .get(model_id)
            .copied()
            .ok_or_else(|| Self::not_found(model_id))
    }

    async fn fetch_file(
        &self,
        model_id: &str,
        _revision: Option<&str>,
        filename: &str,
    ) -> Result<Option<String>> {
        self.enter(model_id, Lookup::File).await?;
        Ok(self
            .files
            .get(&(model_id.to_string(), filename.to_string()))
            .cloned())
    }
}
