//! One resolution run: configuration in, matrix document out.
//!
//! A [`Pipeline`] owns the per-run lookup cache. It is built fresh for each
//! run and dropped with it, so nothing is remembered between runs.

use std::path::{Path, PathBuf};
use std::time::Instant;

use hub_metadata::{CachedSource, LookupStats, MetadataSource};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{LoadedConfig, PipelineConfig};
use crate::error::{HarvestError, PipelineError};
use crate::harvest::{self, HarvestReport, HarvestRequest, ImageContext};
use crate::matrix::{self, MatrixDocument, ResolvedJob};
use crate::obs;

/// Outcome of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub matrix: MatrixDocument,
    /// One report per harvested fat job, in job order
    pub harvests: Vec<HarvestReport>,
    pub duration_ms: u64,
}

/// Resolution run over a cached, retrying view of `S`.
pub struct Pipeline<S> {
    source: CachedSource<S>,
    config: PipelineConfig,
    digest: String,
    harvest_root: Option<PathBuf>,
}

impl<S: MetadataSource> Pipeline<S> {
    pub fn new(inner: S, loaded: LoadedConfig) -> Self {
        let policy = loaded.config.defaults.lookup.retry_policy();
        Self {
            source: CachedSource::new(inner, policy),
            config: loaded.config,
            digest: loaded.digest,
            harvest_root: None,
        }
    }

    /// Harvest license bundles for fat jobs into `<root>/<short>`.
    pub fn with_harvest_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.harvest_root = Some(root.into());
        self
    }

    pub fn stats(&self) -> &LookupStats {
        self.source.stats()
    }

    /// Resolve every entry and, if configured, harvest fat jobs.
    ///
    /// Configuration and filesystem errors abort the run. Lookup failures
    /// only add warnings.
    pub async fn run(&self) -> Result<RunResult, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::resolve_span(&run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: String) -> Result<RunResult, PipelineError> {
        let start = Instant::now();
        obs::emit_resolve_started(
            &self.digest,
            self.config.models.len(),
            self.config.defaults.lookup.concurrency,
        );

        let mut jobs = matrix::resolve(&self.source, &self.config).await?;

        let harvests = match &self.harvest_root {
            Some(root) => self.harvest_fat_jobs(&mut jobs, root).await?,
            None => Vec::new(),
        };

        let matrix = MatrixDocument::new(&self.digest, jobs);
        let duration_ms = start.elapsed().as_millis() as u64;
        let stats = self.source.stats();
        obs::emit_resolve_finished(
            matrix.jobs.len(),
            matrix.fat_jobs(),
            matrix.warning_count,
            stats.queries(),
            stats.cache_hits(),
            duration_ms,
        );
        stats.flush();

        Ok(RunResult {
            run_id,
            matrix,
            harvests,
            duration_ms,
        })
    }

    /// Harvest bundles sequentially; harvest warnings are appended to the
    /// job they belong to.
    async fn harvest_fat_jobs(
        &self,
        jobs: &mut [ResolvedJob],
        root: &Path,
    ) -> Result<Vec<HarvestReport>, HarvestError> {
        let mut reports = Vec::new();
        let defaults = &self.config.defaults;
        for job in jobs.iter_mut().filter(|j| j.build_fat) {
            let image = ImageContext::for_job(job, defaults);
            let request = HarvestRequest {
                model_id: &job.model_id,
                revision: job.revision.as_deref(),
                license_id: &job.license_id,
                whitelist: &defaults.permissive_whitelist,
                image: &image,
            };
            let report =
                harvest::harvest(&self.source, &request, &harvest::bundle_dir(root, &job.short))
                    .await?;
            job.warnings.extend(report.warnings.iter().cloned());
            reports.push(report);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config_digest;
    use hub_metadata::fakes::{Lookup, StaticSource};

    const CONFIG: &str = r#"
defaults:
  version: "0.4.0"
  registries: { primary: "ghcr.io/acme/inference", secondary: "docker.io/acme/inference" }
  lookup: { attempts: 1, backoff_ms: 1 }
models:
  - { id: "org/open", short: "open" }
  - { id: "org/closed", short: "closed" }
"#;

    fn loaded() -> LoadedConfig {
        LoadedConfig {
            config: PipelineConfig::from_yaml(CONFIG).unwrap(),
            digest: config_digest(CONFIG.as_bytes()),
        }
    }

    fn source() -> StaticSource {
        StaticSource::new()
            .with_model("org/open", "1111111111111111", Some("mit"), false)
            .with_model("org/closed", "2222222222222222", Some("llama3"), false)
    }

    #[tokio::test]
    async fn test_run_builds_document() {
        let result = Pipeline::new(source(), loaded()).run().await.unwrap();
        assert_eq!(result.matrix.config_digest, config_digest(CONFIG.as_bytes()));
        assert_eq!(result.matrix.jobs.len(), 2);
        assert_eq!(result.matrix.fat_jobs(), 1);
        assert!(result.harvests.is_empty());
    }

    #[tokio::test]
    async fn test_harvest_only_fat_jobs_and_share_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(source(), loaded()).with_harvest_root(dir.path());

        let result = pipeline.run().await.unwrap();
        assert_eq!(result.harvests.len(), 1);
        assert_eq!(result.harvests[0].model_id, "org/open");
        assert!(dir.path().join("open/model/LICENSE").exists());
        assert!(!dir.path().join("closed").exists());

        // revision, license and gating per model, plus upstream file lookups for one model
        assert_eq!(pipeline.source.inner().calls(Lookup::License), 2);
        assert_eq!(pipeline.source.inner().calls(Lookup::File), 6);
    }

    #[tokio::test]
    async fn test_runs_are_byte_identical() {
        let first = Pipeline::new(source(), loaded()).run().await.unwrap();
        let second = Pipeline::new(source(), loaded()).run().await.unwrap();
        assert_eq!(
            first.matrix.to_json().unwrap(),
            second.matrix.to_json().unwrap()
        );
        assert_ne!(first.run_id, second.run_id);
    }
}
