//! Structured observability hooks for resolution runs.
//!
//! - Run-scoped tracing spans via the `ResolveSpan` RAII guard
//! - Emission functions for the run lifecycle: start, per-job result,
//!   degraded lookups, harvests and finish
//!
//! Events are emitted at `info!` level, degraded lookups at `warn!`.

use tracing::{info, warn};
use uuid::Uuid;

use crate::harvest::ModelLicenseOrigin;

/// RAII guard that enters a run-scoped span for the duration of a resolution.
///
/// ```ignore
/// let span = ResolveSpan::enter();
/// // every event below is associated with run_id = span.run_id()
/// ```
pub struct ResolveSpan {
    run_id: String,
    _span: tracing::span::EnteredSpan,
}

impl ResolveSpan {
    /// Create and enter a span tagged with a fresh run id.
    pub fn enter() -> Self {
        Self::with_run_id(&Uuid::new_v4().to_string())
    }

    pub fn with_run_id(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            _span: resolve_span(run_id).entered(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

/// Run-scoped span for async code, to be attached with
/// [`tracing::Instrument`] instead of entered across awaits.
pub fn resolve_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("modelpack.resolve", run_id = %run_id)
}

/// Emit event: resolution started.
pub fn emit_resolve_started(config_digest: &str, models: usize, concurrency: usize) {
    info!(
        event = "resolve.started",
        config_digest = %config_digest,
        models = models,
        concurrency = concurrency,
    );
}

/// Emit event: one job resolved.
pub fn emit_job_resolved(short: &str, license_id: &str, build_fat: bool, tags: usize) {
    info!(
        event = "job.resolved",
        short = %short,
        license_id = %license_id,
        build_fat = build_fat,
        tags = tags,
    );
}

/// Emit event: a remote lookup degraded to a safe default (warning level).
pub fn emit_lookup_degraded(model_id: &str, lookup: &str, detail: &dyn std::fmt::Display) {
    warn!(event = "lookup.degraded", model_id = %model_id, lookup = %lookup, detail = %detail);
}

/// Emit event: a license bundle was written.
pub fn emit_harvest_completed(
    model_id: &str,
    license_id: &str,
    files: usize,
    model_license: ModelLicenseOrigin,
) {
    info!(
        event = "harvest.completed",
        model_id = %model_id,
        license_id = %license_id,
        files = files,
        model_license = ?model_license,
    );
}

/// Emit event: resolution finished.
pub fn emit_resolve_finished(
    jobs: usize,
    fat_jobs: usize,
    warnings: usize,
    lookups: u64,
    cache_hits: u64,
    duration_ms: u64,
) {
    info!(
        event = "resolve.finished",
        jobs = jobs,
        fat_jobs = fat_jobs,
        warnings = warnings,
        lookups = lookups,
        cache_hits = cache_hits,
        duration_ms = duration_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_resolve_span_gets_uuid_run_id() {
        let span = ResolveSpan::enter();
        assert!(Uuid::parse_str(span.run_id()).is_ok());
    }

    #[traced_test]
    #[test]
    fn test_events_carry_names() {
        let _span = ResolveSpan::with_run_id("run-obs-1");
        emit_resolve_started("digest", 2, 4);
        emit_job_resolved("m1", "mit", true, 4);
        emit_lookup_degraded("org/m1", "gated", &"timed out");
        emit_resolve_finished(2, 1, 1, 6, 2, 10);

        assert!(logs_contain("resolve.started"));
        assert!(logs_contain("job.resolved"));
        assert!(logs_contain("lookup.degraded"));
        assert!(logs_contain("run-obs-1"));
        assert!(logs_contain("resolve.finished"));
    }
}
