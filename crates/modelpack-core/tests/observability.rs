//! Observability tests for resolution run lifecycle tracing.
//!
//! These check that every lifecycle emitter and the run span can be driven
//! under a capturing subscriber, and that a full run emits without panicking.

use hub_metadata::fakes::StaticSource;
use modelpack_core::{
    config_digest, emit_harvest_completed, emit_job_resolved, emit_lookup_degraded,
    emit_resolve_finished, emit_resolve_started, LoadedConfig, ModelLicenseOrigin, Pipeline,
    PipelineConfig, ResolveSpan,
};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_resolve_started() {
    emit_resolve_started("0123abcd", 3, 4);
}

#[traced_test]
#[test]
fn test_emit_job_resolved() {
    emit_job_resolved("m1", "apache-2.0", true, 8);
}

#[traced_test]
#[test]
fn test_emit_lookup_degraded_logs_warning() {
    let detail = "gated timed out after 15000ms";
    emit_lookup_degraded("org/m1", "gated", &detail);
}

#[traced_test]
#[test]
fn test_emit_harvest_completed() {
    emit_harvest_completed("org/m1", "mit", 3, ModelLicenseOrigin::Vendored);
}

#[traced_test]
#[test]
fn test_emit_resolve_finished() {
    emit_resolve_finished(4, 1, 2, 10, 3, 120);
}

#[traced_test]
#[test]
fn test_resolve_span_enter() {
    let span = ResolveSpan::enter();
    assert!(!span.run_id().is_empty());
    drop(span);
}

#[traced_test]
#[tokio::test]
async fn test_pipeline_run_emits_lifecycle() {
    let yaml = r#"
defaults:
  version: "1.0.0"
  registries: { primary: "ghcr.io/acme/x", secondary: "docker.io/acme/x" }
models:
  - { id: "org/m1", short: "m1" }
"#;
    let loaded = LoadedConfig {
        config: PipelineConfig::from_yaml(yaml).unwrap(),
        digest: config_digest(yaml.as_bytes()),
    };
    let source = StaticSource::new().with_model("org/m1", "abc", Some("mit"), false);

    let result = Pipeline::new(source, loaded).run().await.unwrap();
    assert_eq!(result.matrix.jobs.len(), 1);
    assert!(!result.run_id.is_empty());
}
