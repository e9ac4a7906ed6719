//! Modelpack Core Library
//!
//! Decides, per configured model, whether its weights may be embedded in a
//! container image, and turns the model list into a build matrix:
//!
//! - [`config`]: model list schema, loading and validation
//! - [`license`] / [`gating`]: the two conservative decision resolvers
//! - [`matrix`]: per-model job resolution and image tags
//! - [`harvest`]: license bundles for fat images
//! - [`pipeline`]: one cached, observable resolution run
//! - [`summary`]: markdown job summary and matrix file I/O

pub mod config;
pub mod error;
pub mod gating;
pub mod harvest;
pub mod license;
pub mod matrix;
pub mod obs;
pub mod pipeline;
pub mod summary;
pub mod telemetry;

pub use config::{
    config_digest, normalize_spdx, Defaults, EffectiveEntry, LoadedConfig, LookupSettings,
    ModelEntry, OciMetadata, OciOverrides, Override, PermissiveWhitelist, PipelineConfig,
    PublishTarget, Registries, DEFAULT_WHITELIST,
};
pub use error::{ConfigError, HarvestError, PipelineError, Result};
pub use gating::{resolve_gating, GatingDecision, GatingSource};
pub use harvest::{
    collect_bundle, harvest, write_bundle, BundleFile, FileOrigin, HarvestOutcome, HarvestReport,
    HarvestRequest, ImageContext, LicenseBundle, ManifestEntry, ModelLicenseOrigin,
};
pub use license::{classify, LicenseDecision, LicenseQuery, LicenseSource, UNKNOWN_LICENSE};
pub use matrix::{
    derive_tags, resolve, resolve_entry, sanitize_tag, ImageTag, MatrixDocument, ResolvedJob,
    RevisionSource, Variant, SCHEMA_VERSION,
};
pub use obs::{
    emit_harvest_completed, emit_job_resolved, emit_lookup_degraded, emit_resolve_finished,
    emit_resolve_started, resolve_span, ResolveSpan,
};
pub use pipeline::{Pipeline, RunResult};
pub use summary::{read_matrix_json, render_summary_md, write_matrix_json, write_summary_md};
pub use telemetry::init_tracing;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
