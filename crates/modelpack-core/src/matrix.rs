//! Build-matrix resolution.
//!
//! Turns validated model entries into one [`ResolvedJob`] each. Entries are
//! resolved concurrently up to the configured limit, but no entry observes
//! another's result and output order always follows the configuration.

use std::collections::BTreeSet;
use std::path::PathBuf;

use futures::stream::{self, StreamExt};
use hub_metadata::MetadataSource;
use serde::{Deserialize, Serialize};

use crate::config::{Defaults, ModelEntry, OciMetadata, PipelineConfig, PublishTarget, Registries};
use crate::error::ConfigError;
use crate::gating::resolve_gating;
use crate::license::{classify, LicenseQuery, LicenseSource};
use crate::obs;

/// Version of the matrix document layout.
pub const SCHEMA_VERSION: &str = "1";

/// Characters of a revision used in `r<revision>` tags.
pub const REVISION_TAG_LEN: usize = 12;

const MAX_TAG_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Job types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Downloads weights at first start
    Slim,
    /// Weights embedded at build time
    Fat,
}

impl Variant {
    pub fn suffix(&self) -> &'static str {
        match self {
            Variant::Slim => "slim",
            Variant::Fat => "fat",
        }
    }
}

/// One image reference to push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTag {
    pub registry: PublishTarget,
    /// `<registry repository>/<short>`
    pub image: String,
    pub tag: String,
    pub variant: Variant,
}

impl ImageTag {
    /// Full `image:tag` reference.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionSource {
    /// Set in the configuration
    Pinned,
    /// Looked up from the default branch
    Resolved,
    /// Lookup failed; no revision tags
    Unresolved,
}

/// Build job descriptor for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedJob {
    pub model_id: String,
    pub short: String,
    /// Leading part of the version tags
    pub version: String,
    pub revision: Option<String>,
    pub revision_source: RevisionSource,
    pub license_id: String,
    pub license_source: LicenseSource,
    pub is_permissive: bool,
    pub is_gated: bool,
    pub build_fat: bool,
    pub build_slim: bool,
    pub base_image: String,
    pub arch: String,
    pub download_root: PathBuf,
    pub cache_dir: PathBuf,
    pub serve_args: Vec<String>,
    pub publish: BTreeSet<PublishTarget>,
    pub oci: OciMetadata,
    pub tags: Vec<ImageTag>,
    pub warnings: Vec<String>,
}

impl ResolvedJob {
    pub fn tags_for(&self, variant: Variant) -> impl Iterator<Item = &ImageTag> {
        self.tags.iter().filter(move |t| t.variant == variant)
    }

    /// Why no fat image is built, `None` when one is. Gating is reported
    /// first when both apply.
    pub fn fat_skip_reason(&self) -> Option<&'static str> {
        if self.is_gated {
            Some("gated")
        } else if !self.is_permissive {
            Some("non-permissive license")
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Matrix document
// ---------------------------------------------------------------------------

/// Serialized output of a resolution run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixDocument {
    pub schema_version: String,
    pub config_digest: String,
    pub jobs: Vec<ResolvedJob>,
    pub warning_count: usize,
}

#[derive(Serialize)]
struct GithubMatrix<'a> {
    include: &'a [ResolvedJob],
}

impl MatrixDocument {
    pub fn new(config_digest: &str, jobs: Vec<ResolvedJob>) -> Self {
        let warning_count = jobs.iter().map(|j| j.warnings.len()).sum();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            config_digest: config_digest.to_string(),
            jobs,
            warning_count,
        }
    }

    pub fn fat_jobs(&self) -> usize {
        self.jobs.iter().filter(|j| j.build_fat).count()
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// `{"include": [...]}` for a CI matrix strategy.
    pub fn to_github_json(&self) -> serde_json::Result<String> {
        let mut out = serde_json::to_string(&GithubMatrix { include: &self.jobs })?;
        out.push('\n');
        Ok(out)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Make `raw` a valid image tag: `[A-Za-z0-9_.-]`, not starting with `.`
/// or `-`, at most 128 characters.
pub fn sanitize_tag(raw: &str) -> String {
    let mut tag: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    while tag.starts_with(['.', '-']) {
        tag.remove(0);
    }
    tag.truncate(MAX_TAG_LEN);
    tag
}

/// Tags for one job, per enabled target in target order:
/// `<version>-slim`, `<version>-fat`, `r<rev>-slim`, `r<rev>-fat`.
pub fn derive_tags(
    version: &str,
    short: &str,
    revision: Option<&str>,
    build_fat: bool,
    publish: &BTreeSet<PublishTarget>,
    registries: &Registries,
) -> Vec<ImageTag> {
    let mut variants = vec![Variant::Slim];
    if build_fat {
        variants.push(Variant::Fat);
    }

    let mut prefixes = vec![sanitize_tag(version)];
    if let Some(rev) = revision {
        let rev: String = rev.trim().chars().take(REVISION_TAG_LEN).collect();
        prefixes.push(sanitize_tag(&format!("r{}", rev)));
    }

    let mut tags = Vec::new();
    for target in publish {
        let Some(repository) = registries.repository(*target) else {
            continue;
        };
        let image = format!("{}/{}", repository, short);
        for prefix in &prefixes {
            for variant in &variants {
                tags.push(ImageTag {
                    registry: *target,
                    image: image.clone(),
                    tag: format!("{}-{}", prefix, variant.suffix()),
                    variant: *variant,
                });
            }
        }
    }
    tags
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

async fn resolve_revision(
    source: &dyn MetadataSource,
    entry: &ModelEntry,
    warnings: &mut Vec<String>,
) -> (Option<String>, RevisionSource) {
    if let Some(rev) = &entry.revision {
        return (Some(rev.trim().to_string()), RevisionSource::Pinned);
    }
    match source.resolve_revision(&entry.id).await {
        Ok(sha) if !sha.trim().is_empty() => {
            (Some(sha.trim().to_string()), RevisionSource::Resolved)
        }
        Ok(_) => {
            let warning = format!("{} reported an empty revision", entry.id);
            obs::emit_lookup_degraded(&entry.id, "revision", &warning);
            warnings.push(warning);
            (None, RevisionSource::Unresolved)
        }
        Err(err) => {
            let warning = format!("revision lookup for {} failed: {}", entry.id, err);
            obs::emit_lookup_degraded(&entry.id, "revision", &err);
            warnings.push(warning);
            (None, RevisionSource::Unresolved)
        }
    }
}

/// Resolve one entry. Never fails: lookup failures degrade to the
/// conservative defaults and are recorded in `warnings`.
pub async fn resolve_entry(
    source: &dyn MetadataSource,
    defaults: &Defaults,
    entry: &ModelEntry,
) -> ResolvedJob {
    let effective = entry.effective(defaults);
    let mut warnings = Vec::new();

    let (revision, revision_source) = resolve_revision(source, entry, &mut warnings).await;

    // Lookups for an unresolved revision fall back to the default branch.
    let license = classify(
        source,
        LicenseQuery {
            model_id: &entry.id,
            revision: revision.as_deref(),
            override_spdx: entry.override_spdx.as_deref(),
            explicit_permissive: entry.permissive,
        },
        &defaults.permissive_whitelist,
    )
    .await;
    if let Some(warning) = license.warning {
        obs::emit_lookup_degraded(&entry.id, "license", &warning);
        warnings.push(warning);
    }

    let gating = resolve_gating(source, &entry.id, revision.as_deref(), entry.gated).await;
    if let Some(warning) = gating.warning {
        obs::emit_lookup_degraded(&entry.id, "gated", &warning);
        warnings.push(warning);
    }

    let build_fat = license.is_permissive && !gating.is_gated;
    let version = defaults.image_version();
    let tags = derive_tags(
        &version,
        &entry.short,
        revision.as_deref(),
        build_fat,
        &effective.publish,
        &defaults.registries,
    );

    obs::emit_job_resolved(&entry.short, &license.license_id, build_fat, tags.len());

    ResolvedJob {
        model_id: entry.id.clone(),
        short: entry.short.clone(),
        version,
        revision,
        revision_source,
        license_id: license.license_id,
        license_source: license.source,
        is_permissive: license.is_permissive,
        is_gated: gating.is_gated,
        build_fat,
        build_slim: true,
        base_image: effective.base_image,
        arch: effective.arch,
        download_root: effective.download_root,
        cache_dir: effective.cache_dir,
        serve_args: effective.serve_args,
        publish: effective.publish,
        oci: effective.oci,
        tags,
        warnings,
    }
}

/// Validate `config`, then resolve every entry in configuration order.
///
/// A configuration error returns before any lookup is made, so no partial
/// job list is ever produced.
pub async fn resolve(
    source: &dyn MetadataSource,
    config: &PipelineConfig,
) -> Result<Vec<ResolvedJob>, ConfigError> {
    config.validate()?;

    let defaults = &config.defaults;
    let concurrency = defaults.lookup.concurrency.max(1);

    let jobs = stream::iter(config.models.iter())
        .map(|entry| resolve_entry(source, defaults, entry))
        .buffered(concurrency)
        .collect::<Vec<_>>()
        .await;
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::UNKNOWN_LICENSE;
    use hub_metadata::fakes::{Lookup, StaticSource};
    use hub_metadata::HubError;

    fn registries() -> Registries {
        Registries {
            primary: Some("ghcr.io/acme/inference".to_string()),
            secondary: Some("docker.io/acme/inference".to_string()),
        }
    }

    fn config(models: Vec<ModelEntry>) -> PipelineConfig {
        PipelineConfig {
            defaults: Defaults::new("0.4.0", registries()),
            models,
        }
    }

    fn both() -> BTreeSet<PublishTarget> {
        [PublishTarget::Primary, PublishTarget::Secondary]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_sanitize_tag() {
        assert_eq!(sanitize_tag("0.4.0"), "0.4.0");
        assert_eq!(sanitize_tag("v1+build/7"), "v1-build-7");
        assert_eq!(sanitize_tag("-.x"), "x");
        assert_eq!(sanitize_tag(&"a".repeat(200)).len(), 128);
    }

    #[test]
    fn test_tag_order_with_fat_and_revision() {
        let tags = derive_tags(
            "0.4.0",
            "m1",
            Some("0123456789abcdef0123"),
            true,
            &both(),
            &registries(),
        );
        let refs: Vec<String> = tags.iter().map(ImageTag::reference).collect();
        assert_eq!(
            refs,
            vec![
                "ghcr.io/acme/inference/m1:0.4.0-slim",
                "ghcr.io/acme/inference/m1:0.4.0-fat",
                "ghcr.io/acme/inference/m1:r0123456789ab-slim",
                "ghcr.io/acme/inference/m1:r0123456789ab-fat",
                "docker.io/acme/inference/m1:0.4.0-slim",
                "docker.io/acme/inference/m1:0.4.0-fat",
                "docker.io/acme/inference/m1:r0123456789ab-slim",
                "docker.io/acme/inference/m1:r0123456789ab-fat",
            ]
        );
    }

    #[test]
    fn test_no_fat_tags_without_fat_build_and_no_revision_tags_without_revision() {
        let publish = [PublishTarget::Secondary].into_iter().collect();
        let tags = derive_tags("1.0", "m1", None, false, &publish, &registries());
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].tag, "1.0-slim");
        assert_eq!(tags[0].registry, PublishTarget::Secondary);
    }

    #[tokio::test]
    async fn test_permissive_ungated_model_builds_fat() {
        let source = StaticSource::new().with_model(
            "org/m1",
            "abcdef0123456789",
            Some("apache-2.0"),
            false,
        );
        let jobs = resolve(&source, &config(vec![ModelEntry::new("org/m1", "m1")]))
            .await
            .unwrap();

        let job = &jobs[0];
        assert!(job.is_permissive);
        assert!(!job.is_gated);
        assert!(job.build_fat);
        assert!(job.build_slim);
        assert_eq!(job.revision.as_deref(), Some("abcdef0123456789"));
        assert_eq!(job.revision_source, RevisionSource::Resolved);
        assert_eq!(job.tags_for(Variant::Fat).count(), 4);
        assert_eq!(job.tags_for(Variant::Slim).count(), 4);
        assert!(job.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_gated_model_is_slim_only() {
        let source = StaticSource::new().with_model("org/m1", "abc", Some("mit"), true);
        let jobs = resolve(&source, &config(vec![ModelEntry::new("org/m1", "m1")]))
            .await
            .unwrap();
        assert!(jobs[0].is_gated);
        assert!(!jobs[0].build_fat);
        assert!(jobs[0].build_slim);
        assert_eq!(jobs[0].tags_for(Variant::Fat).count(), 0);
    }

    #[tokio::test]
    async fn test_override_spdx_outside_whitelist_blocks_fat() {
        let source = StaticSource::new().with_model("org/m1", "abc", Some("apache-2.0"), false);
        let mut entry = ModelEntry::new("org/m1", "m1");
        entry.override_spdx = Some("gpl-3.0".to_string());

        let jobs = resolve(&source, &config(vec![entry])).await.unwrap();
        assert_eq!(jobs[0].license_id, "gpl-3.0");
        assert!(!jobs[0].is_permissive);
        assert!(!jobs[0].build_fat);
    }

    #[tokio::test]
    async fn test_pinned_revision_skips_lookup() {
        let source = StaticSource::new().with_model("org/m1", "remote", Some("mit"), false);
        let mut entry = ModelEntry::new("org/m1", "m1");
        entry.revision = Some("pinned0123456789".to_string());

        let jobs = resolve(&source, &config(vec![entry])).await.unwrap();
        assert_eq!(jobs[0].revision.as_deref(), Some("pinned0123456789"));
        assert_eq!(jobs[0].revision_source, RevisionSource::Pinned);
        assert_eq!(source.calls(Lookup::Revision), 0);
        assert!(jobs[0].tags.iter().any(|t| t.tag == "rpinned012345-fat"));
    }

    #[tokio::test]
    async fn test_unresolved_revision_drops_revision_tags() {
        let source = StaticSource::new()
            .with_license("org/m1", Some("mit"))
            .with_gated("org/m1", false)
            .failing("org/m1", Lookup::Revision, HubError::Http("down".to_string()));

        let jobs = resolve(&source, &config(vec![ModelEntry::new("org/m1", "m1")]))
            .await
            .unwrap();
        let job = &jobs[0];
        assert_eq!(job.revision, None);
        assert_eq!(job.revision_source, RevisionSource::Unresolved);
        assert!(job.tags.iter().all(|t| !t.tag.starts_with('r')));
        assert!(job.build_fat);
        assert_eq!(job.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_every_lookup_failing_is_conservative() {
        let jobs = resolve(
            &hub_metadata::OfflineSource,
            &config(vec![ModelEntry::new("org/m1", "m1")]),
        )
        .await
        .unwrap();
        let job = &jobs[0];
        assert_eq!(job.license_id, UNKNOWN_LICENSE);
        assert!(!job.is_permissive);
        assert!(job.is_gated);
        assert!(!job.build_fat);
        assert!(job.build_slim);
        assert_eq!(job.warnings.len(), 3);
    }

    #[tokio::test]
    async fn test_entry_publish_limits_tags() {
        let source = StaticSource::new().with_model("org/m1", "abc", Some("mit"), false);
        let mut entry = ModelEntry::new("org/m1", "m1");
        entry.publish = Some([PublishTarget::Primary].into_iter().collect());

        let jobs = resolve(&source, &config(vec![entry])).await.unwrap();
        assert!(jobs[0]
            .tags
            .iter()
            .all(|t| t.registry == PublishTarget::Primary));
    }

    #[tokio::test]
    async fn test_invalid_config_makes_no_lookups() {
        let source = StaticSource::new().with_model("org/a", "abc", Some("mit"), false);
        let cfg = config(vec![
            ModelEntry::new("org/a", "same"),
            ModelEntry::new("org/b", "same"),
        ]);

        let err = resolve(&source, &cfg).await.unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateShort { .. }));
        assert_eq!(source.calls(Lookup::Revision), 0);
        assert_eq!(source.calls(Lookup::License), 0);
        assert_eq!(source.calls(Lookup::Gated), 0);
    }

    #[tokio::test]
    async fn test_output_follows_configuration_order() {
        let mut source = StaticSource::new();
        let mut models = Vec::new();
        for i in 0..10 {
            let id = format!("org/m{}", i);
            source = source.with_model(&id, "abc", Some("mit"), i % 2 == 0);
            models.push(ModelEntry::new(&id, &format!("m{}", i)));
        }
        let mut cfg = config(models);
        cfg.defaults.lookup.concurrency = 3;

        let jobs = resolve(&source, &cfg).await.unwrap();
        let shorts: Vec<&str> = jobs.iter().map(|j| j.short.as_str()).collect();
        assert_eq!(
            shorts,
            vec!["m0", "m1", "m2", "m3", "m4", "m5", "m6", "m7", "m8", "m9"]
        );
    }

    #[test]
    fn test_document_counts_warnings_and_renders_github_include() {
        let job = ResolvedJob {
            model_id: "org/m1".to_string(),
            short: "m1".to_string(),
            version: "0.4.0".to_string(),
            revision: None,
            revision_source: RevisionSource::Unresolved,
            license_id: UNKNOWN_LICENSE.to_string(),
            license_source: LicenseSource::Unknown,
            is_permissive: false,
            is_gated: true,
            build_fat: false,
            build_slim: true,
            base_image: "img".to_string(),
            arch: "amd64".to_string(),
            download_root: PathBuf::from("/models"),
            cache_dir: PathBuf::from("/cache"),
            serve_args: vec![],
            publish: both(),
            oci: OciMetadata::resolve("org/m1", "img", None),
            tags: vec![],
            warnings: vec!["a".to_string(), "b".to_string()],
        };
        let doc = MatrixDocument::new("digest", vec![job]);
        assert_eq!(doc.warning_count, 2);
        assert_eq!(doc.fat_jobs(), 0);

        let github: serde_json::Value =
            serde_json::from_str(&doc.to_github_json().unwrap()).unwrap();
        assert_eq!(github["include"][0]["short"], "m1");
        assert_eq!(github["include"][0]["revision_source"], "unresolved");

        let back = MatrixDocument::from_json(&doc.to_json().unwrap()).unwrap();
        assert_eq!(back, doc);
    }
}
