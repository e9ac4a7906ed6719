//! License harvesting for fat images.
//!
//! Collects the license artifacts that must ship next to embedded weights:
//!
//! 1. `LICENSE` - the infrastructure's own public-domain dedication, always
//! 2. `model/LICENSE` - the upstream license file, or vendored SPDX text
//! 3. `model/NOTICE` - the upstream notice file, when one exists
//! 4. `NOTICE` - which component of the image is under which license
//!
//! plus `oci-labels.json` with the image annotations. Upstream files are
//! bundled whenever the repository has them; vendored text only stands in
//! for a whitelisted license.
//!
//! Network problems never fail a harvest; they degrade to vendored text or
//! omission and are recorded as warnings. Only local filesystem errors are
//! returned as [`HarvestError`].

pub mod spdx;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hub_metadata::MetadataSource;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{normalize_spdx, Defaults, OciMetadata, PermissiveWhitelist};
use crate::error::HarvestError;
use crate::license::UNKNOWN_LICENSE;
use crate::matrix::ResolvedJob;
use crate::obs;

/// Upstream license file names, tried in order.
pub const LICENSE_CANDIDATES: [&str; 3] = ["LICENSE", "LICENSE.md", "LICENSE.txt"];

/// Upstream notice file names, tried in order.
pub const NOTICE_CANDIDATES: [&str; 3] = ["NOTICE", "NOTICE.md", "NOTICE.txt"];

pub const INFRA_LICENSE_PATH: &str = "LICENSE";
pub const MODEL_LICENSE_PATH: &str = "model/LICENSE";
pub const MODEL_NOTICE_PATH: &str = "model/NOTICE";
pub const PROJECT_NOTICE_PATH: &str = "NOTICE";
pub const README_PATH: &str = "README.md";
pub const MANIFEST_PATH: &str = "MANIFEST.json";
pub const OCI_LABELS_PATH: &str = "oci-labels.json";

/// SPDX identifier of the infrastructure license.
pub const INFRA_LICENSE_ID: &str = "Unlicense";

/// Where a bundled file's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOrigin {
    Infrastructure,
    Upstream,
    Vendored,
    Generated,
}

/// How the model license ended up in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLicenseOrigin {
    Upstream,
    Vendored,
    Absent,
}

/// One file of a license bundle, path relative to the bundle root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub path: &'static str,
    pub content: String,
    pub origin: FileOrigin,
}

/// Ordered license files for one model.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LicenseBundle {
    pub files: Vec<BundleFile>,
}

impl LicenseBundle {
    pub fn get(&self, path: &str) -> Option<&BundleFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn paths(&self) -> Vec<&'static str> {
        self.files.iter().map(|f| f.path).collect()
    }
}

/// The image a bundle ships in: named in the project notice and the labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageContext {
    pub base_image: String,
    pub base_image_license: String,
    pub source_url: Option<String>,
    pub oci: OciMetadata,
}

impl ImageContext {
    /// Context for a model built from the configured default base image.
    pub fn new(model_id: &str, defaults: &Defaults) -> Self {
        Self {
            base_image: defaults.base_image.clone(),
            base_image_license: defaults.base_image_license.clone(),
            source_url: defaults.source_url.clone(),
            oci: OciMetadata::resolve(model_id, &defaults.base_image, None),
        }
    }

    /// Context for a resolved job, which may override the base image.
    pub fn for_job(job: &ResolvedJob, defaults: &Defaults) -> Self {
        Self {
            base_image: job.base_image.clone(),
            base_image_license: defaults.base_image_license.clone(),
            source_url: defaults.source_url.clone(),
            oci: job.oci.clone(),
        }
    }
}

/// What to harvest.
#[derive(Debug, Clone, Copy)]
pub struct HarvestRequest<'a> {
    pub model_id: &'a str,
    pub revision: Option<&'a str>,
    /// Resolved SPDX identifier or `unknown`
    pub license_id: &'a str,
    pub whitelist: &'a PermissiveWhitelist,
    pub image: &'a ImageContext,
}

/// In-memory harvest result, before anything touches disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestOutcome {
    pub bundle: LicenseBundle,
    pub model_license: ModelLicenseOrigin,
    pub oci_labels: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

/// Manifest entry for a written file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub origin: FileOrigin,
    pub sha256: String,
    pub bytes: usize,
}

/// Written to `MANIFEST.json` and returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestReport {
    pub model_id: String,
    pub revision: Option<String>,
    pub license_id: String,
    pub model_license: ModelLicenseOrigin,
    pub entries: Vec<ManifestEntry>,
    pub oci_labels: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

/// Fetch the first candidate file that exists. Errors are recorded and the
/// next candidate is tried.
async fn first_upstream(
    source: &dyn MetadataSource,
    request: &HarvestRequest<'_>,
    candidates: &[&str],
    warnings: &mut Vec<String>,
) -> Option<String> {
    for name in candidates {
        match source
            .fetch_file(request.model_id, request.revision, name)
            .await
        {
            Ok(Some(content)) if !content.trim().is_empty() => return Some(content),
            Ok(_) => {}
            Err(err) => warnings.push(format!(
                "fetching {} for {} failed: {}",
                name, request.model_id, err
            )),
        }
    }
    None
}

/// SPDX license expression term for an identifier, `NOASSERTION` if unknown.
fn spdx_term(license_id: &str) -> String {
    let id = normalize_spdx(license_id);
    if id.is_empty() || id == UNKNOWN_LICENSE {
        "NOASSERTION".to_string()
    } else {
        id
    }
}

/// `org.opencontainers.image.*` annotations for a fat image.
pub fn oci_labels(request: &HarvestRequest<'_>) -> BTreeMap<String, String> {
    let image = request.image;
    let mut labels = BTreeMap::new();
    let mut put = |key: &str, value: String| {
        labels.insert(format!("org.opencontainers.image.{}", key), value);
    };

    put("title", image.oci.title.clone());
    if !image.oci.description.is_empty() {
        put("description", image.oci.description.clone());
    }
    put("url", image.oci.url.clone());
    if let Some(source_url) = &image.source_url {
        put("source", source_url.clone());
    }
    put(
        "licenses",
        format!(
            "{} AND {} AND {}",
            INFRA_LICENSE_ID,
            spdx_term(request.license_id),
            spdx_term(&image.base_image_license)
        ),
    );
    labels
}

/// Render the project-level notice listing every licensed component.
pub fn render_project_notice(
    request: &HarvestRequest<'_>,
    model_license: ModelLicenseOrigin,
    has_model_notice: bool,
) -> String {
    let mut out = String::new();
    out.push_str("NOTICE\n\n");
    out.push_str("This image contains components under different licenses:\n\n");

    out.push_str("1. Image build infrastructure\n");
    out.push_str(&format!("   License: {}\n", INFRA_LICENSE_ID));
    out.push_str(&format!("   Location: {}\n\n", INFRA_LICENSE_PATH));

    out.push_str(&format!("2. Model: {}\n", request.model_id));
    if let Some(revision) = request.revision {
        out.push_str(&format!("   Revision: {}\n", revision));
    }
    out.push_str(&format!(
        "   License: {}\n",
        normalize_spdx(request.license_id)
    ));
    match model_license {
        ModelLicenseOrigin::Upstream => {
            out.push_str(&format!("   Location: {}\n", MODEL_LICENSE_PATH))
        }
        ModelLicenseOrigin::Vendored => out.push_str(&format!(
            "   Location: {} (vendored SPDX text)\n",
            MODEL_LICENSE_PATH
        )),
        ModelLicenseOrigin::Absent => out.push_str("   Location: not bundled\n"),
    }
    if has_model_notice {
        out.push_str(&format!("   Upstream NOTICE: {}\n", MODEL_NOTICE_PATH));
    }

    out.push_str(&format!("\n3. Base image: {}\n", request.image.base_image));
    out.push_str(&format!(
        "   License: {}\n\n",
        request.image.base_image_license
    ));

    out.push_str("The image adds the model weights and startup configuration to the base image.\n");
    out.push_str("All trademarks are property of their respective owners.\n");
    out
}

/// Decide the bundle contents for a model. Never fails.
pub async fn collect_bundle(
    source: &dyn MetadataSource,
    request: &HarvestRequest<'_>,
) -> HarvestOutcome {
    let mut warnings = Vec::new();
    let mut files = vec![BundleFile {
        path: INFRA_LICENSE_PATH,
        content: spdx::infrastructure_license().to_string(),
        origin: FileOrigin::Infrastructure,
    }];

    let license_id = normalize_spdx(request.license_id);
    let whitelisted = license_id != UNKNOWN_LICENSE && request.whitelist.contains(&license_id);

    let upstream = first_upstream(source, request, &LICENSE_CANDIDATES, &mut warnings).await;
    let model_license = match upstream {
        Some(content) => {
            files.push(BundleFile {
                path: MODEL_LICENSE_PATH,
                content,
                origin: FileOrigin::Upstream,
            });
            ModelLicenseOrigin::Upstream
        }
        None if !whitelisted => {
            warnings.push(format!(
                "no upstream license for {} and '{}' is not whitelisted, no model license bundled",
                request.model_id, license_id
            ));
            ModelLicenseOrigin::Absent
        }
        None => match spdx::vendored_text(&license_id) {
            Some(text) => {
                files.push(BundleFile {
                    path: MODEL_LICENSE_PATH,
                    content: text.to_string(),
                    origin: FileOrigin::Vendored,
                });
                ModelLicenseOrigin::Vendored
            }
            None => {
                warnings.push(format!(
                    "no upstream license for {} and no vendored text for '{}'",
                    request.model_id, license_id
                ));
                ModelLicenseOrigin::Absent
            }
        },
    };

    let notice = first_upstream(source, request, &NOTICE_CANDIDATES, &mut warnings).await;
    let has_model_notice = notice.is_some();
    if let Some(content) = notice {
        files.push(BundleFile {
            path: MODEL_NOTICE_PATH,
            content,
            origin: FileOrigin::Upstream,
        });
    }

    files.push(BundleFile {
        path: PROJECT_NOTICE_PATH,
        content: render_project_notice(request, model_license, has_model_notice),
        origin: FileOrigin::Generated,
    });

    HarvestOutcome {
        bundle: LicenseBundle { files },
        model_license,
        oci_labels: oci_labels(request),
        warnings,
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn write_file(path: &Path, content: &[u8]) -> Result<(), HarvestError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| HarvestError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, content).map_err(|source| HarvestError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn remove_stale(path: &Path) -> Result<(), HarvestError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(HarvestError::Write {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Render the provenance README for a bundle.
pub fn render_readme(report: &HarvestReport) -> String {
    let mut out = String::new();
    out.push_str("# Bundled licenses\n\n");
    out.push_str(&format!("- model: `{}`\n", report.model_id));
    out.push_str(&format!(
        "- revision: `{}`\n",
        report.revision.as_deref().unwrap_or("default branch")
    ));
    out.push_str(&format!("- license: `{}`\n", report.license_id));
    let origin = match report.model_license {
        ModelLicenseOrigin::Upstream => "upstream license file",
        ModelLicenseOrigin::Vendored => "vendored SPDX text (no upstream license file)",
        ModelLicenseOrigin::Absent => "none found",
    };
    out.push_str(&format!("- model license source: {}\n\n", origin));

    out.push_str("## Files\n\n");
    for entry in &report.entries {
        let short_sha: String = entry.sha256.chars().take(12).collect();
        out.push_str(&format!(
            "- `{}` ({:?}, sha256 {})\n",
            entry.path, entry.origin, short_sha
        ));
    }
    out.push_str(&format!(
        "\n`{}` covers the image build infrastructure and is dedicated to the public domain.\n",
        INFRA_LICENSE_PATH
    ));
    out.push_str(&format!(
        "`{}` holds the image annotations for the build step.\n",
        OCI_LABELS_PATH
    ));

    if !report.warnings.is_empty() {
        out.push_str("\n## Warnings\n\n");
        for warning in &report.warnings {
            out.push_str(&format!("- {}\n", warning));
        }
    }
    out
}

/// Write a collected bundle under `out_dir`, replacing earlier output.
pub fn write_bundle(
    outcome: &HarvestOutcome,
    request: &HarvestRequest<'_>,
    out_dir: &Path,
) -> Result<HarvestReport, HarvestError> {
    let mut entries = Vec::with_capacity(outcome.bundle.files.len());
    for file in &outcome.bundle.files {
        write_file(&out_dir.join(file.path), file.content.as_bytes())?;
        entries.push(ManifestEntry {
            path: file.path.to_string(),
            origin: file.origin,
            sha256: sha256_hex(file.content.as_bytes()),
            bytes: file.content.len(),
        });
    }

    for optional in [MODEL_LICENSE_PATH, MODEL_NOTICE_PATH] {
        if outcome.bundle.get(optional).is_none() {
            remove_stale(&out_dir.join(optional))?;
        }
    }

    let report = HarvestReport {
        model_id: request.model_id.to_string(),
        revision: request.revision.map(str::to_string),
        license_id: normalize_spdx(request.license_id),
        model_license: outcome.model_license,
        entries,
        oci_labels: outcome.oci_labels.clone(),
        warnings: outcome.warnings.clone(),
    };

    let labels = serde_json::to_string_pretty(&report.oci_labels)?;
    write_file(&out_dir.join(OCI_LABELS_PATH), labels.as_bytes())?;
    write_file(&out_dir.join(README_PATH), render_readme(&report).as_bytes())?;
    let manifest = serde_json::to_string_pretty(&report)?;
    write_file(&out_dir.join(MANIFEST_PATH), manifest.as_bytes())?;

    Ok(report)
}

/// Collect and write the license bundle for one model.
pub async fn harvest(
    source: &dyn MetadataSource,
    request: &HarvestRequest<'_>,
    out_dir: &Path,
) -> Result<HarvestReport, HarvestError> {
    let outcome = collect_bundle(source, request).await;
    for warning in &outcome.warnings {
        obs::emit_lookup_degraded(request.model_id, "harvest", warning);
    }
    let report = write_bundle(&outcome, request, out_dir)?;
    obs::emit_harvest_completed(
        request.model_id,
        &report.license_id,
        report.entries.len(),
        report.model_license,
    );
    Ok(report)
}

/// Directory a job's bundle is written to under a shared root.
pub fn bundle_dir(root: &Path, short: &str) -> PathBuf {
    root.join(short)
}
