//! Model list configuration: schema, loading and validation.
//!
//! The document has a `defaults` section merged under every entry of the
//! `models` sequence. Validation is all-or-nothing: one bad entry rejects
//! the whole document before any remote lookup happens.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use hub_metadata::RetryPolicy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::harvest::spdx;

/// Identifiers considered permissive when the configuration names none.
pub const DEFAULT_WHITELIST: [&str; 7] = [
    "apache-2.0",
    "mit",
    "bsd-2-clause",
    "bsd-3-clause",
    "isc",
    "cc0-1.0",
    "unlicense",
];

// ---------------------------------------------------------------------------
// Tri-state override
// ---------------------------------------------------------------------------

/// Operator override for a decision that is otherwise computed.
///
/// Written as `auto`, `true` or `false` (bare booleans or strings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Override {
    /// Delegate to the resolver.
    #[default]
    Auto,
    /// Authoritative operator decision.
    Explicit(bool),
}

impl fmt::Display for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Override::Auto => write!(f, "auto"),
            Override::Explicit(value) => write!(f, "{}", value),
        }
    }
}

impl Serialize for Override {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Override::Auto => serializer.serialize_str("auto"),
            Override::Explicit(value) => serializer.serialize_bool(*value),
        }
    }
}

impl<'de> Deserialize<'de> for Override {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(value) => Ok(Override::Explicit(value)),
            Raw::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "auto" => Ok(Override::Auto),
                "true" => Ok(Override::Explicit(true)),
                "false" => Ok(Override::Explicit(false)),
                other => Err(serde::de::Error::custom(format!(
                    "expected auto, true or false, found '{}'",
                    other
                ))),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Publish targets
// ---------------------------------------------------------------------------

/// Registry an image may be pushed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishTarget {
    Primary,
    Secondary,
}

impl PublishTarget {
    pub fn name(&self) -> &'static str {
        match self {
            PublishTarget::Primary => "primary",
            PublishTarget::Secondary => "secondary",
        }
    }
}

impl fmt::Display for PublishTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Image repositories per publish target, e.g. `ghcr.io/acme/inference`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Registries {
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

impl Registries {
    pub fn repository(&self, target: PublishTarget) -> Option<&str> {
        let repo = match target {
            PublishTarget::Primary => self.primary.as_deref(),
            PublishTarget::Secondary => self.secondary.as_deref(),
        };
        repo.map(|r| r.trim_end_matches('/'))
            .filter(|r| !r.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Permissive whitelist
// ---------------------------------------------------------------------------

/// Set of SPDX identifiers that permit weight redistribution.
///
/// Identifiers are stored lower-cased; lookups lower-case the candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct PermissiveWhitelist(BTreeSet<String>);

impl PermissiveWhitelist {
    pub fn contains(&self, license_id: &str) -> bool {
        self.0.contains(&normalize_spdx(license_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for PermissiveWhitelist {
    fn default() -> Self {
        DEFAULT_WHITELIST.iter().map(|s| s.to_string()).collect::<Vec<_>>().into()
    }
}

impl From<Vec<String>> for PermissiveWhitelist {
    fn from(ids: Vec<String>) -> Self {
        Self(
            ids.iter()
                .map(|id| normalize_spdx(id))
                .filter(|id| !id.is_empty())
                .collect(),
        )
    }
}

impl From<PermissiveWhitelist> for Vec<String> {
    fn from(list: PermissiveWhitelist) -> Self {
        list.0.into_iter().collect()
    }
}

/// Canonical comparison form of an SPDX identifier.
pub fn normalize_spdx(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Lookup settings
// ---------------------------------------------------------------------------

/// Concurrency and retry budget for remote lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LookupSettings {
    /// Models resolved at the same time
    pub concurrency: usize,
    /// Deadline for one attempt
    pub timeout_secs: u64,
    /// Attempts per lookup, including the first
    pub attempts: u32,
    /// Delay before the first retry
    pub backoff_ms: u64,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout_secs: 15,
            attempts: 3,
            backoff_ms: 250,
        }
    }
}

impl LookupSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts,
            timeout: Duration::from_secs(self.timeout_secs),
            initial_backoff: Duration::from_millis(self.backoff_ms),
            ..RetryPolicy::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults and entries
// ---------------------------------------------------------------------------

fn default_base_image() -> String {
    "ghcr.io/ggml-org/llama.cpp:server".to_string()
}

fn default_base_image_license() -> String {
    "mit".to_string()
}

fn default_arch() -> String {
    "amd64".to_string()
}

fn default_download_root() -> PathBuf {
    PathBuf::from("/models")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/root/.cache/huggingface")
}

fn default_publish() -> BTreeSet<PublishTarget> {
    [PublishTarget::Primary, PublishTarget::Secondary]
        .into_iter()
        .collect()
}

/// Process-wide settings inherited by every model entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Image release version, the leading part of every tag. Falls back to
    /// the base image tag, then `latest`.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_base_image")]
    pub base_image: String,
    /// SPDX identifier of the base image, named in bundle notices and labels
    #[serde(default = "default_base_image_license")]
    pub base_image_license: String,
    /// Repository of the image build infrastructure, for OCI labels
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default = "default_download_root")]
    pub download_root: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub permissive_whitelist: PermissiveWhitelist,
    #[serde(default = "default_publish")]
    pub publish: BTreeSet<PublishTarget>,
    #[serde(default)]
    pub serve_args: Vec<String>,
    pub registries: Registries,
    #[serde(default)]
    pub lookup: LookupSettings,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            version: None,
            base_image: default_base_image(),
            base_image_license: default_base_image_license(),
            source_url: None,
            arch: default_arch(),
            download_root: default_download_root(),
            cache_dir: default_cache_dir(),
            permissive_whitelist: PermissiveWhitelist::default(),
            publish: default_publish(),
            serve_args: Vec::new(),
            registries: Registries::default(),
            lookup: LookupSettings::default(),
        }
    }
}

impl Defaults {
    /// Built-in defaults with an explicit version and registries.
    pub fn new(version: &str, registries: Registries) -> Self {
        Self {
            version: Some(version.to_string()),
            registries,
            ..Self::default()
        }
    }

    /// Version used in `<version>-<variant>` tags.
    pub fn image_version(&self) -> String {
        if let Some(version) = self.version.as_deref().map(str::trim) {
            if !version.is_empty() {
                return version.to_string();
            }
        }
        image_reference_tag(&self.base_image)
            .unwrap_or("latest")
            .to_string()
    }
}

/// Tag of an image reference, ignoring registry ports and digests.
pub fn image_reference_tag(reference: &str) -> Option<&str> {
    let name = reference.split('@').next().unwrap_or(reference);
    let last = name.rsplit('/').next().unwrap_or(name);
    last.split_once(':')
        .map(|(_, tag)| tag.trim())
        .filter(|tag| !tag.is_empty())
}

/// Last path segment of an image reference without tag or digest,
/// e.g. `llama.cpp` for `ghcr.io/ggml-org/llama.cpp:server`.
pub fn image_short_name(reference: &str) -> &str {
    let name = reference.split('@').next().unwrap_or(reference);
    let last = name.rsplit('/').next().unwrap_or(name);
    last.split(':').next().unwrap_or(last)
}

// ---------------------------------------------------------------------------
// OCI annotations
// ---------------------------------------------------------------------------

/// Per-model OCI annotation overrides, all optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OciOverrides {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Resolved OCI annotations for one model's images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciMetadata {
    pub title: String,
    pub description: String,
    pub url: String,
}

impl OciMetadata {
    /// Apply `overrides` over the built-in values: `<base image> + <id>` as
    /// title, no description, and the model's hub page as url.
    pub fn resolve(model_id: &str, base_image: &str, overrides: Option<&OciOverrides>) -> Self {
        let pick = |field: Option<&String>| {
            field
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let overrides = overrides.cloned().unwrap_or_default();
        Self {
            title: pick(overrides.title.as_ref())
                .unwrap_or_else(|| format!("{} + {}", image_short_name(base_image), model_id)),
            description: pick(overrides.description.as_ref()).unwrap_or_default(),
            url: pick(overrides.url.as_ref())
                .unwrap_or_else(|| format!("{}/{}", hub_metadata::DEFAULT_ENDPOINT, model_id)),
        }
    }
}

/// One configured model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelEntry {
    /// Remote repository identifier, e.g. `org/model-GGUF`
    pub id: String,
    /// Kebab-case tag used in image names
    pub short: String,
    /// Pinned commit; absent means the current default branch
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub permissive: Override,
    #[serde(default)]
    pub gated: Override,
    /// Forces a license identifier instead of the remote declaration
    #[serde(default)]
    pub override_spdx: Option<String>,
    #[serde(default)]
    pub serve_args: Option<Vec<String>>,
    #[serde(default)]
    pub publish: Option<BTreeSet<PublishTarget>>,
    #[serde(default)]
    pub base_image: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub download_root: Option<PathBuf>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub oci: Option<OciOverrides>,
}

impl ModelEntry {
    /// Minimal entry with every optional field unset.
    pub fn new(id: &str, short: &str) -> Self {
        Self {
            id: id.to_string(),
            short: short.to_string(),
            revision: None,
            permissive: Override::Auto,
            gated: Override::Auto,
            override_spdx: None,
            serve_args: None,
            publish: None,
            base_image: None,
            arch: None,
            download_root: None,
            cache_dir: None,
            oci: None,
        }
    }

    /// Merge this entry over `defaults`. Sequence and set fields replace the
    /// default wholesale when present.
    pub fn effective(&self, defaults: &Defaults) -> EffectiveEntry {
        let base_image = self
            .base_image
            .clone()
            .unwrap_or_else(|| defaults.base_image.clone());
        EffectiveEntry {
            oci: OciMetadata::resolve(&self.id, &base_image, self.oci.as_ref()),
            base_image,
            arch: self.arch.clone().unwrap_or_else(|| defaults.arch.clone()),
            download_root: self
                .download_root
                .clone()
                .unwrap_or_else(|| defaults.download_root.clone()),
            cache_dir: self
                .cache_dir
                .clone()
                .unwrap_or_else(|| defaults.cache_dir.clone()),
            serve_args: self
                .serve_args
                .clone()
                .unwrap_or_else(|| defaults.serve_args.clone()),
            publish: self
                .publish
                .clone()
                .unwrap_or_else(|| defaults.publish.clone()),
        }
    }
}

/// Build settings for one entry after merging with [`Defaults`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveEntry {
    pub base_image: String,
    pub arch: String,
    pub download_root: PathBuf,
    pub cache_dir: PathBuf,
    pub serve_args: Vec<String>,
    pub publish: BTreeSet<PublishTarget>,
    pub oci: OciMetadata,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// The whole configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub defaults: Defaults,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

/// A parsed, validated document plus the digest of its raw bytes.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: PipelineConfig,
    pub digest: String,
}

fn short_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("valid short pattern"))
}

/// SHA-256 (hex) of the raw configuration bytes.
pub fn config_digest(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    hex::encode(hasher.finalize())
}

impl PipelineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig =
            serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<LoadedConfig, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(raw)
            .map_err(|e| ConfigError::Parse(format!("{:?} is not UTF-8: {}", path, e)))?;
        let config = Self::from_yaml(&text)?;
        Ok(LoadedConfig {
            digest: config_digest(text.as_bytes()),
            config,
        })
    }

    /// Check every structural rule. Stops at the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let defaults = &self.defaults;

        if matches!(&defaults.version, Some(v) if v.trim().is_empty()) {
            return Err(ConfigError::EmptyDefault { field: "version" });
        }
        if defaults.base_image.trim().is_empty() {
            return Err(ConfigError::EmptyDefault { field: "base_image" });
        }
        if defaults.base_image_license.trim().is_empty() {
            return Err(ConfigError::EmptyDefault {
                field: "base_image_license",
            });
        }
        if defaults.permissive_whitelist.is_empty() {
            return Err(ConfigError::EmptyDefault {
                field: "permissive_whitelist",
            });
        }
        if defaults.lookup.concurrency == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "lookup.concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if defaults.lookup.timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "lookup.timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        for id in defaults.permissive_whitelist.iter() {
            if spdx::vendored_text(id).is_none() {
                return Err(ConfigError::UnvendoredLicense { id: id.to_string() });
            }
        }

        let mut shorts: HashMap<&str, usize> = HashMap::new();
        let mut ids: HashMap<&str, usize> = HashMap::new();

        for (index, entry) in self.models.iter().enumerate() {
            if entry.id.trim().is_empty() {
                return Err(ConfigError::EmptyField { index, field: "id" });
            }
            if entry.short.trim().is_empty() {
                return Err(ConfigError::EmptyField {
                    index,
                    field: "short",
                });
            }
            if !short_pattern().is_match(&entry.short) {
                return Err(ConfigError::InvalidShort {
                    index,
                    id: entry.id.clone(),
                    short: entry.short.clone(),
                });
            }
            if matches!(&entry.revision, Some(rev) if rev.trim().is_empty()) {
                return Err(ConfigError::EmptyField {
                    index,
                    field: "revision",
                });
            }

            if let Some(first) = shorts.insert(entry.short.as_str(), index) {
                return Err(ConfigError::DuplicateShort {
                    short: entry.short.clone(),
                    first,
                    second: index,
                });
            }
            if let Some(first) = ids.insert(entry.id.as_str(), index) {
                return Err(ConfigError::DuplicateId {
                    id: entry.id.clone(),
                    first,
                    second: index,
                });
            }

            let publish = entry.publish.as_ref().unwrap_or(&defaults.publish);
            for target in publish {
                if defaults.registries.repository(*target).is_none() {
                    return Err(ConfigError::MissingRegistry {
                        index,
                        short: entry.short.clone(),
                        target: *target,
                    });
                }
            }
        }

        Ok(())
    }
}
