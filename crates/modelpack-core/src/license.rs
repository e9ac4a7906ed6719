//! License classification.
//!
//! Decides whether a model's license permits embedding its weights in an
//! image. An identifier that cannot be determined is reported as
//! [`UNKNOWN_LICENSE`] and is never permissive.

use hub_metadata::MetadataSource;
use serde::{Deserialize, Serialize};

use crate::config::{normalize_spdx, Override, PermissiveWhitelist};

/// Reported identifier when no license could be determined.
pub const UNKNOWN_LICENSE: &str = "unknown";

/// Where the reported license identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseSource {
    /// `override_spdx` in the configuration
    Override,
    /// Declared by the model on the hub
    Remote,
    /// Nothing declared, or the lookup failed
    Unknown,
}

/// Classifier output for one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseDecision {
    /// Lower-cased SPDX identifier or [`UNKNOWN_LICENSE`]
    pub license_id: String,
    pub source: LicenseSource,
    pub is_permissive: bool,
    /// Set when a lookup degraded to the unknown default
    pub warning: Option<String>,
}

impl LicenseDecision {
    pub fn is_unknown(&self) -> bool {
        self.source == LicenseSource::Unknown
    }
}

/// Inputs to [`classify`] for one model.
#[derive(Debug, Clone, Copy)]
pub struct LicenseQuery<'a> {
    pub model_id: &'a str,
    pub revision: Option<&'a str>,
    pub override_spdx: Option<&'a str>,
    pub explicit_permissive: Override,
}

/// Resolve the license identifier and decide permissiveness.
///
/// - `override_spdx` beats the remote declaration.
/// - An explicit `permissive` setting is authoritative; the identifier is
///   still resolved for reporting.
/// - Under `auto`, the identifier is permissive iff it is in `whitelist`.
pub async fn classify(
    source: &dyn MetadataSource,
    query: LicenseQuery<'_>,
    whitelist: &PermissiveWhitelist,
) -> LicenseDecision {
    let (license_id, license_source, warning) = resolve_license_id(source, &query).await;

    let is_permissive = match query.explicit_permissive {
        Override::Explicit(value) => value,
        Override::Auto => {
            license_source != LicenseSource::Unknown && whitelist.contains(&license_id)
        }
    };

    LicenseDecision {
        license_id,
        source: license_source,
        is_permissive,
        warning,
    }
}

async fn resolve_license_id(
    source: &dyn MetadataSource,
    query: &LicenseQuery<'_>,
) -> (String, LicenseSource, Option<String>) {
    if let Some(id) = query.override_spdx.map(normalize_spdx).filter(|id| !id.is_empty()) {
        return (id, LicenseSource::Override, None);
    }

    match source.license(query.model_id, query.revision).await {
        Ok(Some(declared)) => {
            let id = normalize_spdx(&declared);
            if id.is_empty() || id == UNKNOWN_LICENSE {
                (
                    UNKNOWN_LICENSE.to_string(),
                    LicenseSource::Unknown,
                    Some(format!("{} declares an empty license", query.model_id)),
                )
            } else {
                (id, LicenseSource::Remote, None)
            }
        }
        Ok(None) => (
            UNKNOWN_LICENSE.to_string(),
            LicenseSource::Unknown,
            Some(format!("{} declares no license", query.model_id)),
        ),
        Err(err) => (
            UNKNOWN_LICENSE.to_string(),
            LicenseSource::Unknown,
            Some(format!("license lookup for {} failed: {}", query.model_id, err)),
        ),
    }
}
