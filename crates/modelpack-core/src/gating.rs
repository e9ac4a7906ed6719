//! Gating resolution.
//!
//! Fails closed: if the hub cannot say whether a model is gated, the model
//! is treated as gated and no fat image is built for it.

use hub_metadata::MetadataSource;
use serde::{Deserialize, Serialize};

use crate::config::Override;

/// How the gating answer was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatingSource {
    Explicit,
    Remote,
    /// Lookup failed; assumed gated
    FailClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatingDecision {
    pub is_gated: bool,
    pub source: GatingSource,
    pub warning: Option<String>,
}

/// Decide whether `model_id` is access-restricted.
pub async fn resolve_gating(
    source: &dyn MetadataSource,
    model_id: &str,
    revision: Option<&str>,
    explicit: Override,
) -> GatingDecision {
    if let Override::Explicit(is_gated) = explicit {
        return GatingDecision {
            is_gated,
            source: GatingSource::Explicit,
            warning: None,
        };
    }

    match source.gated(model_id, revision).await {
        Ok(is_gated) => GatingDecision {
            is_gated,
            source: GatingSource::Remote,
            warning: None,
        },
        Err(err) => GatingDecision {
            is_gated: true,
            source: GatingSource::FailClosed,
            warning: Some(format!(
                "gating lookup for {} failed, assuming gated: {}",
                model_id, err
            )),
        },
    }
}
