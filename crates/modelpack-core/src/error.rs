//! Error taxonomy for modelpack.
//!
//! Only configuration and filesystem problems are errors. Remote lookup
//! failures never surface here: they are absorbed into conservative
//! decisions and reported as job warnings.

use std::path::PathBuf;

use crate::config::PublishTarget;

/// Problems with the configuration document. Fatal, raised before any
/// remote call is made.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(String),

    #[error("defaults.{field} must not be empty")]
    EmptyDefault { field: &'static str },

    #[error("models[{index}]: field `{field}` must not be empty")]
    EmptyField { index: usize, field: &'static str },

    #[error("models[{index}] ({id}): short name '{short}' is not kebab-case")]
    InvalidShort {
        index: usize,
        id: String,
        short: String,
    },

    #[error("duplicate short name '{short}' in models[{first}] and models[{second}]")]
    DuplicateShort {
        short: String,
        first: usize,
        second: usize,
    },

    #[error("duplicate model id '{id}' in models[{first}] and models[{second}]")]
    DuplicateId {
        id: String,
        first: usize,
        second: usize,
    },

    #[error("models[{index}] ({short}): publish target '{target}' has no registry configured")]
    MissingRegistry {
        index: usize,
        short: String,
        target: PublishTarget,
    },

    #[error("whitelisted license '{id}' has no vendored license text")]
    UnvendoredLicense { id: String },

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

/// Local filesystem failures while writing a license bundle.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("cannot write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize harvest manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Top-level error for library callers.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Harvest(#[from] HarvestError),
}

/// Result type for modelpack operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
