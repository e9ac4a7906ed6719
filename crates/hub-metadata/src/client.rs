//! HTTP client for a Hugging Face compatible model hub.
//!
//! Uses two endpoints:
//! - `GET {endpoint}/api/models/{id}[/revision/{rev}]` for model info
//! - `GET {endpoint}/{id}/resolve/{rev}/{file}` for raw repository files
//!
//! License, gating and revision all come from the same model-info response,
//! which the client keeps per (model, revision) for its lifetime. Build one
//! client per run.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{LookupKey, Memo};
use crate::error::HubError;
use crate::{MetadataSource, Result};

/// Public hub endpoint used when `HF_ENDPOINT` is unset.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Hub client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Base URL of the hub
    pub endpoint: String,
    /// Bearer token (optional, required for gated files)
    pub token: Option<String>,
}

impl HubConfig {
    /// Create config for a specific endpoint
    pub fn new(endpoint: &str) -> Self {
        HubConfig {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

/// Model info as returned by the hub API. Only the fields modelpack reads.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ModelInfo {
    pub sha: Option<String>,
    pub gated: Option<GatedField>,
    #[serde(rename = "cardData")]
    pub card_data: Option<CardData>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `gated` is `false`, or the approval mode (`"auto"`, `"manual"`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum GatedField {
    Flag(bool),
    Mode(String),
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CardData {
    pub license: Option<LicenseField>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum LicenseField {
    One(String),
    Many(Vec<String>),
}

impl ModelInfo {
    /// Declared license: model card first, then `license:` tags.
    pub(crate) fn declared_license(&self) -> Option<String> {
        let from_card = self
            .card_data
            .as_ref()
            .and_then(|c| c.license.as_ref())
            .and_then(|l| match l {
                LicenseField::One(s) => Some(s.clone()),
                LicenseField::Many(v) => v.first().cloned(),
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        from_card.or_else(|| {
            self.tags
                .iter()
                .find_map(|t| t.strip_prefix("license:"))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
    }

    /// Gating status. A response without the field is treated as a failed
    /// lookup so the caller falls back to "gated".
    pub(crate) fn is_gated(&self) -> Result<bool> {
        match &self.gated {
            Some(GatedField::Flag(flag)) => Ok(*flag),
            Some(GatedField::Mode(mode)) => Ok(!mode.eq_ignore_ascii_case("false")),
            None => Err(HubError::Decode(
                "model info has no `gated` field".to_string(),
            )),
        }
    }
}

/// Hub client for metadata queries
pub struct HubClient {
    config: HubConfig,
    http_client: reqwest::Client,
    infos: Memo<LookupKey, ModelInfo>,
}

impl HubClient {
    /// Create a new hub client
    pub fn new(config: HubConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("modelpack-hub-metadata/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(HubClient {
            config,
            http_client,
            infos: Memo::default(),
        })
    }

    fn model_info_url(&self, model_id: &str, revision: Option<&str>) -> String {
        match revision {
            Some(rev) => format!(
                "{}/api/models/{}/revision/{}",
                self.config.endpoint, model_id, rev
            ),
            None => format!("{}/api/models/{}", self.config.endpoint, model_id),
        }
    }

    fn file_url(&self, model_id: &str, revision: Option<&str>, filename: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.config.endpoint,
            model_id,
            revision.unwrap_or("main"),
            filename
        )
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.http_client.get(url);
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Model info for one (model, revision), queried at most once while it
    /// succeeds. Failures are not kept, so a retry reaches the hub again.
    pub(crate) async fn model_info(
        &self,
        model_id: &str,
        revision: Option<&str>,
    ) -> Result<ModelInfo> {
        let slot = self.infos.slot(LookupKey::new(model_id, revision));
        let info = slot
            .get_or_try_init(|| self.query_model_info(model_id, revision))
            .await?
            .clone();

        // The default-branch answer also describes the commit it points at.
        if revision.is_none() {
            if let Some(sha) = info.sha.as_deref().filter(|s| !s.is_empty()) {
                let _ = self
                    .infos
                    .slot(LookupKey::new(model_id, Some(sha)))
                    .set(info.clone());
            }
        }
        Ok(info)
    }

    async fn query_model_info(&self, model_id: &str, revision: Option<&str>) -> Result<ModelInfo> {
        let url = self.model_info_url(model_id, revision);
        debug!(url = %url, "querying model info");

        let response = self.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HubError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl MetadataSource for HubClient {
    async fn resolve_revision(&self, model_id: &str) -> Result<String> {
        self.model_info(model_id, None)
            .await?
            .sha
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HubError::Decode(format!("model info for {} has no sha", model_id)))
    }

    async fn license(&self, model_id: &str, revision: Option<&str>) -> Result<Option<String>> {
        Ok(self.model_info(model_id, revision).await?.declared_license())
    }

    async fn gated(&self, model_id: &str, revision: Option<&str>) -> Result<bool> {
        self.model_info(model_id, revision).await?.is_gated()
    }

    async fn fetch_file(
        &self,
        model_id: &str,
        revision: Option<&str>,
        filename: &str,
    ) -> Result<Option<String>> {
        let url = self.file_url(model_id, revision, filename);
        debug!(url = %url, "fetching repository file");

        let response = self.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.text().await?)),
            status => Err(HubError::Status {
                url,
                status: status.as_u16(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ModelInfo {
        serde_json::from_str(json).expect("parse model info")
    }

    #[test]
    fn test_license_from_card_data() {
        let info = parse(r#"{"sha":"abc","gated":false,"cardData":{"license":"Apache-2.0"}}"#);
        assert_eq!(info.declared_license().as_deref(), Some("Apache-2.0"));
    }

    #[test]
    fn test_license_list_takes_first() {
        let info = parse(r#"{"gated":false,"cardData":{"license":["mit","apache-2.0"]}}"#);
        assert_eq!(info.declared_license().as_deref(), Some("mit"));
    }

    #[test]
    fn test_license_falls_back_to_tags() {
        let info = parse(r#"{"gated":false,"tags":["gguf","license:bsd-3-clause"]}"#);
        assert_eq!(info.declared_license().as_deref(), Some("bsd-3-clause"));
    }

    #[test]
    fn test_no_license_declared() {
        let info = parse(r#"{"gated":false,"cardData":{},"tags":["gguf"]}"#);
        assert_eq!(info.declared_license(), None);
    }

    #[test]
    fn test_gated_modes() {
        assert_eq!(parse(r#"{"gated":false}"#).is_gated(), Ok(false));
        assert_eq!(parse(r#"{"gated":true}"#).is_gated(), Ok(true));
        assert_eq!(parse(r#"{"gated":"auto"}"#).is_gated(), Ok(true));
        assert_eq!(parse(r#"{"gated":"manual"}"#).is_gated(), Ok(true));
    }

    #[test]
    fn test_missing_gated_field_is_error() {
        assert!(parse(r#"{"sha":"abc"}"#).is_gated().is_err());
    }

    #[test]
    fn test_urls() {
        let client = HubClient::new(HubConfig::new("https://hub.example/")).unwrap();
        assert_eq!(
            client.model_info_url("org/m1", None),
            "https://hub.example/api/models/org/m1"
        );
        assert_eq!(
            client.model_info_url("org/m1", Some("abc")),
            "https://hub.example/api/models/org/m1/revision/abc"
        );
        assert_eq!(
            client.file_url("org/m1", None, "LICENSE"),
            "https://hub.example/org/m1/resolve/main/LICENSE"
        );
        assert_eq!(
            client.file_url("org/m1", Some("abc"), "NOTICE"),
            "https://hub.example/org/m1/resolve/abc/NOTICE"
        );
    }
}
