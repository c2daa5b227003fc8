use std::collections::BTreeSet;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::header_rule::HeaderRule;

/// The wire protocol a configured upstream speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpstreamType {
    Anthropic,
    OpenaiChat,
    OpenaiResponses,
}

impl UpstreamType {
    /// Default request path for this upstream type, used unless the caller
    /// supplied an explicit path override.
    pub fn default_path(self) -> &'static str {
        match self {
            UpstreamType::Anthropic => "/v1/messages",
            UpstreamType::OpenaiChat => "/v1/chat/completions",
            UpstreamType::OpenaiResponses => "/v1/responses",
        }
    }
}

/// How the connector authenticates against the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    ApiKey,
    Bearer,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderConfigSerde {
    label: Option<String>,
    base_url: String,
    #[serde(rename = "type")]
    upstream_type: UpstreamType,
    auth_mode: AuthMode,
    secret: SecretString,
    #[serde(default)]
    default_model: Option<String>,
    #[serde(default)]
    models: BTreeSet<String>,
    #[serde(default)]
    extra_headers: Vec<HeaderRule>,
}

/// One configured upstream: URL, auth, protocol type and the model set it
/// is allowed to serve.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub id: String,
    pub label: String,
    pub base_url: String,
    pub upstream_type: UpstreamType,
    pub auth_mode: AuthMode,
    pub secret: SecretString,
    pub default_model: Option<String>,
    pub models: BTreeSet<String>,
    pub extra_headers: Vec<HeaderRule>,
}

impl ProviderConfig {
    /// `base_url` with any trailing slashes stripped, ready to have a path
    /// appended directly.
    pub fn base_url_trimmed(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Providers are declared as a map at the TOML level (`[llm.providers.id]`)
/// but carried internally as a `Vec` keyed by `id` for cheap iteration during
/// routing and connector-registry construction.
pub fn deserialize_providers<'de, D>(deserializer: D) -> Result<Vec<ProviderConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: std::collections::BTreeMap<String, ProviderConfigSerde> = Deserialize::deserialize(deserializer)?;

    Ok(raw
        .into_iter()
        .map(|(id, p)| ProviderConfig {
            label: p.label.unwrap_or_else(|| id.clone()),
            id,
            base_url: p.base_url,
            upstream_type: p.upstream_type,
            auth_mode: p.auth_mode,
            secret: p.secret,
            default_model: p.default_model,
            models: p.models,
            extra_headers: p.extra_headers,
        })
        .collect())
}
