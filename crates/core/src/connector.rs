//! Per-provider HTTP sender: URL assembly, auth headers, streaming body
//! forwarding. One attempt only; a gateway doesn't retry on a caller's
//! behalf.

use std::{sync::OnceLock, time::Duration};

use config::{AuthMode, ProviderConfig};
use reqwest::{Client, Response};
use secrecy::ExposeSecret;
use serde_json::Value;

use crate::{error::GatewayError, translate::request::anthropic_beta_header};

fn default_http_client_builder() -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(Duration::from_secs(60))
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
}

/// Shared client, reused across requests to keep connections warm.
fn http_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| default_http_client_builder().build().expect("failed to build http client"))
        .clone()
}

pub struct UpstreamCall {
    pub body: Value,
    pub upstream_model: String,
    pub stream: bool,
    /// Headers forwarded verbatim from the client, already restricted to
    /// `anthropic-*` / `content-type` / `accept` by the caller.
    pub forwarded_headers: Vec<(String, String)>,
}

pub struct UpstreamReply {
    pub status: u16,
    pub body: Response,
}

/// Sends one upstream call for `provider` and returns the raw response for
/// the caller to either buffer or stream onward.
pub async fn send(provider: &ProviderConfig, call: UpstreamCall) -> Result<UpstreamReply, GatewayError> {
    let path = provider.upstream_type.default_path();
    let url = format!("{}{}", provider.base_url_trimmed(), path);

    let mut request = http_client().post(&url).json(&call.body);

    request = match provider.auth_mode {
        AuthMode::ApiKey => {
            let mut req = request.header("x-api-key", provider.secret.expose_secret());
            if !call.forwarded_headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("anthropic-version")) {
                req = req.header("anthropic-version", "2023-06-01");
            }
            req
        }
        AuthMode::Bearer => request.header("Authorization", format!("Bearer {}", provider.secret.expose_secret())),
    };

    if let Some(beta) = anthropic_beta_header(&call.upstream_model) {
        request = request.header("anthropic-beta", beta).query(&[("beta", "true")]);
    }

    for (name, value) in &call.forwarded_headers {
        request = request.header(name, value);
    }

    for rule in &provider.extra_headers {
        if !rule.can_override_auth && is_auth_header(&rule.name) {
            continue;
        }
        request = request.header(&rule.name, &rule.value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;

    Ok(UpstreamReply {
        status: response.status().as_u16(),
        body: response,
    })
}

fn is_auth_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case("x-api-key")
}

/// Narrow registry so the handler can look a connector target up by
/// `provider_id` without threading the whole config snapshot through every
/// call site.
pub struct ConnectorRegistry<'a> {
    providers: &'a [ProviderConfig],
}

impl<'a> ConnectorRegistry<'a> {
    pub fn new(providers: &'a [ProviderConfig]) -> Self {
        Self { providers }
    }

    pub fn get(&self, provider_id: &str) -> Result<&'a ProviderConfig, GatewayError> {
        self.providers
            .iter()
            .find(|p| p.id == provider_id)
            .ok_or_else(|| GatewayError::UnknownProvider(provider_id.to_string()))
    }
}
