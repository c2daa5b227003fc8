use serde::Deserialize;

/// One entry of a connector's `extra_headers` / `headers` list.
///
/// Applied in declaration order after the connector's own auth header, so a
/// rule can only override auth when the provider config says so explicitly
/// (`can_override_auth`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderRule {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub can_override_auth: bool,
}
