use serde::Deserialize;

use crate::{
    endpoints::CustomEndpointConfig,
    providers::{ProviderConfig, deserialize_providers},
    routing::RoutingTable,
};

fn default_max_request_body_bytes() -> usize {
    10 * 1024 * 1024
}

/// Immutable, atomically-swappable view of providers, routes, presets and
/// feature flags. One snapshot is captured per in-flight request at the top
/// of the handler; a config reload never changes the route an in-flight
/// request resolves to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigSnapshot {
    #[serde(deserialize_with = "deserialize_providers")]
    pub providers: Vec<ProviderConfig>,
    pub anthropic: RoutingTable,
    pub openai: RoutingTable,
    #[serde(default)]
    pub custom_endpoints: Vec<CustomEndpointConfig>,
    pub wildcard_key_enabled: bool,
    pub store_response_payloads: bool,
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            anthropic: RoutingTable::default(),
            openai: RoutingTable::default(),
            custom_endpoints: Vec::new(),
            wildcard_key_enabled: false,
            store_response_payloads: false,
            max_request_body_bytes: default_max_request_body_bytes(),
        }
    }
}

impl ConfigSnapshot {
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use super::ConfigSnapshot;

    #[test]
    fn defaults_from_empty_toml() {
        let snapshot: ConfigSnapshot = toml::from_str("").unwrap();

        assert_debug_snapshot!(&snapshot, @r#"
        ConfigSnapshot {
            providers: [],
            anthropic: RoutingTable {
                defaults: RouteDefaults {
                    completion: None,
                    reasoning: None,
                    background: None,
                    background_model_pattern: None,
                },
                model_routes: {},
            },
            openai: RoutingTable {
                defaults: RouteDefaults {
                    completion: None,
                    reasoning: None,
                    background: None,
                    background_model_pattern: None,
                },
                model_routes: {},
            },
            custom_endpoints: [],
            wildcard_key_enabled: false,
            store_response_payloads: false,
            max_request_body_bytes: 10485760,
        }
        "#);
    }

    #[test]
    fn one_provider_and_route() {
        let toml = indoc::indoc! {r#"
            wildcard_key_enabled = true

            [providers.anthropic-prod]
            base_url = "https://api.anthropic.com"
            type = "anthropic"
            auth_mode = "api-key"
            secret = "sk-test"

            [anthropic.model_routes]
            "claude-sonnet-4-5-20250929" = "anthropic-prod:claude-sonnet-4-5-20250929"
        "#};

        let snapshot: ConfigSnapshot = toml::from_str(toml).unwrap();

        assert_eq!(snapshot.providers.len(), 1);
        assert_eq!(snapshot.providers[0].id, "anthropic-prod");
        assert!(snapshot.wildcard_key_enabled);
        assert_eq!(snapshot.anthropic.model_routes.len(), 1);
    }
}
