use serde::Deserialize;

use crate::routing::RoutingTable;

/// One of the wire shapes a bound path accepts. `OpenaiAuto` defers the
/// choice to request-body sniffing: presence of `input` means Responses,
/// otherwise Chat Completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointKind {
    Anthropic,
    OpenaiChat,
    OpenaiResponses,
    OpenaiAuto,
}

/// An additional HTTP path declared in config, beyond the four built-in
/// endpoints. Carries its own routing table so a custom endpoint can route
/// to a different provider set than the defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomEndpointConfig {
    pub path: String,
    pub kind: EndpointKind,
    #[serde(default)]
    pub routing: RoutingTable,
}
