use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Deserializer};

/// A parsed `model_routes` target: `"providerId:modelId"` or
/// `"providerId:*"` (passthrough, keep the client's requested model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub provider_id: String,
    pub model: RouteModel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteModel {
    Named(String),
    Passthrough,
}

impl RouteTarget {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (provider_id, model) = raw
            .split_once(':')
            .ok_or_else(|| format!("route target '{raw}' must be of the form providerId:modelId"))?;

        if provider_id.is_empty() {
            return Err(format!("route target '{raw}' has an empty provider id"));
        }

        let model = if model == "*" {
            RouteModel::Passthrough
        } else {
            RouteModel::Named(model.to_string())
        };

        Ok(RouteTarget {
            provider_id: provider_id.to_string(),
            model,
        })
    }
}

impl<'de> Deserialize<'de> for RouteTarget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        RouteTarget::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Category defaults used when `requested_model` has no literal entry in
/// `model_routes`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteDefaults {
    pub completion: Option<RouteTarget>,
    pub reasoning: Option<RouteTarget>,
    pub background: Option<RouteTarget>,
    /// Overrides the built-in `haiku`-substring heuristic for classifying a
    /// request as `background`.
    #[serde(deserialize_with = "deserialize_optional_regex")]
    pub background_model_pattern: Option<Regex>,
}

fn deserialize_optional_regex<'de, D>(deserializer: D) -> Result<Option<Regex>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Deserialize::deserialize(deserializer)?;
    raw.map(|pattern| Regex::new(&pattern).map_err(serde::de::Error::custom))
        .transpose()
}

/// Per-endpoint routing table: explicit model routes plus category
/// defaults. The tie-break rule (explicit routes win over defaults, exact
/// match wins over wildcard) is implemented by `resolve` in the core
/// crate's router module, not here, this type only carries data.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingTable {
    pub defaults: RouteDefaults,
    pub model_routes: BTreeMap<String, RouteTarget>,
}
