//! Resolves `(endpoint, requested_model)` against a routing table into a
//! [`RouteDecision`].

use config::{ConfigSnapshot, RouteModel, RouteTarget, RoutingTable};

use crate::{
    error::GatewayError,
    model::{NormalizedPayload, RouteDecision, UpstreamType},
    tokens::estimate_tokens,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Background,
    Reasoning,
    Completion,
}

fn classify(table: &RoutingTable, payload: &NormalizedPayload) -> Category {
    let is_background = match &table.defaults.background_model_pattern {
        Some(pattern) => pattern.is_match(&payload.model),
        None => payload.model.to_lowercase().contains("haiku"),
    };

    let user_message_count = payload
        .messages
        .iter()
        .filter(|m| matches!(m.role, crate::model::Role::User))
        .count();

    if is_background && user_message_count <= 2 && !payload.has_tools() {
        return Category::Background;
    }

    let wants_thinking = payload.metadata.contains_key("thinking");
    if payload.has_tools() || wants_thinking {
        return Category::Reasoning;
    }

    Category::Completion
}

/// Resolve a route for `payload.model` against `table`, falling back to
/// category defaults when there is no literal `model_routes` entry. Exact
/// matches always win over defaults; defaults are only consulted when no
/// entry names `payload.model` verbatim.
pub fn resolve(table: &RoutingTable, payload: &NormalizedPayload) -> Result<RouteDecision, GatewayError> {
    let target = if let Some(target) = table.model_routes.get(&payload.model) {
        target.clone()
    } else {
        let category = classify(table, payload);
        let default = match category {
            Category::Background => &table.defaults.background,
            Category::Reasoning => &table.defaults.reasoning,
            Category::Completion => &table.defaults.completion,
        };

        default
            .clone()
            .ok_or_else(|| GatewayError::UnknownModel(payload.model.clone()))?
    };

    resolve_target(&target, payload)
}

fn resolve_target(target: &RouteTarget, payload: &NormalizedPayload) -> Result<RouteDecision, GatewayError> {
    let upstream_model = match &target.model {
        RouteModel::Named(model) => model.clone(),
        RouteModel::Passthrough => payload.model.clone(),
    };

    Ok(RouteDecision {
        provider_id: target.provider_id.clone(),
        upstream_model,
        // Filled in by `resolve_provider` once the provider registry is
        // consulted , a bare `RouteTarget` doesn't know the upstream's
        // wire type.
        upstream_type: UpstreamType::Anthropic,
        token_estimate: estimate_tokens(payload),
    })
}

/// Looks the decision's `provider_id` up in the snapshot's provider
/// registry, filling in `upstream_type` and surfacing `UnknownProvider`
/// when the route names a provider that no longer exists.
pub fn resolve_provider(snapshot: &ConfigSnapshot, mut decision: RouteDecision) -> Result<RouteDecision, GatewayError> {
    let provider = snapshot
        .provider(&decision.provider_id)
        .ok_or_else(|| GatewayError::UnknownProvider(decision.provider_id.clone()))?;

    decision.upstream_type = provider.upstream_type;
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use config::{RouteDefaults, RouteModel, RouteTarget, RoutingTable};

    use super::*;
    use crate::model::{ContentBlock, Message, NormalizedPayload, Role};

    fn payload(model: &str) -> NormalizedPayload {
        NormalizedPayload {
            model: model.to_string(),
            stream: false,
            messages: vec![Message {
                role: Role::User,
                content: vec![ContentBlock::Text("hi".into())],
            }],
            system: None,
            tools: Vec::new(),
            tool_choice: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: Vec::new(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn exact_match_wins_over_default() {
        let mut table = RoutingTable::default();
        table.model_routes.insert(
            "claude-sonnet-4-5-20250929".to_string(),
            RouteTarget {
                provider_id: "anthropic-prod".to_string(),
                model: RouteModel::Named("claude-sonnet-4-5-20250929".to_string()),
            },
        );
        table.defaults = RouteDefaults {
            completion: Some(RouteTarget {
                provider_id: "other".to_string(),
                model: RouteModel::Passthrough,
            }),
            ..Default::default()
        };

        let decision = resolve(&table, &payload("claude-sonnet-4-5-20250929")).unwrap();
        assert_eq!(decision.provider_id, "anthropic-prod");
    }

    #[test]
    fn passthrough_keeps_requested_model() {
        let mut table = RoutingTable::default();
        table.defaults.completion = Some(RouteTarget {
            provider_id: "anthropic-prod".to_string(),
            model: RouteModel::Passthrough,
        });

        let decision = resolve(&table, &payload("claude-opus-4")).unwrap();
        assert_eq!(decision.upstream_model, "claude-opus-4");
    }

    #[test]
    fn missing_default_is_unknown_model() {
        let table = RoutingTable::default();
        let err = resolve(&table, &payload("nope")).unwrap_err();
        assert!(matches!(err, GatewayError::UnknownModel(_)));
    }
}
