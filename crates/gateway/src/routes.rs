//! Axum wiring: one route per built-in endpoint, one per config-declared
//! custom endpoint, plus the model-listing endpoint. Request parsing,
//! dispatch to [`RequestHandler`] and SSE response framing all live here;
//! `core` stays transport-agnostic.

use std::{collections::BTreeMap, sync::Arc};

use arc_swap::ArcSwap;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{AUTHORIZATION, CACHE_CONTROL, CONNECTION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::{ConfigSnapshot, CustomEndpointConfig, EndpointKind};
use core::{
    apikey, error::GatewayError, handler::{RequestContext, RequestHandler, StreamOutcome}, messages, model::{ClientProtocol, NormalizedPayload}, normalize,
};
use serde_json::{Value, json};

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<RequestHandler>,
    pub config: Arc<ArcSwap<ConfigSnapshot>>,
}

pub fn build_router(state: AppState) -> Router {
    let mut app: Router<AppState> = Router::new()
        .route("/anthropic/v1/messages", post(anthropic_messages))
        .route("/openai/v1/chat/completions", post(openai_chat))
        .route("/openai/chat/completions", post(openai_chat))
        .route("/openai/v1/responses", post(openai_responses))
        .route("/openai/responses", post(openai_responses))
        .route("/openai/v1/models", get(list_models));

    // Custom endpoints are wired once at startup from the config the
    // process was started with; only provider/route data within the
    // snapshot hot-swaps, the set of bound paths does not.
    for endpoint in &state.config.load().custom_endpoints {
        app = app.merge(custom_endpoint_router(endpoint));
    }

    app.with_state(state)
}

fn custom_endpoint_router(endpoint: &CustomEndpointConfig) -> Router<AppState> {
    let route_path = endpoint.path.clone();
    let dispatch_path = endpoint.path.clone();
    let kind = endpoint.kind;

    Router::new().route(
        &route_path,
        post(move |State(state): State<AppState>, headers: HeaderMap, body: Bytes| {
            let endpoint = dispatch_path.clone();
            async move { dispatch(state, endpoint, kind, headers, body).await }
        }),
    )
}

async fn anthropic_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    dispatch(state, "anthropic".to_string(), EndpointKind::Anthropic, headers, body).await
}

async fn openai_chat(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, GatewayError> {
    dispatch(state, "openai".to_string(), EndpointKind::OpenaiChat, headers, body).await
}

async fn openai_responses(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    dispatch(state, "openai".to_string(), EndpointKind::OpenaiResponses, headers, body).await
}

/// Aggregates known models across configured providers into an
/// OpenAI-shaped model list.
async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.config.load();

    let mut owners: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for provider in &snapshot.providers {
        for model in &provider.models {
            owners.entry(model.as_str()).or_default().push(provider.id.as_str());
        }
    }

    let data: Vec<Value> = owners
        .into_iter()
        .map(|(model, providers)| {
            json!({
                "id": model,
                "object": "model",
                "owned_by": providers.first().copied().unwrap_or("cc-gw"),
                "metadata": { "providers": providers },
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data }))
}

/// Parses the raw body against `kind`'s wire shape and normalizes it.
/// `OpenaiAuto` sniffs the body itself: presence of `input` means
/// Responses, its absence means Chat Completions.
fn parse_payload(kind: EndpointKind, value: Value) -> Result<(ClientProtocol, NormalizedPayload), GatewayError> {
    match kind {
        EndpointKind::Anthropic => {
            let req: messages::anthropic::AnthropicRequest =
                serde_json::from_value(value).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
            Ok((ClientProtocol::Anthropic, normalize::from_anthropic(req)?))
        }
        EndpointKind::OpenaiChat => {
            let req: messages::openai_chat::ChatRequest =
                serde_json::from_value(value).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
            Ok((ClientProtocol::OpenaiChat, normalize::from_openai_chat(req)?))
        }
        EndpointKind::OpenaiResponses => {
            let req: messages::openai_responses::ResponsesRequest =
                serde_json::from_value(value).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
            Ok((ClientProtocol::OpenaiResponses, normalize::from_openai_responses(req)?))
        }
        EndpointKind::OpenaiAuto => {
            if value.get("input").is_some() {
                parse_payload(EndpointKind::OpenaiResponses, value)
            } else {
                parse_payload(EndpointKind::OpenaiChat, value)
            }
        }
    }
}

async fn dispatch(
    state: AppState,
    endpoint: String,
    kind: EndpointKind,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let value: Value =
        serde_json::from_slice(&body).map_err(|e| GatewayError::InvalidRequest(format!("invalid JSON body: {e}")))?;

    let (client_protocol, payload) = parse_payload(kind, value)?;
    let stream = payload.stream;

    let ctx = RequestContext {
        endpoint,
        client_protocol,
        presented_token: presented_token(&headers),
        forwarded_headers: forwarded_headers(&headers),
    };

    if stream {
        let outcome = state.handler.handle_stream(ctx, payload).await?;
        Ok(sse_response(outcome))
    } else {
        let outcome = state.handler.handle_nonstream(ctx, payload).await?;
        let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK);
        Ok((status, Json(outcome.body)).into_response())
    }
}

/// `Authorization: Bearer <token>` takes priority over `x-api-key`, matching
/// the order the spec's key-resolution step reads them in.
fn presented_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        return Some(apikey::strip_bearer_prefix(value).to_string());
    }
    headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn forwarded_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            name == "content-type" || name == "accept" || name.starts_with("anthropic-")
        })
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}

/// Wraps a [`StreamOutcome`]'s already-framed SSE lines in the response
/// headers the spec requires: buffering disabled end to end so the first
/// event reaches the client as soon as it's translated.
fn sse_response(outcome: StreamOutcome) -> Response {
    let stream = futures_util::stream::unfold(outcome.frames, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok::<_, std::convert::Infallible>(Bytes::from(frame)), rx))
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK);

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream; charset=utf-8"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no"));

    response
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    fn test_state(snapshot: ConfigSnapshot) -> AppState {
        let config = Arc::new(ArcSwap::new(Arc::new(snapshot)));
        let api_keys: Arc<dyn apikey::ApiKeyService> = Arc::new(store::InMemoryApiKeyService::new(true));
        let logger: Arc<dyn core::logger::Logger> = store::InMemoryLogger::new();
        let handler = Arc::new(RequestHandler::new(config.clone(), logger, api_keys));
        AppState { handler, config }
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = build_router(test_state(ConfigSnapshot::default()));

        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_json_body_is_rejected() {
        let app = build_router(test_state(ConfigSnapshot::default()));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/anthropic/v1/messages")
                    .header("content-type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_models_aggregates_across_providers() {
        let toml = indoc::indoc! {r#"
            [providers.anthropic-prod]
            base_url = "https://api.anthropic.com"
            type = "anthropic"
            auth_mode = "api-key"
            secret = "sk-test"
            models = ["claude-sonnet-4-5-20250929"]

            [providers.openai-prod]
            base_url = "https://api.openai.com"
            type = "openai-chat"
            auth_mode = "bearer"
            secret = "sk-test-2"
            models = ["claude-sonnet-4-5-20250929", "gpt-4.1"]
        "#};
        let snapshot: ConfigSnapshot = toml::from_str(toml).unwrap();
        let app = build_router(test_state(snapshot));

        let response = app
            .oneshot(Request::builder().uri("/openai/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();

        let data = value["data"].as_array().unwrap();
        assert_eq!(data.len(), 2, "two distinct model ids across providers");

        let sonnet = data.iter().find(|m| m["id"] == "claude-sonnet-4-5-20250929").unwrap();
        let providers = sonnet["metadata"]["providers"].as_array().unwrap();
        assert_eq!(providers.len(), 2, "shared model is listed under both providers");
    }
}
