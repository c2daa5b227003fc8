//! Orchestrates the hot path for one inbound request: authenticate →
//! normalize → route → translate request → connector → upstream →
//! translate response → usage commit → log finalize.
//!
//! `FinalizeGuard` is the deferred finalizer that makes "every terminal
//! path passes through `LOG_FINALIZED` exactly once" true regardless of
//! which path is taken, success, upstream error, client disconnect, or
//! panic unwind.

use std::{sync::Arc, time::Instant};

use arc_swap::ArcSwap;
use config::ConfigSnapshot;
use context::KeyContext;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::Value;
use telemetry::{KeyValue, attributes, metrics as metric_names};
use tokio::sync::mpsc;

use crate::{
    apikey::{ApiKeyService, UsageDelta},
    connector::{self, ConnectorRegistry, UpstreamCall},
    error::GatewayError,
    logger::{FinalizeUpdate, LogHeader, Logger, PayloadUpdate, TokenUpdate},
    model::{ClientProtocol, NormalizedPayload, RouteDecision, UpstreamType},
    router,
    tokens,
    tokens::tpot_ms,
    translate,
    translate::stream::StreamTranslator,
};

pub struct RequestHandler {
    config: Arc<ArcSwap<ConfigSnapshot>>,
    logger: Arc<dyn Logger>,
    api_keys: Arc<dyn ApiKeyService>,
}

fn record_duration_metric(provider: &str, model: &str, latency_ms: f64, status_code: u16) {
    let histogram = telemetry::meter().f64_histogram(metric_names::GEN_AI_CLIENT_OPERATION_DURATION).build();
    histogram.record(
        latency_ms / 1000.0,
        &[
            KeyValue::new(attributes::GEN_AI_PROVIDER_NAME, provider.to_string()),
            KeyValue::new(attributes::GEN_AI_REQUEST_MODEL, model.to_string()),
            KeyValue::new("http.response.status_code", status_code as i64),
        ],
    );
}

fn record_token_metric(provider: &str, model: &str, token_type: &'static str, count: u32) {
    if count == 0 {
        return;
    }
    let histogram = telemetry::meter().u64_histogram(metric_names::GEN_AI_CLIENT_TOKEN_USAGE).build();
    histogram.record(
        count as u64,
        &[
            KeyValue::new(attributes::GEN_AI_PROVIDER_NAME, provider.to_string()),
            KeyValue::new(attributes::GEN_AI_REQUEST_MODEL, model.to_string()),
            KeyValue::new(attributes::GEN_AI_TOKEN_TYPE, token_type),
        ],
    );
}

/// Ensures `Logger::finalize` runs exactly once per log record, even if the
/// handler returns early via `?` or panics. Committing consumes the guard
/// so a second finalize call is a compile error, not a runtime bug.
struct FinalizeGuard {
    logger: Arc<dyn Logger>,
    log_id: String,
    provider: String,
    model: String,
    started_at: Instant,
    committed: bool,
}

impl FinalizeGuard {
    fn new(logger: Arc<dyn Logger>, log_id: String, provider: String, model: String) -> Self {
        Self {
            logger,
            log_id,
            provider,
            model,
            started_at: Instant::now(),
            committed: false,
        }
    }

    async fn commit(mut self, status_code: u16, error: Option<String>) {
        self.committed = true;
        let latency_ms = self.started_at.elapsed().as_secs_f64() * 1000.0;
        record_duration_metric(&self.provider, &self.model, latency_ms, status_code);
        self.logger
            .finalize(&self.log_id, FinalizeUpdate { latency_ms, status_code, error })
            .await;
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let logger = self.logger.clone();
        let log_id = self.log_id.clone();
        let latency_ms = self.started_at.elapsed().as_secs_f64() * 1000.0;
        tokio::spawn(async move {
            logger
                .finalize(
                    &log_id,
                    FinalizeUpdate {
                        latency_ms,
                        status_code: 500,
                        error: Some("handler task ended without finalizing".to_string()),
                    },
                )
                .await;
        });
    }
}

pub struct RequestContext {
    pub endpoint: String,
    pub client_protocol: ClientProtocol,
    pub presented_token: Option<String>,
    pub forwarded_headers: Vec<(String, String)>,
}

pub struct NonStreamOutcome {
    pub status: u16,
    pub body: serde_json::Value,
}

impl RequestHandler {
    pub fn new(config: Arc<ArcSwap<ConfigSnapshot>>, logger: Arc<dyn Logger>, api_keys: Arc<dyn ApiKeyService>) -> Self {
        Self { config, logger, api_keys }
    }

    async fn authenticate(&self, ctx: &RequestContext) -> Result<KeyContext, GatewayError> {
        self.api_keys
            .resolve(ctx.presented_token.as_deref())
            .await
            .map_err(|_| GatewayError::InvalidApiKey)
    }

    /// Resolves a route against the current config snapshot, which is
    /// captured once here and used for this request's entire lifetime.
    /// A concurrent config reload can never change an in-flight route.
    fn route(&self, snapshot: &ConfigSnapshot, ctx: &RequestContext, payload: &NormalizedPayload) -> Result<RouteDecision, GatewayError> {
        let table = match ctx.endpoint.as_str() {
            "anthropic" => &snapshot.anthropic,
            "openai" => &snapshot.openai,
            custom => &snapshot
                .custom_endpoints
                .iter()
                .find(|e| e.path == custom)
                .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown endpoint '{custom}'")))?
                .routing,
        };

        let decision = router::resolve(table, payload)?;
        router::resolve_provider(snapshot, decision)
    }

    pub async fn handle_nonstream(
        &self,
        ctx: RequestContext,
        payload: NormalizedPayload,
    ) -> Result<NonStreamOutcome, GatewayError> {
        let key_context = self.authenticate(&ctx).await?;

        let snapshot = self.config.load_full();
        let decision = self.route(&snapshot, &ctx, &payload)?;
        let provider = ConnectorRegistry::new(&snapshot.providers).get(&decision.provider_id)?;

        let log_id = self
            .logger
            .create(LogHeader {
                endpoint: ctx.endpoint.clone(),
                provider: decision.provider_id.clone(),
                model: decision.upstream_model.clone(),
                client_model: payload.model.clone(),
                api_key_id: key_context.key_id.clone(),
                session_id: None,
                stream: false,
            })
            .await;
        let guard = FinalizeGuard::new(
            self.logger.clone(),
            log_id.clone(),
            decision.provider_id.clone(),
            decision.upstream_model.clone(),
        );

        let request_body = translate::request::build(&payload, &decision.upstream_model, decision.upstream_type);
        if snapshot.store_response_payloads {
            self.logger
                .upsert_payload(
                    &log_id,
                    PayloadUpdate {
                        prompt: Some(request_body.to_string()),
                        ..Default::default()
                    },
                )
                .await;
        }

        let result = self
            .run_nonstream_upstream(provider, &decision, request_body, &ctx, &payload)
            .await;

        match result {
            Ok((status, body, usage)) => {
                if snapshot.store_response_payloads {
                    self.logger
                        .upsert_payload(
                            &log_id,
                            PayloadUpdate {
                                response: Some(body.to_string()),
                                ..Default::default()
                            },
                        )
                        .await;
                }

                let tpot = tpot_ms(guard.started_at.elapsed().as_secs_f64() * 1000.0, None, usage.output_tokens, false);
                self.logger
                    .update_tokens(
                        &log_id,
                        TokenUpdate {
                            input_tokens: usage.input_tokens,
                            output_tokens: usage.output_tokens,
                            cached_read_tokens: usage.cache_read_input_tokens,
                            cached_creation_tokens: usage.cache_creation_input_tokens,
                            ttft_ms: None,
                            tpot_ms: tpot,
                        },
                    )
                    .await;

                self.api_keys
                    .record_usage(
                        &key_context.key_id,
                        UsageDelta {
                            input_tokens: usage.input_tokens,
                            output_tokens: usage.output_tokens,
                        },
                    )
                    .await;

                guard.commit(status, None).await;
                Ok(NonStreamOutcome { status, body })
            }
            Err(err) => {
                let status = err.status_code().as_u16();
                guard.commit(status, Some(err.client_message())).await;
                Err(err)
            }
        }
    }

    async fn run_nonstream_upstream(
        &self,
        provider: &config::ProviderConfig,
        decision: &RouteDecision,
        request_body: serde_json::Value,
        ctx: &RequestContext,
        _payload: &NormalizedPayload,
    ) -> Result<(u16, serde_json::Value, crate::model::Usage), GatewayError> {
        let reply = connector::send(
            provider,
            UpstreamCall {
                body: request_body,
                upstream_model: decision.upstream_model.clone(),
                stream: false,
                forwarded_headers: ctx.forwarded_headers.clone(),
            },
        )
        .await?;

        let status = reply.status;
        let raw_bytes = reply
            .body
            .bytes()
            .await
            .map_err(|e| GatewayError::UpstreamDecode(e.to_string()))?;

        if status >= 400 {
            let body_text = String::from_utf8_lossy(&raw_bytes).to_string();
            return Err(GatewayError::UpstreamStatus { status, body: body_text });
        }

        let upstream_body: serde_json::Value =
            serde_json::from_slice(&raw_bytes).map_err(|e| GatewayError::UpstreamDecode(e.to_string()))?;

        let client_body = translate::nonstream::translate(&upstream_body, ctx.client_protocol, decision.upstream_type)?;

        let usage = extract_usage(&upstream_body, decision.upstream_type).unwrap_or(crate::model::Usage {
            input_tokens: decision.token_estimate,
            ..Default::default()
        });

        Ok((status, client_body, usage))
    }
}

fn extract_usage(body: &serde_json::Value, upstream_type: UpstreamType) -> Option<crate::model::Usage> {
    let usage = body.get("usage")?;
    let as_u32 = |v: &Value| v.as_u64().map(|n| n as u32);
    let top_level_cached = body.get("cached_tokens").and_then(as_u32);

    Some(match upstream_type {
        UpstreamType::Anthropic => {
            let cached = tokens::resolve_cached_tokens(
                usage.get("cache_read_input_tokens").and_then(as_u32),
                usage.get("cache_creation_input_tokens").and_then(as_u32),
                None,
                None,
                top_level_cached,
            );
            crate::model::Usage {
                input_tokens: usage.get("input_tokens")?.as_u64()? as u32,
                output_tokens: usage.get("output_tokens")?.as_u64()? as u32,
                cache_read_input_tokens: cached.read,
                cache_creation_input_tokens: cached.creation,
            }
        }
        UpstreamType::OpenaiChat => {
            let cached = tokens::resolve_cached_tokens(
                None,
                None,
                usage.pointer("/prompt_tokens_details/cached_tokens").and_then(as_u32),
                None,
                top_level_cached,
            );
            crate::model::Usage {
                input_tokens: usage.get("prompt_tokens")?.as_u64()? as u32,
                output_tokens: usage.get("completion_tokens")?.as_u64()? as u32,
                cache_read_input_tokens: cached.read,
                cache_creation_input_tokens: cached.creation,
            }
        }
        UpstreamType::OpenaiResponses => {
            let cached = tokens::resolve_cached_tokens(
                None,
                None,
                None,
                usage.pointer("/input_tokens_details/cached_tokens").and_then(as_u32),
                top_level_cached,
            );
            crate::model::Usage {
                input_tokens: usage.get("input_tokens")?.as_u64()? as u32,
                output_tokens: usage.get("output_tokens")?.as_u64()? as u32,
                cache_read_input_tokens: cached.read,
                cache_creation_input_tokens: cached.creation,
            }
        }
    })
}

/// Frames a translator's JSON-encoded event as wire-ready SSE. Anthropic
/// clients need an `event: <type>` line derived from the payload's own
/// `"type"` field; OpenAI clients read bare `data:` lines. The `[DONE]`
/// terminal marker is not JSON and is never wrapped in an `event:` line.
fn format_sse_frame(client_protocol: ClientProtocol, payload: &str) -> String {
    if payload == "[DONE]" {
        return "data: [DONE]\n\n".to_string();
    }

    match client_protocol {
        ClientProtocol::Anthropic => {
            let event_type = serde_json::from_str::<Value>(payload)
                .ok()
                .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "message".to_string());
            format!("event: {event_type}\ndata: {payload}\n\n")
        }
        ClientProtocol::OpenaiChat | ClientProtocol::OpenaiResponses => format!("data: {payload}\n\n"),
    }
}

pub struct StreamOutcome {
    pub status: u16,
    /// Wire-ready SSE frames, already terminated with the blank line that
    /// ends an event. The axum layer turns this into a chunked body.
    pub frames: mpsc::Receiver<String>,
}

impl RequestHandler {
    pub async fn handle_stream(
        &self,
        ctx: RequestContext,
        payload: NormalizedPayload,
    ) -> Result<StreamOutcome, GatewayError> {
        let key_context = self.authenticate(&ctx).await?;

        let snapshot = self.config.load_full();
        let decision = self.route(&snapshot, &ctx, &payload)?;
        let provider = ConnectorRegistry::new(&snapshot.providers).get(&decision.provider_id)?.clone();

        let log_id = self
            .logger
            .create(LogHeader {
                endpoint: ctx.endpoint.clone(),
                provider: decision.provider_id.clone(),
                model: decision.upstream_model.clone(),
                client_model: payload.model.clone(),
                api_key_id: key_context.key_id.clone(),
                session_id: None,
                stream: true,
            })
            .await;
        let guard = FinalizeGuard::new(
            self.logger.clone(),
            log_id.clone(),
            decision.provider_id.clone(),
            decision.upstream_model.clone(),
        );

        let request_body = translate::request::build(&payload, &decision.upstream_model, decision.upstream_type);
        if snapshot.store_response_payloads {
            self.logger
                .upsert_payload(
                    &log_id,
                    PayloadUpdate {
                        prompt: Some(request_body.to_string()),
                        ..Default::default()
                    },
                )
                .await;
        }

        // Send and check the status before spawning anything: auth
        // failures, unreachable upstreams, and 4xx/5xx all surface as an
        // ordinary JSON error response rather than a broken SSE stream.
        let reply = match connector::send(
            &provider,
            UpstreamCall {
                body: request_body,
                upstream_model: decision.upstream_model.clone(),
                stream: true,
                forwarded_headers: ctx.forwarded_headers.clone(),
            },
        )
        .await
        {
            Ok(reply) => reply,
            Err(err) => {
                let status = err.status_code().as_u16();
                guard.commit(status, Some(err.client_message())).await;
                return Err(err);
            }
        };

        let status = reply.status;
        if status >= 400 {
            let raw_bytes = reply.body.bytes().await.unwrap_or_default();
            let body_text = String::from_utf8_lossy(&raw_bytes).to_string();
            guard.commit(status, Some(body_text.clone())).await;
            return Err(GatewayError::UpstreamStatus { status, body: body_text });
        }

        let (tx, rx) = mpsc::channel::<String>(64);
        let client_protocol = ctx.client_protocol;
        let api_keys = self.api_keys.clone();
        let key_id = key_context.key_id.clone();

        tokio::spawn(async move {
            let mut translator = StreamTranslator::new(client_protocol, decision.upstream_type, decision.upstream_model.clone());
            let mut event_stream = reply.body.bytes_stream().eventsource();
            let mut ttft_ms: Option<f64> = None;
            let mut client_gone = false;
            let mut any_bytes_sent = false;

            while let Some(frame) = event_stream.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("upstream event stream error: {e}");
                        break;
                    }
                };

                let data: Value = match serde_json::from_str(&frame.data) {
                    Ok(value) => value,
                    Err(_) => {
                        if frame.data.trim() == "[DONE]" {
                            break;
                        }
                        log::warn!("failed to decode upstream SSE payload, skipping frame");
                        continue;
                    }
                };

                let event_name = if frame.event.is_empty() { None } else { Some(frame.event.as_str()) };
                let step = translator.step(event_name, &data);

                if step.saw_first_token && ttft_ms.is_none() {
                    ttft_ms = Some(guard.started_at.elapsed().as_secs_f64() * 1000.0);
                }

                for event in step.events {
                    if tx.send(format_sse_frame(client_protocol, &event)).await.is_err() {
                        client_gone = true;
                        break;
                    }
                    any_bytes_sent = true;
                }

                if client_gone || step.terminal {
                    break;
                }
            }

            // A disconnect after bytes were already on the wire still needs
            // the trailing usage report; keep reading the upstream body
            // (without forwarding anything further) up to a bounded amount.
            // A disconnect before the first byte has nothing worth reading
            // for and is reported as a client-closed cancellation instead.
            if client_gone && any_bytes_sent {
                const DRAIN_LIMIT_BYTES: usize = 64 * 1024;
                let mut drained = 0usize;

                while drained < DRAIN_LIMIT_BYTES {
                    let Some(frame) = event_stream.next().await else { break };
                    let Ok(frame) = frame else { break };
                    drained += frame.data.len();

                    if let Ok(data) = serde_json::from_str::<Value>(&frame.data) {
                        let event_name = if frame.event.is_empty() { None } else { Some(frame.event.as_str()) };
                        translator.step(event_name, &data);
                    }
                }
            } else if !client_gone {
                for event in translator.terminal_events() {
                    if tx.send(format_sse_frame(client_protocol, &event)).await.is_err() {
                        client_gone = true;
                        break;
                    }
                    any_bytes_sent = true;
                }
            }

            let usage = translator.usage;
            let latency_ms = guard.started_at.elapsed().as_secs_f64() * 1000.0;
            let tpot = tpot_ms(latency_ms, ttft_ms, usage.output_tokens, false);

            guard
                .logger
                .update_tokens(
                    &log_id,
                    TokenUpdate {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        cached_read_tokens: usage.cache_read_input_tokens,
                        cached_creation_tokens: usage.cache_creation_input_tokens,
                        ttft_ms,
                        tpot_ms: tpot,
                    },
                )
                .await;

            api_keys
                .record_usage(
                    &key_id,
                    UsageDelta {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                    },
                )
                .await;

            record_token_metric(&guard.provider, &guard.model, "input", usage.input_tokens);
            record_token_metric(&guard.provider, &guard.model, "output", usage.output_tokens);

            if client_gone && !any_bytes_sent {
                guard.commit(499, Some("client closed".to_string())).await;
            } else {
                guard.commit(status, None).await;
            }
        });

        Ok(StreamOutcome { status, frames: rx })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extract_usage_anthropic_reads_cache_fields() {
        let body = json!({
            "usage": {
                "input_tokens": 10,
                "output_tokens": 5,
                "cache_read_input_tokens": 3,
                "cache_creation_input_tokens": 2,
            }
        });

        let usage = extract_usage(&body, UpstreamType::Anthropic).unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.cache_read_input_tokens, 3);
        assert_eq!(usage.cache_creation_input_tokens, 2);
    }

    #[test]
    fn extract_usage_falls_back_to_top_level_cached_tokens() {
        let body = json!({
            "cached_tokens": 9,
            "usage": { "input_tokens": 10, "output_tokens": 5 },
        });

        let usage = extract_usage(&body, UpstreamType::Anthropic).unwrap();
        assert_eq!(usage.cache_read_input_tokens, 9, "no anthropic cache fields, falls back to top-level");
        assert_eq!(usage.cache_creation_input_tokens, 0);
    }

    #[test]
    fn extract_usage_openai_chat_prefers_details_over_top_level() {
        let body = json!({
            "cached_tokens": 99,
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 5,
                "prompt_tokens_details": { "cached_tokens": 4 },
            },
        });

        let usage = extract_usage(&body, UpstreamType::OpenaiChat).unwrap();
        assert_eq!(usage.cache_read_input_tokens, 4);
    }
}
