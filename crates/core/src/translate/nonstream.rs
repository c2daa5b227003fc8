//! Translates a buffered, non-streaming upstream reply into the client's
//! expected wire shape.

use serde_json::Value;

use crate::{
    error::GatewayError,
    messages::{anthropic, openai_chat, openai_responses},
    model::{ClientProtocol, UpstreamType},
};

/// Anthropic `stop_reason` → OpenAI chat `finish_reason` / Responses
/// `status`.
fn stop_reason_to_chat_finish(stop_reason: &str) -> &'static str {
    match stop_reason {
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        _ => "stop",
    }
}

fn stop_reason_to_responses_status(stop_reason: &str) -> &'static str {
    match stop_reason {
        "tool_use" => "requires_action",
        "max_tokens" | "stop_sequence" => "incomplete",
        _ => "completed",
    }
}

fn chat_finish_to_stop_reason(finish_reason: &str) -> &'static str {
    match finish_reason {
        "tool_calls" => "tool_use",
        "length" => "max_tokens",
        _ => "end_turn",
    }
}

/// `client_protocol` is the shape the inbound caller expects back;
/// `upstream_type` is what actually answered. When they match, the body is
/// forwarded unchanged by the caller before this function is ever called;
/// this function only runs the cross-protocol paths.
pub fn translate(body: &Value, client_protocol: ClientProtocol, upstream_type: UpstreamType) -> Result<Value, GatewayError> {
    match (upstream_type, client_protocol) {
        (UpstreamType::Anthropic, ClientProtocol::OpenaiChat) => anthropic_to_chat(body),
        (UpstreamType::Anthropic, ClientProtocol::OpenaiResponses) => anthropic_to_responses(body),
        (UpstreamType::OpenaiChat, ClientProtocol::Anthropic) => chat_to_anthropic(body),
        (UpstreamType::OpenaiResponses, ClientProtocol::Anthropic) => responses_to_anthropic(body),
        (UpstreamType::OpenaiChat, ClientProtocol::OpenaiResponses) => chat_to_responses(body),
        (UpstreamType::OpenaiResponses, ClientProtocol::OpenaiChat) => responses_to_chat(body),
        _ => Ok(body.clone()),
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &Value) -> Result<T, GatewayError> {
    serde_json::from_value(body.clone()).map_err(|e| GatewayError::UpstreamDecode(e.to_string()))
}

fn anthropic_to_chat(body: &Value) -> Result<Value, GatewayError> {
    let reply: anthropic::AnthropicUpstreamResponse = decode(body)?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in &reply.content {
        match block {
            anthropic::AnthropicContentBlock::Text { text: t } => text.push_str(t),
            anthropic::AnthropicContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(openai_chat::ChatResponseToolCall {
                    id: id.clone(),
                    kind: "function",
                    function: openai_chat::ChatResponseFunctionCall {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                });
            }
            _ => {}
        }
    }

    let finish_reason = reply.stop_reason.as_deref().map(stop_reason_to_chat_finish).unwrap_or("stop");

    let response = openai_chat::ChatResponse {
        id: reply.id,
        object: "chat.completion",
        model: reply.model,
        choices: vec![openai_chat::ChatChoice {
            index: 0,
            message: openai_chat::ChatResponseMessage {
                role: "assistant",
                content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
                tool_calls,
            },
            finish_reason,
        }],
        usage: openai_chat::ChatUsage {
            prompt_tokens: reply.usage.input_tokens,
            completion_tokens: reply.usage.output_tokens,
            total_tokens: reply.usage.input_tokens + reply.usage.output_tokens,
            prompt_tokens_details: Some(openai_chat::ChatPromptTokensDetails {
                cached_tokens: reply.usage.cache_read_input_tokens,
            }),
        },
    };

    serde_json::to_value(response).map_err(|e| GatewayError::Internal(e.to_string()))
}

fn anthropic_to_responses(body: &Value) -> Result<Value, GatewayError> {
    let reply: anthropic::AnthropicUpstreamResponse = decode(body)?;

    let mut output = Vec::new();
    let mut content_parts = Vec::new();
    for block in &reply.content {
        match block {
            anthropic::AnthropicContentBlock::Text { text } => {
                content_parts.push(openai_responses::ResponsesContentPart::OutputText { text: text.clone() });
            }
            anthropic::AnthropicContentBlock::ToolUse { id, name, input } => {
                output.push(openai_responses::ResponsesOutputItem::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
            }
            _ => {}
        }
    }
    if !content_parts.is_empty() {
        output.insert(0, openai_responses::ResponsesOutputItem::OutputMessage { content: content_parts });
    }

    let status = reply.stop_reason.as_deref().map(stop_reason_to_responses_status).unwrap_or("completed");

    let response = openai_responses::ResponsesResponse {
        id: reply.id,
        object: "response",
        model: reply.model,
        status,
        output,
        usage: openai_responses::ResponsesUsage {
            input_tokens: reply.usage.input_tokens,
            output_tokens: reply.usage.output_tokens,
            input_tokens_details: Some(openai_responses::ResponsesInputTokensDetails {
                cached_tokens: reply.usage.cache_read_input_tokens,
            }),
        },
    };

    serde_json::to_value(response).map_err(|e| GatewayError::Internal(e.to_string()))
}

fn chat_to_anthropic(body: &Value) -> Result<Value, GatewayError> {
    let reply: openai_chat::ChatUpstreamResponse = decode(body)?;
    let choice = reply
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::UpstreamDecode("missing choices[0]".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content {
        if !text.is_empty() {
            content.push(anthropic::AnthropicContentBlock::Text { text });
        }
    }
    for call in choice.message.tool_calls {
        let input = serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
        content.push(anthropic::AnthropicContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }

    let stop_reason = choice.finish_reason.as_deref().map(chat_finish_to_stop_reason).unwrap_or("end_turn");

    let response = anthropic::AnthropicResponse {
        id: reply.id,
        kind: "message",
        role: "assistant",
        model: reply.model,
        content,
        stop_reason,
        stop_sequence: None,
        usage: anthropic::AnthropicUsage {
            input_tokens: reply.usage.prompt_tokens,
            output_tokens: reply.usage.completion_tokens,
            cache_read_input_tokens: reply.usage.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
            cache_creation_input_tokens: 0,
        },
    };

    serde_json::to_value(response).map_err(|e| GatewayError::Internal(e.to_string()))
}

fn responses_to_anthropic(body: &Value) -> Result<Value, GatewayError> {
    let reply: openai_responses::ResponsesUpstreamResponse = decode(body)?;

    let mut content = Vec::new();
    for item in reply.output {
        match item {
            openai_responses::ResponsesItem::Message { content: parts, .. } => {
                for part in parts {
                    if let openai_responses::ResponsesContentPart::OutputText { text } = part {
                        content.push(anthropic::AnthropicContentBlock::Text { text });
                    }
                }
            }
            openai_responses::ResponsesItem::OutputText { text } => {
                content.push(anthropic::AnthropicContentBlock::Text { text });
            }
            openai_responses::ResponsesItem::ToolUse { id, name, input } => {
                content.push(anthropic::AnthropicContentBlock::ToolUse { id, name, input });
            }
            _ => {}
        }
    }

    let stop_reason = match reply.status.as_deref() {
        Some("requires_action") => "tool_use",
        Some("incomplete") => "max_tokens",
        _ => "end_turn",
    };

    let response = anthropic::AnthropicResponse {
        id: reply.id,
        kind: "message",
        role: "assistant",
        model: reply.model,
        content,
        stop_reason,
        stop_sequence: None,
        usage: anthropic::AnthropicUsage {
            input_tokens: reply.usage.input_tokens,
            output_tokens: reply.usage.output_tokens,
            cache_read_input_tokens: reply.usage.input_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
            cache_creation_input_tokens: 0,
        },
    };

    serde_json::to_value(response).map_err(|e| GatewayError::Internal(e.to_string()))
}

fn chat_to_responses(body: &Value) -> Result<Value, GatewayError> {
    let reply: openai_chat::ChatUpstreamResponse = decode(body)?;
    let choice = reply
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::UpstreamDecode("missing choices[0]".to_string()))?;

    let mut output = Vec::new();
    if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
        output.push(openai_responses::ResponsesOutputItem::OutputMessage {
            content: vec![openai_responses::ResponsesContentPart::OutputText { text }],
        });
    }
    for call in choice.message.tool_calls {
        let input = serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
        output.push(openai_responses::ResponsesOutputItem::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }

    let status = match choice.finish_reason.as_deref() {
        Some("tool_calls") => "requires_action",
        Some("length") => "incomplete",
        _ => "completed",
    };

    let response = openai_responses::ResponsesResponse {
        id: reply.id,
        object: "response",
        model: reply.model,
        status,
        output,
        usage: openai_responses::ResponsesUsage {
            input_tokens: reply.usage.prompt_tokens,
            output_tokens: reply.usage.completion_tokens,
            input_tokens_details: Some(openai_responses::ResponsesInputTokensDetails {
                cached_tokens: reply.usage.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
            }),
        },
    };

    serde_json::to_value(response).map_err(|e| GatewayError::Internal(e.to_string()))
}

fn responses_to_chat(body: &Value) -> Result<Value, GatewayError> {
    let reply: openai_responses::ResponsesUpstreamResponse = decode(body)?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for item in reply.output {
        match item {
            openai_responses::ResponsesItem::Message { content: parts, .. } => {
                for part in parts {
                    if let openai_responses::ResponsesContentPart::OutputText { text: t } = part {
                        text.push_str(&t);
                    }
                }
            }
            openai_responses::ResponsesItem::OutputText { text: t } => text.push_str(&t),
            openai_responses::ResponsesItem::ToolUse { id, name, input } => {
                tool_calls.push(openai_chat::ChatResponseToolCall {
                    id,
                    kind: "function",
                    function: openai_chat::ChatResponseFunctionCall {
                        name,
                        arguments: input.to_string(),
                    },
                });
            }
            _ => {}
        }
    }

    let finish_reason = match reply.status.as_deref() {
        Some("requires_action") => "tool_calls",
        Some("incomplete") => "length",
        _ => "stop",
    };

    let response = openai_chat::ChatResponse {
        id: reply.id,
        object: "chat.completion",
        model: reply.model,
        choices: vec![openai_chat::ChatChoice {
            index: 0,
            message: openai_chat::ChatResponseMessage {
                role: "assistant",
                content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
                tool_calls,
            },
            finish_reason,
        }],
        usage: openai_chat::ChatUsage {
            prompt_tokens: reply.usage.input_tokens,
            completion_tokens: reply.usage.output_tokens,
            total_tokens: reply.usage.input_tokens + reply.usage.output_tokens,
            prompt_tokens_details: Some(openai_chat::ChatPromptTokensDetails {
                cached_tokens: reply.usage.input_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
            }),
        },
    };

    serde_json::to_value(response).map_err(|e| GatewayError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn anthropic_to_chat_maps_stop_reason_and_usage() {
        let body = json!({
            "id": "msg_1",
            "model": "claude-sonnet-4-5",
            "content": [{ "type": "text", "text": "yo" }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 5, "output_tokens": 1 },
        });

        let translated = anthropic_to_chat(&body).unwrap();
        assert_eq!(translated["choices"][0]["message"]["content"], "yo");
        assert_eq!(translated["choices"][0]["finish_reason"], "stop");
        assert_eq!(translated["usage"]["total_tokens"], 6);
    }

    #[test]
    fn chat_to_anthropic_maps_tool_calls_finish_reason() {
        let body = json!({
            "id": "chatcmpl_1",
            "model": "gpt-4o-mini",
            "choices": [{
                "message": { "content": null, "tool_calls": [{
                    "id": "call_1", "function": { "name": "weather", "arguments": "{\"location\":\"Paris\"}" },
                }] },
                "finish_reason": "tool_calls",
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14 },
        });

        let translated = chat_to_anthropic(&body).unwrap();
        assert_eq!(translated["stop_reason"], "tool_use");
        assert_eq!(translated["content"][0]["type"], "tool_use");
        assert_eq!(translated["content"][0]["name"], "weather");
    }
}
