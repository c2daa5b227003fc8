//! Builds an upstream request body from a [`NormalizedPayload`], in the
//! shape the routed provider's wire type expects.

use serde_json::{Value, json};

use crate::model::{ContentBlock, ImageSource, Message, NormalizedPayload, Role, ToolChoice, UpstreamType};

/// Model families known to support fine-grained tool-call streaming on
/// Anthropic; matched as a substring against the upstream model id.
const FINE_GRAINED_TOOL_STREAMING_FAMILIES: [&str; 2] = ["sonnet-4-5", "haiku-4-5"];

/// Resolves the `anthropic-beta` header value for a routed Anthropic
/// model, if any. Per-model env override wins over the global env
/// override, which wins over the built-in family-name preset.
pub fn anthropic_beta_header(upstream_model: &str) -> Option<String> {
    let model_key = upstream_model.to_uppercase().replace(['-', '.'], "_");
    if let Ok(value) = std::env::var(format!("CC_GW_ANTHROPIC_BETA_{model_key}")) {
        return Some(value);
    }

    if let Ok(value) = std::env::var("CC_GW_ANTHROPIC_BETA_ALL") {
        return Some(value);
    }

    FINE_GRAINED_TOOL_STREAMING_FAMILIES
        .iter()
        .any(|family| upstream_model.contains(family))
        .then(|| "fine-grained-tool-streaming-2025-05-14".to_string())
}

pub fn build(payload: &NormalizedPayload, upstream_model: &str, upstream_type: UpstreamType) -> Value {
    match upstream_type {
        UpstreamType::Anthropic => build_anthropic(payload, upstream_model),
        UpstreamType::OpenaiChat => build_openai_chat(payload, upstream_model),
        UpstreamType::OpenaiResponses => build_openai_responses(payload, upstream_model),
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn anthropic_block_json(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text(text) => json!({ "type": "text", "text": text }),
        ContentBlock::Image { mime, source } => match source {
            ImageSource::Base64(data) => json!({
                "type": "image",
                "source": { "type": "base64", "media_type": mime, "data": data },
            }),
            ImageSource::Url(url) => json!({
                "type": "image",
                "source": { "type": "url", "url": url },
            }),
        },
        ContentBlock::ToolUse { id, name, input } => json!({
            "type": "tool_use", "id": id, "name": name, "input": input,
        }),
        ContentBlock::ToolResult { tool_use_id, content, is_error } => json!({
            "type": "tool_result", "tool_use_id": tool_use_id, "content": content, "is_error": is_error,
        }),
        ContentBlock::Thinking(text) => json!({ "type": "thinking", "thinking": text }),
    }
}

fn anthropic_tool_choice_json(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({ "type": "auto" }),
        ToolChoice::None => json!({ "type": "none" }),
        ToolChoice::Any | ToolChoice::Required => json!({ "type": "any" }),
        ToolChoice::Specific(name) => json!({ "type": "tool", "name": name }),
    }
}

fn build_anthropic(payload: &NormalizedPayload, upstream_model: &str) -> Value {
    let messages: Vec<Value> = payload
        .messages
        .iter()
        .filter(|m| !matches!(m.role, Role::System))
        .map(|m| {
            json!({
                "role": role_str(m.role),
                "content": m.content.iter().map(anthropic_block_json).collect::<Vec<_>>(),
            })
        })
        .collect();

    let mut body = json!({
        "model": upstream_model,
        "stream": payload.stream,
        "messages": messages,
        "max_tokens": payload.max_tokens.unwrap_or(4096),
    });

    let obj = body.as_object_mut().unwrap();
    if let Some(system) = &payload.system {
        obj.insert("system".to_string(), json!(system));
    }
    if !payload.tools.is_empty() {
        obj.insert(
            "tools".to_string(),
            json!(
                payload
                    .tools
                    .iter()
                    .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.parameters }))
                    .collect::<Vec<_>>()
            ),
        );
    }
    if let Some(choice) = &payload.tool_choice {
        obj.insert("tool_choice".to_string(), anthropic_tool_choice_json(choice));
    }
    if let Some(temperature) = payload.temperature {
        obj.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = payload.top_p {
        obj.insert("top_p".to_string(), json!(top_p));
    }
    if !payload.stop.is_empty() {
        obj.insert("stop_sequences".to_string(), json!(payload.stop));
    }

    body
}

fn flatten_to_text(messages: &[Message]) -> String {
    messages
        .iter()
        .flat_map(|m| &m.content)
        .filter_map(|b| match b {
            ContentBlock::Text(text) => Some(text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_openai_chat(payload: &NormalizedPayload, upstream_model: &str) -> Value {
    let mut messages = Vec::new();

    if let Some(system) = &payload.system {
        messages.push(json!({ "role": "system", "content": system }));
    }

    for m in &payload.messages {
        let tool_results: Vec<&ContentBlock> = m
            .content
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolResult { .. }))
            .collect();

        for block in &tool_results {
            if let ContentBlock::ToolResult { tool_use_id, content, .. } = block {
                messages.push(json!({ "role": "tool", "tool_call_id": tool_use_id, "content": content }));
            }
        }

        let text_and_image: Vec<Value> = m
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text(text) => Some(json!({ "type": "text", "text": text })),
                ContentBlock::Image { source, .. } => {
                    let url = match source {
                        ImageSource::Url(url) => url.clone(),
                        ImageSource::Base64(data) => format!("data:image/*;base64,{data}"),
                    };
                    Some(json!({ "type": "image_url", "image_url": { "url": url } }))
                }
                _ => None,
            })
            .collect();

        let tool_calls: Vec<Value> = m
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": input.to_string() },
                })),
                _ => None,
            })
            .collect();

        if text_and_image.is_empty() && tool_calls.is_empty() {
            continue;
        }

        let content = if text_and_image.len() == 1 {
            text_and_image[0].get("text").cloned().unwrap_or(json!(text_and_image))
        } else if text_and_image.is_empty() {
            Value::Null
        } else {
            json!(text_and_image)
        };

        let mut message = json!({ "role": role_str(m.role), "content": content });
        if !tool_calls.is_empty() {
            message.as_object_mut().unwrap().insert("tool_calls".to_string(), json!(tool_calls));
        }
        messages.push(message);
    }

    let mut body = json!({
        "model": upstream_model,
        "stream": payload.stream,
        "messages": messages,
    });

    let obj = body.as_object_mut().unwrap();
    if let Some(max_tokens) = payload.max_tokens {
        obj.insert("max_completion_tokens".to_string(), json!(max_tokens));
    }
    if !payload.tools.is_empty() {
        obj.insert(
            "tools".to_string(),
            json!(
                payload
                    .tools
                    .iter()
                    .map(|t| json!({
                        "type": "function",
                        "function": { "name": t.name, "description": t.description, "parameters": t.parameters },
                    }))
                    .collect::<Vec<_>>()
            ),
        );
    }
    if let Some(temperature) = payload.temperature {
        obj.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = payload.top_p {
        obj.insert("top_p".to_string(), json!(top_p));
    }
    if !payload.stop.is_empty() {
        obj.insert("stop".to_string(), json!(payload.stop));
    }

    body
}

fn build_openai_responses(payload: &NormalizedPayload, upstream_model: &str) -> Value {
    let input = if payload.messages.iter().all(|m| {
        m.content
            .iter()
            .all(|b| matches!(b, ContentBlock::Text(_)))
    }) {
        json!(flatten_to_text(&payload.messages))
    } else {
        let items: Vec<Value> = payload
            .messages
            .iter()
            .map(|m| {
                let content: Vec<Value> = m
                    .content
                    .iter()
                    .map(|b| match b {
                        ContentBlock::Text(text) => json!({ "type": "input_text", "text": text }),
                        ContentBlock::Image { source, .. } => {
                            let url = match source {
                                ImageSource::Url(url) => url.clone(),
                                ImageSource::Base64(data) => format!("data:image/*;base64,{data}"),
                            };
                            json!({ "type": "input_image", "image_url": url })
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            json!({ "type": "tool_use", "id": id, "name": name, "input": input })
                        }
                        ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                            json!({ "type": "tool_result", "tool_use_id": tool_use_id, "content": content, "is_error": is_error })
                        }
                        ContentBlock::Thinking(text) => json!({ "type": "input_text", "text": text }),
                    })
                    .collect();
                json!({ "type": "message", "role": role_str(m.role), "content": content })
            })
            .collect();
        json!(items)
    };

    let mut body = json!({
        "model": upstream_model,
        "stream": payload.stream,
        "input": input,
    });

    let obj = body.as_object_mut().unwrap();
    if let Some(system) = &payload.system {
        obj.insert("instructions".to_string(), json!(system));
    }
    if let Some(max_tokens) = payload.max_tokens {
        obj.insert("max_output_tokens".to_string(), json!(max_tokens));
    }
    if !payload.tools.is_empty() {
        obj.insert(
            "tools".to_string(),
            json!(
                payload
                    .tools
                    .iter()
                    .map(|t| json!({ "type": "function", "name": t.name, "description": t.description, "parameters": t.parameters }))
                    .collect::<Vec<_>>()
            ),
        );
    }
    if let Some(temperature) = payload.temperature {
        obj.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = payload.top_p {
        obj.insert("top_p".to_string(), json!(top_p));
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentBlock, Message, NormalizedPayload, Role};

    fn simple_payload() -> NormalizedPayload {
        NormalizedPayload {
            model: "requested".into(),
            stream: false,
            messages: vec![Message {
                role: Role::User,
                content: vec![ContentBlock::Text("ping".into())],
            }],
            system: Some("be terse".into()),
            tools: Vec::new(),
            tool_choice: None,
            max_tokens: Some(16),
            temperature: None,
            top_p: None,
            stop: Vec::new(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn anthropic_build_carries_system_and_max_tokens() {
        let body = build_anthropic(&simple_payload(), "claude-sonnet-4-5-20250929");
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["max_tokens"], 16);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn openai_chat_build_puts_system_as_leading_message() {
        let body = build_openai_chat(&simple_payload(), "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_completion_tokens"], 16);
    }

    #[test]
    fn beta_header_prefers_per_model_env_over_global() {
        unsafe {
            std::env::set_var("CC_GW_ANTHROPIC_BETA_ALL", "global-value");
            std::env::set_var("CC_GW_ANTHROPIC_BETA_CLAUDE_SONNET_4_5", "model-value");
        }
        let value = anthropic_beta_header("claude-sonnet-4-5");
        unsafe {
            std::env::remove_var("CC_GW_ANTHROPIC_BETA_ALL");
            std::env::remove_var("CC_GW_ANTHROPIC_BETA_CLAUDE_SONNET_4_5");
        }
        assert_eq!(value.as_deref(), Some("model-value"));
    }
}
