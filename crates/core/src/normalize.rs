//! Converts any of the three client wire shapes into a single
//! [`NormalizedPayload`]. Three entry points, one per protocol, all
//! producing the same canonical form.

use std::collections::HashMap;

use serde_json::Value;

use crate::{
    error::GatewayError,
    messages::{anthropic, openai_chat, openai_responses},
    model::{ContentBlock, ImageSource, Message, NormalizedPayload, Role, ToolChoice, ToolDefinition},
};

pub fn from_anthropic(req: anthropic::AnthropicRequest) -> Result<NormalizedPayload, GatewayError> {
    if req.messages.is_empty() {
        return Err(GatewayError::InvalidRequest("messages must not be empty".into()));
    }

    let system = req.system.map(|s| match s {
        anthropic::AnthropicSystem::Text(text) => text,
        anthropic::AnthropicSystem::Blocks(blocks) => blocks.into_iter().map(|b| b.text).collect::<Vec<_>>().join("\n"),
    });

    let messages = req
        .messages
        .into_iter()
        .map(|m| {
            let role = parse_role(&m.role)?;
            let content = match m.content {
                anthropic::AnthropicContent::Text(text) => vec![ContentBlock::Text(text)],
                anthropic::AnthropicContent::Blocks(blocks) => blocks.into_iter().map(from_anthropic_block).collect(),
            };
            Ok(Message { role, content })
        })
        .collect::<Result<Vec<_>, GatewayError>>()?;

    let tools = req
        .tools
        .into_iter()
        .map(|t| ToolDefinition {
            name: t.name,
            description: t.description,
            parameters: t.input_schema,
        })
        .collect();

    Ok(NormalizedPayload {
        model: req.model,
        stream: req.stream,
        messages,
        system,
        tools,
        tool_choice: req.tool_choice.map(|v| anthropic_tool_choice(&v)),
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences,
        metadata: req
            .metadata
            .and_then(|v| v.as_object().cloned())
            .map(|obj| obj.into_iter().collect())
            .unwrap_or_default(),
    })
}

fn from_anthropic_block(block: anthropic::AnthropicContentBlock) -> ContentBlock {
    match block {
        anthropic::AnthropicContentBlock::Text { text } => ContentBlock::Text(text),
        anthropic::AnthropicContentBlock::Image { source } => match source {
            anthropic::AnthropicImageSource::Base64 { media_type, data } => ContentBlock::Image {
                mime: media_type,
                source: ImageSource::Base64(data),
            },
            anthropic::AnthropicImageSource::Url { url } => ContentBlock::Image {
                mime: "image/*".to_string(),
                source: ImageSource::Url(url),
            },
        },
        anthropic::AnthropicContentBlock::ToolUse { id, name, input } => ContentBlock::ToolUse { id, name, input },
        anthropic::AnthropicContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentBlock::ToolResult {
            tool_use_id,
            content: tool_result_text(content),
            is_error,
        },
        anthropic::AnthropicContentBlock::Thinking { thinking } => ContentBlock::Thinking(thinking),
    }
}

fn tool_result_text(content: anthropic::AnthropicToolResultContent) -> String {
    match content {
        anthropic::AnthropicToolResultContent::Empty => String::new(),
        anthropic::AnthropicToolResultContent::Text(text) => text,
        anthropic::AnthropicToolResultContent::Blocks(blocks) => blocks
            .into_iter()
            .filter_map(|b| match b {
                anthropic::AnthropicContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn anthropic_tool_choice(value: &Value) -> ToolChoice {
    match value.get("type").and_then(Value::as_str) {
        Some("auto") => ToolChoice::Auto,
        Some("none") => ToolChoice::None,
        Some("any") => ToolChoice::Any,
        Some("tool") => value
            .get("name")
            .and_then(Value::as_str)
            .map(|name| ToolChoice::Specific(name.to_string()))
            .unwrap_or(ToolChoice::Auto),
        _ => ToolChoice::Auto,
    }
}

fn parse_role(raw: &str) -> Result<Role, GatewayError> {
    match raw {
        "system" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        other => Err(GatewayError::InvalidRequest(format!("unknown role '{other}'"))),
    }
}

/// Legacy `functions`/`function_call` fields are converted to `tools` /
/// `tool_choice` before the rest of normalization runs.
fn chat_legacy_functions_to_tools(req: &mut openai_chat::ChatRequest) {
    if req.tools.is_empty() && !req.functions.is_empty() {
        req.tools = std::mem::take(&mut req.functions)
            .into_iter()
            .map(|f| openai_chat::ChatTool {
                kind: "function".to_string(),
                function: f,
            })
            .collect();

        if req.tool_choice.is_none() {
            req.tool_choice = req.function_call.take();
        }
    }
}

pub fn from_openai_chat(mut req: openai_chat::ChatRequest) -> Result<NormalizedPayload, GatewayError> {
    chat_legacy_functions_to_tools(&mut req);

    if req.messages.is_empty() {
        return Err(GatewayError::InvalidRequest("messages must not be empty".into()));
    }

    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for m in req.messages {
        if m.role == "system" || m.role == "developer" {
            if let Some(openai_chat::ChatContent::Text(text)) = m.content {
                system_parts.push(text);
            }
            continue;
        }

        if m.role == "tool" {
            let tool_use_id = m.tool_call_id.unwrap_or_default();
            let content = match m.content {
                Some(openai_chat::ChatContent::Text(text)) => text,
                Some(openai_chat::ChatContent::Parts(parts)) => flatten_chat_parts_text(&parts),
                None => String::new(),
            };
            messages.push(Message {
                role: Role::User,
                content: vec![ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error: false,
                }],
            });
            continue;
        }

        let role = parse_role(&m.role)?;

        let mut content = Vec::new();
        match m.content {
            Some(openai_chat::ChatContent::Text(text)) => content.push(ContentBlock::Text(text)),
            Some(openai_chat::ChatContent::Parts(parts)) => {
                for part in parts {
                    match part {
                        openai_chat::ChatContentPart::Text { text } => content.push(ContentBlock::Text(text)),
                        openai_chat::ChatContentPart::ImageUrl { image_url } => content.push(ContentBlock::Image {
                            mime: "image/*".to_string(),
                            source: ImageSource::Url(image_url.url),
                        }),
                    }
                }
            }
            None => {}
        }

        for call in m.tool_calls {
            let input = serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| {
                serde_json::json!({ "_raw": call.function.arguments })
            });
            content.push(ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }

        messages.push(Message { role, content });
    }

    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n"));

    let tools = req
        .tools
        .into_iter()
        .map(|t| ToolDefinition {
            name: t.function.name,
            description: t.function.description,
            parameters: t.function.parameters,
        })
        .collect();

    let stop = match req.stop {
        Some(openai_chat::StopSequences::One(s)) => vec![s],
        Some(openai_chat::StopSequences::Many(v)) => v,
        None => Vec::new(),
    };

    Ok(NormalizedPayload {
        model: req.model,
        stream: req.stream,
        messages,
        system,
        tools,
        tool_choice: req.tool_choice.as_ref().map(openai_tool_choice),
        max_tokens: req.max_tokens.or(req.max_completion_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stop,
        metadata: HashMap::new(),
    })
}

fn flatten_chat_parts_text(parts: &[openai_chat::ChatContentPart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            openai_chat::ChatContentPart::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn openai_tool_choice(value: &Value) -> ToolChoice {
    match value {
        Value::String(s) if s == "auto" => ToolChoice::Auto,
        Value::String(s) if s == "none" => ToolChoice::None,
        Value::String(s) if s == "required" => ToolChoice::Required,
        Value::Object(_) => value
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .map(|name| ToolChoice::Specific(name.to_string()))
            .unwrap_or(ToolChoice::Auto),
        _ => ToolChoice::Auto,
    }
}

pub fn from_openai_responses(req: openai_responses::ResponsesRequest) -> Result<NormalizedPayload, GatewayError> {
    let mut messages = Vec::new();

    match req.input {
        openai_responses::ResponsesInput::Text(text) => {
            messages.push(Message {
                role: Role::User,
                content: vec![ContentBlock::Text(text)],
            });
        }
        openai_responses::ResponsesInput::Items(items) => {
            for item in items {
                match item {
                    openai_responses::ResponsesItem::Message { role, content } => {
                        let role = parse_role(&role)?;
                        let blocks = content
                            .into_iter()
                            .map(|part| match part {
                                openai_responses::ResponsesContentPart::InputText { text } => ContentBlock::Text(text),
                                openai_responses::ResponsesContentPart::OutputText { text } => ContentBlock::Text(text),
                                openai_responses::ResponsesContentPart::InputImage { image_url } => ContentBlock::Image {
                                    mime: "image/*".to_string(),
                                    source: ImageSource::Url(image_url),
                                },
                            })
                            .collect();
                        messages.push(Message { role, content: blocks });
                    }
                    openai_responses::ResponsesItem::InputText { text } | openai_responses::ResponsesItem::OutputText { text } => {
                        messages.push(Message {
                            role: Role::User,
                            content: vec![ContentBlock::Text(text)],
                        });
                    }
                    openai_responses::ResponsesItem::ToolUse { id, name, input } => {
                        messages.push(Message {
                            role: Role::Assistant,
                            content: vec![ContentBlock::ToolUse { id, name, input }],
                        });
                    }
                    openai_responses::ResponsesItem::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => {
                        messages.push(Message {
                            role: Role::User,
                            content: vec![ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                is_error,
                            }],
                        });
                    }
                }
            }
        }
    }

    if messages.is_empty() {
        return Err(GatewayError::InvalidRequest("input must not be empty".into()));
    }

    let tools = req
        .tools
        .into_iter()
        .map(|t| ToolDefinition {
            name: t.name,
            description: t.description,
            parameters: t.parameters,
        })
        .collect();

    Ok(NormalizedPayload {
        model: req.model,
        stream: req.stream,
        messages,
        system: req.instructions,
        tools,
        tool_choice: req.tool_choice.as_ref().map(openai_tool_choice),
        max_tokens: req.max_output_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: Vec::new(),
        metadata: HashMap::new(),
    })
}
