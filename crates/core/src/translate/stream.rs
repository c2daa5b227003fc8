//! The streaming translator: a protocol state machine that re-emits
//! upstream SSE events in the client's shape while the upstream body is
//! still arriving. Byte-level SSE framing is handled upstream of this
//! module by `eventsource_stream`; this type only ever sees a decoded
//! `(event name, JSON data)` pair.
//!
//! Modeled as `step(event) -> Vec<out_event>` rather than callback chains;
//! the two input grammars (Anthropic SSE, OpenAI SSE) and two output
//! grammars make anything else intractable.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::model::{ClientProtocol, UpstreamType};

/// Selects the maximum non-negative value seen across a window of usage
/// reports, providers repeat cumulative totals with varying completeness,
/// so a downward jump is a stale echo, not a correction.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageAccumulator {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_input_tokens: u32,
    pub cache_creation_input_tokens: u32,
}

impl UsageAccumulator {
    pub fn select_max(&mut self, other: &UsageAccumulator) {
        self.input_tokens = self.input_tokens.max(other.input_tokens);
        self.output_tokens = self.output_tokens.max(other.output_tokens);
        self.cache_read_input_tokens = self.cache_read_input_tokens.max(other.cache_read_input_tokens);
        self.cache_creation_input_tokens = self.cache_creation_input_tokens.max(other.cache_creation_input_tokens);
    }
}

#[derive(Debug, Clone)]
enum BlockState {
    Text { buf: String },
    ToolUse { id: String, name: String, input_acc: String },
    Thinking { buf: String },
}

/// Output of a single translator step: zero or more client-shape SSE
/// payloads (already JSON-encoded, ready to wrap in `data: ...\n\n`), plus
/// whether this event carried the first visible output token (for TTFT).
#[derive(Debug, Default)]
pub struct StepOutput {
    pub events: Vec<String>,
    pub saw_first_token: bool,
    pub terminal: bool,
}

pub struct StreamTranslator {
    client_protocol: ClientProtocol,
    upstream_type: UpstreamType,
    blocks: BTreeMap<u32, BlockState>,
    chat_tool_call_index: BTreeMap<u32, usize>,
    next_chat_tool_index: usize,
    pub usage: UsageAccumulator,
    message_id: String,
    model: String,
    emitted_first_token: bool,
    stop_reason: Option<String>,
}

impl StreamTranslator {
    pub fn new(client_protocol: ClientProtocol, upstream_type: UpstreamType, model: String) -> Self {
        Self {
            client_protocol,
            upstream_type,
            blocks: BTreeMap::new(),
            chat_tool_call_index: BTreeMap::new(),
            next_chat_tool_index: 0,
            usage: UsageAccumulator::default(),
            message_id: String::new(),
            model,
            emitted_first_token: false,
            stop_reason: None,
        }
    }

    /// Process one decoded upstream SSE frame (`event`, JSON `data`).
    pub fn step(&mut self, event: Option<&str>, data: &Value) -> StepOutput {
        match self.upstream_type {
            UpstreamType::Anthropic => self.step_anthropic(event, data),
            UpstreamType::OpenaiChat => self.step_openai_chat(data),
            UpstreamType::OpenaiResponses => self.step_openai_responses(event, data),
        }
    }

    pub fn terminal_events(&mut self) -> Vec<String> {
        match self.client_protocol {
            ClientProtocol::Anthropic => vec![json_line(&json!({ "type": "message_stop" }))],
            ClientProtocol::OpenaiChat => {
                let finish_reason = self.chat_finish_reason();
                vec![
                    json_line(&json!({
                        "id": self.message_id, "object": "chat.completion.chunk", "model": self.model,
                        "choices": [{ "index": 0, "delta": {}, "finish_reason": finish_reason }],
                    })),
                    "[DONE]".to_string(),
                ]
            }
            ClientProtocol::OpenaiResponses => {
                let content: Vec<Value> = self
                    .blocks
                    .values()
                    .filter_map(|b| match b {
                        BlockState::Text { buf } => Some(json!({ "type": "output_text", "text": buf })),
                        _ => None,
                    })
                    .collect();

                vec![
                    json_line(&json!({
                        "id": self.message_id, "object": "response", "model": self.model,
                        "status": "completed",
                        "output": [{ "type": "output_message", "content": content }],
                    })),
                    "[DONE]".to_string(),
                ]
            }
        }
    }

    fn chat_finish_reason(&self) -> &'static str {
        match self.stop_reason.as_deref() {
            Some("tool_use") | Some("tool_calls") => "tool_calls",
            Some("max_tokens") | Some("length") => "length",
            _ => "stop",
        }
    }

    fn step_anthropic(&mut self, event: Option<&str>, data: &Value) -> StepOutput {
        let mut out = StepOutput::default();

        match event {
            Some("message_start") => {
                if let Some(id) = data.pointer("/message/id").and_then(Value::as_str) {
                    self.message_id = id.to_string();
                }
                if let Some(model) = data.pointer("/message/model").and_then(Value::as_str) {
                    self.model = model.to_string();
                }
                if let Some(usage) = data.pointer("/message/usage") {
                    self.merge_anthropic_usage(usage);
                }
                out.events.extend(self.emit_start());
            }
            Some("content_block_start") => {
                let index = data.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
                let block = data.get("content_block").cloned().unwrap_or(Value::Null);
                let state = match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => BlockState::ToolUse {
                        id: block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                        name: block.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                        input_acc: String::new(),
                    },
                    Some("thinking") => BlockState::Thinking { buf: String::new() },
                    _ => BlockState::Text { buf: String::new() },
                };

                if let BlockState::ToolUse { id, name, .. } = &state {
                    out.events.extend(self.emit_tool_use_start(index, id, name));
                }

                self.blocks.insert(index, state);
            }
            Some("content_block_delta") => {
                let index = data.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
                let delta = data.get("delta").cloned().unwrap_or(Value::Null);

                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        let text = delta.get("text").and_then(Value::as_str).unwrap_or_default();
                        if let Some(BlockState::Text { buf }) = self.blocks.get_mut(&index) {
                            buf.push_str(text);
                        }
                        if !self.emitted_first_token && !text.is_empty() {
                            self.emitted_first_token = true;
                            out.saw_first_token = true;
                        }
                        out.events.extend(self.emit_text_delta(index, text));
                    }
                    Some("input_json_delta") => {
                        let partial = delta.get("partial_json").and_then(Value::as_str).unwrap_or_default();
                        if let Some(BlockState::ToolUse { input_acc, .. }) = self.blocks.get_mut(&index) {
                            input_acc.push_str(partial);
                        }
                        out.events.extend(self.emit_tool_input_delta(index, partial));
                    }
                    Some("thinking_delta") => {
                        let text = delta.get("thinking").and_then(Value::as_str).unwrap_or_default();
                        if let Some(BlockState::Thinking { buf }) = self.blocks.get_mut(&index) {
                            buf.push_str(text);
                        }
                    }
                    _ => {}
                }
            }
            Some("message_delta") => {
                if let Some(stop_reason) = data.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.stop_reason = Some(stop_reason.to_string());
                }
                if let Some(usage) = data.get("usage") {
                    self.merge_anthropic_usage(usage);
                }
            }
            Some("message_stop") => {
                out.terminal = true;
            }
            _ => {}
        }

        out
    }

    fn step_openai_chat(&mut self, data: &Value) -> StepOutput {
        let mut out = StepOutput::default();

        if let Some(id) = data.get("id").and_then(Value::as_str) {
            self.message_id = id.to_string();
        }

        if let Some(usage) = data.get("usage") {
            self.merge_openai_chat_usage(usage);
        }

        let Some(delta) = data.pointer("/choices/0/delta") else {
            return out;
        };

        if let Some(finish_reason) = data.pointer("/choices/0/finish_reason").and_then(Value::as_str) {
            self.stop_reason = Some(finish_reason.to_string());
        }

        if let Some(content) = delta.get("content").and_then(Value::as_str) {
            if !content.is_empty() {
                if !self.emitted_first_token {
                    self.emitted_first_token = true;
                    out.saw_first_token = true;
                }
                out.events.extend(self.emit_text_delta(0, content));
            }
        }

        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for call in tool_calls {
                let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
                let name = call.pointer("/function/name").and_then(Value::as_str);
                let arguments = call.pointer("/function/arguments").and_then(Value::as_str).unwrap_or_default();
                let id = call.get("id").and_then(Value::as_str).unwrap_or_default();

                if let Some(name) = name {
                    self.blocks.insert(
                        index,
                        BlockState::ToolUse {
                            id: id.to_string(),
                            name: name.to_string(),
                            input_acc: String::new(),
                        },
                    );
                    out.events.extend(self.emit_tool_use_start(index, id, name));
                }

                if !arguments.is_empty() {
                    if let Some(BlockState::ToolUse { input_acc, .. }) = self.blocks.get_mut(&index) {
                        input_acc.push_str(arguments);
                    }
                    out.events.extend(self.emit_tool_input_delta(index, arguments));
                }
            }
        }

        out
    }

    fn step_openai_responses(&mut self, event: Option<&str>, data: &Value) -> StepOutput {
        let mut out = StepOutput::default();

        match event {
            Some("response.created") => {
                if let Some(id) = data.pointer("/response/id").and_then(Value::as_str) {
                    self.message_id = id.to_string();
                }
                out.events.extend(self.emit_start());
            }
            Some("response.output_text.delta") => {
                let text = data.get("delta").and_then(Value::as_str).unwrap_or_default();
                if !self.emitted_first_token && !text.is_empty() {
                    self.emitted_first_token = true;
                    out.saw_first_token = true;
                }
                self.blocks
                    .entry(0)
                    .or_insert_with(|| BlockState::Text { buf: String::new() });
                if let Some(BlockState::Text { buf }) = self.blocks.get_mut(&0) {
                    buf.push_str(text);
                }
                out.events.extend(self.emit_text_delta(0, text));
            }
            Some("response.output_tool_call.delta") => {
                let index = data.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
                if let Some(name) = data.get("name").and_then(Value::as_str) {
                    let id = data.get("id").and_then(Value::as_str).unwrap_or_default();
                    self.blocks.insert(
                        index,
                        BlockState::ToolUse {
                            id: id.to_string(),
                            name: name.to_string(),
                            input_acc: String::new(),
                        },
                    );
                    out.events.extend(self.emit_tool_use_start(index, id, name));
                }
                if let Some(partial) = data.get("delta").and_then(Value::as_str) {
                    if let Some(BlockState::ToolUse { input_acc, .. }) = self.blocks.get_mut(&index) {
                        input_acc.push_str(partial);
                    }
                    out.events.extend(self.emit_tool_input_delta(index, partial));
                }
            }
            Some("response.completed") => {
                if let Some(usage) = data.pointer("/response/usage") {
                    self.merge_openai_responses_usage(usage);
                }
                out.terminal = true;
            }
            _ => {}
        }

        out
    }

    fn merge_anthropic_usage(&mut self, usage: &Value) {
        let report = UsageAccumulator {
            input_tokens: usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            output_tokens: usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            cache_read_input_tokens: usage.get("cache_read_input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            cache_creation_input_tokens: usage.get("cache_creation_input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        };
        self.usage.select_max(&report);
    }

    fn merge_openai_chat_usage(&mut self, usage: &Value) {
        let report = UsageAccumulator {
            input_tokens: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            output_tokens: usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            cache_read_input_tokens: usage.pointer("/prompt_tokens_details/cached_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            cache_creation_input_tokens: 0,
        };
        self.usage.select_max(&report);
    }

    fn merge_openai_responses_usage(&mut self, usage: &Value) {
        let report = UsageAccumulator {
            input_tokens: usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            output_tokens: usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            cache_read_input_tokens: usage.pointer("/input_tokens_details/cached_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            cache_creation_input_tokens: 0,
        };
        self.usage.select_max(&report);
    }

    fn emit_start(&self) -> Vec<String> {
        match self.client_protocol {
            ClientProtocol::Anthropic => vec![json_line(&json!({
                "type": "message_start",
                "message": { "id": self.message_id, "model": self.model, "role": "assistant", "content": [] },
            }))],
            ClientProtocol::OpenaiChat => vec![json_line(&json!({
                "id": self.message_id, "object": "chat.completion.chunk", "model": self.model,
                "choices": [{ "index": 0, "delta": { "role": "assistant" }, "finish_reason": null }],
            }))],
            ClientProtocol::OpenaiResponses => vec![json_line(&json!({
                "id": self.message_id, "object": "response", "model": self.model, "status": "in_progress",
            }))],
        }
    }

    fn emit_text_delta(&mut self, index: u32, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        match self.client_protocol {
            ClientProtocol::Anthropic => vec![json_line(&json!({
                "type": "content_block_delta", "index": index,
                "delta": { "type": "text_delta", "text": text },
            }))],
            ClientProtocol::OpenaiChat => vec![json_line(&json!({
                "id": self.message_id, "object": "chat.completion.chunk", "model": self.model,
                "choices": [{ "index": 0, "delta": { "content": text }, "finish_reason": null }],
            }))],
            ClientProtocol::OpenaiResponses => vec![json_line(&json!({
                "type": "response.output_text.delta", "delta": text,
            }))],
        }
    }

    fn chat_tool_index_for(&mut self, index: u32) -> usize {
        *self.chat_tool_call_index.entry(index).or_insert_with(|| {
            let next = self.next_chat_tool_index;
            self.next_chat_tool_index += 1;
            next
        })
    }

    fn emit_tool_use_start(&mut self, index: u32, id: &str, name: &str) -> Vec<String> {
        match self.client_protocol {
            ClientProtocol::Anthropic => vec![json_line(&json!({
                "type": "content_block_start", "index": index,
                "content_block": { "type": "tool_use", "id": id, "name": name, "input": {} },
            }))],
            ClientProtocol::OpenaiChat => {
                let chat_index = self.chat_tool_index_for(index);
                vec![json_line(&json!({
                    "id": self.message_id, "object": "chat.completion.chunk", "model": self.model,
                    "choices": [{ "index": 0, "delta": { "tool_calls": [{
                        "index": chat_index, "id": id, "type": "function",
                        "function": { "name": name, "arguments": "" },
                    }] }, "finish_reason": null }],
                }))]
            }
            ClientProtocol::OpenaiResponses => vec![json_line(&json!({
                "type": "response.output_tool_call.delta", "index": index, "id": id, "name": name,
            }))],
        }
    }

    fn emit_tool_input_delta(&mut self, index: u32, partial_json: &str) -> Vec<String> {
        if partial_json.is_empty() {
            return Vec::new();
        }
        match self.client_protocol {
            ClientProtocol::Anthropic => vec![json_line(&json!({
                "type": "content_block_delta", "index": index,
                "delta": { "type": "input_json_delta", "partial_json": partial_json },
            }))],
            ClientProtocol::OpenaiChat => {
                let chat_index = self.chat_tool_index_for(index);
                vec![json_line(&json!({
                    "id": self.message_id, "object": "chat.completion.chunk", "model": self.model,
                    "choices": [{ "index": 0, "delta": { "tool_calls": [{
                        "index": chat_index, "function": { "arguments": partial_json },
                    }] }, "finish_reason": null }],
                }))]
            }
            ClientProtocol::OpenaiResponses => vec![json_line(&json!({
                "type": "response.output_tool_call.delta", "index": index, "delta": partial_json,
            }))],
        }
    }
}

fn json_line(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulator_never_goes_down() {
        let mut acc = UsageAccumulator { output_tokens: 10, ..Default::default() };
        acc.select_max(&UsageAccumulator { output_tokens: 3, ..Default::default() });
        assert_eq!(acc.output_tokens, 10);
        acc.select_max(&UsageAccumulator { output_tokens: 15, ..Default::default() });
        assert_eq!(acc.output_tokens, 15);
    }

    #[test]
    fn anthropic_text_delta_translates_to_openai_chat_content_delta() {
        let mut translator = StreamTranslator::new(ClientProtocol::OpenaiChat, UpstreamType::Anthropic, "claude".into());

        translator.step(Some("message_start"), &json!({ "message": { "id": "msg_1", "model": "claude" } }));
        translator.step(
            Some("content_block_start"),
            &json!({ "index": 0, "content_block": { "type": "text" } }),
        );
        let out = translator.step(
            Some("content_block_delta"),
            &json!({ "index": 0, "delta": { "type": "text_delta", "text": "he" } }),
        );

        assert!(out.saw_first_token);
        let value: Value = serde_json::from_str(&out.events[0]).unwrap();
        assert_eq!(value["choices"][0]["delta"]["content"], "he");
    }

    #[test]
    fn message_start_captures_input_tokens() {
        let mut translator = StreamTranslator::new(ClientProtocol::OpenaiChat, UpstreamType::Anthropic, "claude".into());

        translator.step(
            Some("message_start"),
            &json!({ "message": { "id": "msg_1", "model": "claude", "usage": { "input_tokens": 42, "output_tokens": 0 } } }),
        );

        assert_eq!(translator.usage.input_tokens, 42);

        translator.step(
            Some("message_delta"),
            &json!({ "delta": { "stop_reason": "end_turn" }, "usage": { "output_tokens": 7 } }),
        );

        assert_eq!(translator.usage.input_tokens, 42, "message_delta carries no input_tokens, must not clobber it");
        assert_eq!(translator.usage.output_tokens, 7);
    }

    #[test]
    fn tool_use_input_deltas_concatenate() {
        let mut translator = StreamTranslator::new(ClientProtocol::OpenaiChat, UpstreamType::Anthropic, "claude".into());

        translator.step(
            Some("content_block_start"),
            &json!({ "index": 0, "content_block": { "type": "tool_use", "id": "t1", "name": "weather" } }),
        );
        translator.step(
            Some("content_block_delta"),
            &json!({ "index": 0, "delta": { "type": "input_json_delta", "partial_json": "{\"location\":" } }),
        );
        translator.step(
            Some("content_block_delta"),
            &json!({ "index": 0, "delta": { "type": "input_json_delta", "partial_json": "\"Paris\"}" } }),
        );

        let BlockState::ToolUse { input_acc, .. } = translator.blocks.get(&0).unwrap() else {
            panic!("expected tool use block");
        };
        assert_eq!(input_acc, "{\"location\":\"Paris\"}");
    }
}
