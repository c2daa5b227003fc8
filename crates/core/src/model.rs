//! The canonical in-memory request/response shapes every wire protocol
//! converts to and from. This is the single source of truth the Normalizer
//! produces, the Router annotates, and the Translator consumes, nothing
//! downstream of normalization should look at a protocol-specific struct
//! again.

use std::collections::HashMap;

use serde_json::Value;

pub use config::UpstreamType;

/// One of the three wire shapes a client may speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProtocol {
    Anthropic,
    OpenaiChat,
    OpenaiResponses,
}

/// A role a message in the canonical form can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The unit of translation. Closed on purpose, resist growing this ad hoc;
/// add a variant only when a protocol genuinely introduces a new kind of
/// content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    Image { mime: String, source: ImageSource },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String, is_error: bool },
    Thinking(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Base64(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoice {
    Auto,
    None,
    Any,
    Required,
    Specific(String),
}

/// The canonical request form. Produced by the normalizer, consumed by the
/// router and the request-direction translator.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPayload {
    pub model: String,
    pub stream: bool,
    pub messages: Vec<Message>,
    pub system: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl NormalizedPayload {
    /// `true` if any tool is declared, used by the router's "reasoning"
    /// classification.
    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }
}

/// Output of routing: which provider and upstream model this request goes
/// to, plus the cheap token estimate computed while we still have the
/// normalized payload at hand.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub provider_id: String,
    pub upstream_model: String,
    pub upstream_type: UpstreamType,
    pub token_estimate: u32,
}

/// Usage counters as they appear on the canonical response form. Cached
/// reads and creations are tracked separately since providers bill them at
/// different rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_input_tokens: u32,
    pub cache_creation_input_tokens: u32,
}
