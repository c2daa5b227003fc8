//! Heuristic token estimation and the derived timing metrics (TTFT, TPOT)
//! used when an upstream omits usage or to sanity-check the hot path.

use crate::model::{ContentBlock, NormalizedPayload};

const CJK_RANGES: [(u32, u32); 4] = [
    (0x4E00, 0x9FFF),
    (0x3040, 0x30FF),
    (0xAC00, 0xD7A3),
    (0xF900, 0xFAFF),
];

fn is_cjk(c: char) -> bool {
    let code = c as u32;
    CJK_RANGES.iter().any(|&(lo, hi)| code >= lo && code <= hi)
}

fn is_cjk_heavy(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let cjk = text.chars().filter(|c| is_cjk(*c)).count();
    cjk * 2 > total
}

fn text_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as f64;
    let divisor = if is_cjk_heavy(text) { 3.5 } else { 4.0 };
    (chars / divisor).ceil() as u32
}

const IMAGE_TOKEN_COST: u32 = 85;

/// Cheap estimate used when upstream usage is absent or zero. Not a real
/// tokenizer, a rough proxy good enough for logging and defaults.
pub fn estimate_tokens(payload: &NormalizedPayload) -> u32 {
    let mut total = 0u32;

    if let Some(system) = &payload.system {
        total += text_tokens(system);
    }

    for message in &payload.messages {
        for block in &message.content {
            total += match block {
                ContentBlock::Text(text) => text_tokens(text),
                ContentBlock::Thinking(text) => text_tokens(text),
                ContentBlock::Image { .. } => IMAGE_TOKEN_COST,
                ContentBlock::ToolUse { input, .. } => {
                    text_tokens(&serde_json::to_string(input).unwrap_or_default())
                }
                ContentBlock::ToolResult { content, .. } => text_tokens(content),
            };
        }
    }

    for tool in &payload.tools {
        let json = serde_json::to_string(&tool.parameters).unwrap_or_default();
        total += (json.len() as f64 / 4.0).ceil() as u32;
    }

    total
}

/// Average milliseconds per output token after the first, per the timing
/// model: full latency is used whenever reasoning tokens are present or
/// TTFT is a large share of total latency; otherwise the post-first-token
/// span is used, floored at 20% of total latency.
pub fn tpot_ms(latency_ms: f64, ttft_ms: Option<f64>, output_tokens: u32, has_reasoning_tokens: bool) -> Option<f64> {
    if output_tokens == 0 {
        return None;
    }

    let raw = match ttft_ms {
        None => latency_ms,
        Some(_) if has_reasoning_tokens => latency_ms,
        Some(ttft) if ttft / latency_ms.max(f64::EPSILON) <= 0.2 => {
            (latency_ms - ttft).max(0.2 * latency_ms)
        }
        Some(_) => latency_ms,
    };

    Some((raw / output_tokens as f64 * 100.0).round() / 100.0)
}

/// Priority-ordered cached-token resolution across the fields different
/// upstreams use for it. Reads and creations are kept separate; only
/// Anthropic tracks the creation half.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachedTokens {
    pub read: u32,
    pub creation: u32,
}

pub fn resolve_cached_tokens(
    anthropic_read: Option<u32>,
    anthropic_creation: Option<u32>,
    openai_chat_cached: Option<u32>,
    openai_responses_cached: Option<u32>,
    top_level_cached: Option<u32>,
) -> CachedTokens {
    if anthropic_read.is_some() || anthropic_creation.is_some() {
        return CachedTokens {
            read: anthropic_read.unwrap_or(0),
            creation: anthropic_creation.unwrap_or(0),
        };
    }

    if let Some(cached) = openai_chat_cached.or(openai_responses_cached).or(top_level_cached) {
        return CachedTokens { read: cached, creation: 0 };
    }

    CachedTokens::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentBlock, Message, Role};

    #[test]
    fn ascii_text_uses_four_char_divisor() {
        let payload = NormalizedPayload {
            model: "m".into(),
            stream: false,
            messages: vec![Message {
                role: Role::User,
                content: vec![ContentBlock::Text("a".repeat(8))],
            }],
            system: None,
            tools: Vec::new(),
            tool_choice: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: Vec::new(),
            metadata: Default::default(),
        };

        assert_eq!(estimate_tokens(&payload), 2);
    }

    #[test]
    fn image_block_costs_a_fixed_amount() {
        let payload = NormalizedPayload {
            model: "m".into(),
            stream: false,
            messages: vec![Message {
                role: Role::User,
                content: vec![ContentBlock::Image {
                    mime: "image/png".into(),
                    source: crate::model::ImageSource::Url("https://example.com/x.png".into()),
                }],
            }],
            system: None,
            tools: Vec::new(),
            tool_choice: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: Vec::new(),
            metadata: Default::default(),
        };

        assert_eq!(estimate_tokens(&payload), IMAGE_TOKEN_COST);
    }

    #[test]
    fn tpot_undefined_with_zero_output_tokens() {
        assert_eq!(tpot_ms(100.0, Some(20.0), 0, false), None);
    }

    #[test]
    fn tpot_uses_full_latency_when_ttft_dominates() {
        // ttft/latency = 0.5 > 0.2, so full latency is used.
        let tpot = tpot_ms(100.0, Some(50.0), 10, false).unwrap();
        assert_eq!(tpot, 10.0);
    }

    #[test]
    fn cached_tokens_prefers_anthropic_fields() {
        let cached = resolve_cached_tokens(Some(5), Some(2), Some(99), None, None);
        assert_eq!(cached.read, 5);
        assert_eq!(cached.creation, 2);
    }
}
