//! The interface the handler consults before routing, an unauthenticated
//! call must never reach the router or an upstream. The implementation
//! (hash storage, wildcard key, usage persistence) lives in the store
//! crate; this crate only depends on the trait.

use async_trait::async_trait;
use context::{ApiKeyError, KeyContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct UsageDelta {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[async_trait]
pub trait ApiKeyService: Send + Sync {
    async fn resolve(&self, presented_token: Option<&str>) -> Result<KeyContext, ApiKeyError>;

    async fn record_usage(&self, key_id: &str, delta: UsageDelta);
}

/// Strips the `Bearer ` prefix from an `Authorization` header value, if
/// present; used by the handler before calling `resolve`.
pub fn strip_bearer_prefix(value: &str) -> &str {
    value.strip_prefix("Bearer ").unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bearer_prefix_when_present() {
        assert_eq!(strip_bearer_prefix("Bearer sk-test"), "sk-test");
        assert_eq!(strip_bearer_prefix("sk-test"), "sk-test");
    }
}
