//! The logging interface the handler drives through the create →
//! upsert-payload → update-tokens → upsert-payload → finalize lifecycle.
//! The store crate supplies the implementation; core only sees the trait.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct LogHeader {
    pub endpoint: String,
    pub provider: String,
    pub model: String,
    pub client_model: String,
    pub api_key_id: String,
    pub session_id: Option<String>,
    pub stream: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PayloadUpdate {
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUpdate {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_read_tokens: u32,
    pub cached_creation_tokens: u32,
    pub ttft_ms: Option<f64>,
    pub tpot_ms: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct FinalizeUpdate {
    pub latency_ms: f64,
    pub status_code: u16,
    pub error: Option<String>,
}

#[async_trait]
pub trait Logger: Send + Sync {
    async fn create(&self, header: LogHeader) -> String;
    async fn upsert_payload(&self, log_id: &str, update: PayloadUpdate);
    async fn update_tokens(&self, log_id: &str, update: TokenUpdate);
    async fn finalize(&self, log_id: &str, update: FinalizeUpdate);
}
