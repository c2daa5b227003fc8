//! In-memory request log store. The relational store the real deployment
//! uses is an external collaborator; this implementation exists so the
//! gateway binary has something to log into and so the lifecycle
//! (create → upsert payload → token update → upsert payload → finalize)
//! can be exercised and tested without one.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use core::logger::{FinalizeUpdate, LogHeader, Logger, PayloadUpdate, TokenUpdate};
use dashmap::DashMap;
use uuid::Uuid;

/// Payload capture beyond this many bytes is dropped and `truncated` is set,
/// per the "implementers may cap capture" allowance for stored payloads.
const MAX_CAPTURED_PAYLOAD_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Default)]
pub struct LogRecord {
    pub endpoint: String,
    pub provider: String,
    pub model: String,
    pub client_model: String,
    pub api_key_id: String,
    pub session_id: Option<String>,
    pub stream: bool,

    pub prompt_payload: Option<String>,
    pub response_payload: Option<String>,
    pub truncated: bool,

    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_read_tokens: u32,
    pub cached_creation_tokens: u32,
    pub ttft_ms: Option<f64>,
    pub tpot_ms: Option<f64>,

    pub latency_ms: Option<f64>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub finalized: bool,
}

pub struct InMemoryLogger {
    records: DashMap<String, Mutex<LogRecord>>,
}

impl InMemoryLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { records: DashMap::new() })
    }

    pub fn get(&self, log_id: &str) -> Option<LogRecord> {
        self.records.get(log_id).map(|r| r.lock().unwrap().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn cap_payload(payload: String, truncated: &mut bool) -> String {
    if payload.len() <= MAX_CAPTURED_PAYLOAD_BYTES {
        return payload;
    }
    *truncated = true;
    // Truncate on a char boundary so the captured payload stays valid UTF-8.
    let mut end = MAX_CAPTURED_PAYLOAD_BYTES;
    while !payload.is_char_boundary(end) {
        end -= 1;
    }
    payload[..end].to_string()
}

#[async_trait]
impl Logger for InMemoryLogger {
    async fn create(&self, header: LogHeader) -> String {
        let log_id = Uuid::new_v4().to_string();
        self.records.insert(
            log_id.clone(),
            Mutex::new(LogRecord {
                endpoint: header.endpoint,
                provider: header.provider,
                model: header.model,
                client_model: header.client_model,
                api_key_id: header.api_key_id,
                session_id: header.session_id,
                stream: header.stream,
                ..Default::default()
            }),
        );
        log_id
    }

    async fn upsert_payload(&self, log_id: &str, update: PayloadUpdate) {
        let Some(record) = self.records.get(log_id) else {
            log::warn!("upsert_payload called for unknown log_id '{log_id}'");
            return;
        };
        let mut record = record.lock().unwrap();
        if let Some(prompt) = update.prompt {
            record.prompt_payload = Some(cap_payload(prompt, &mut record.truncated));
        }
        if let Some(response) = update.response {
            record.response_payload = Some(cap_payload(response, &mut record.truncated));
        }
        record.truncated |= update.truncated;
    }

    async fn update_tokens(&self, log_id: &str, update: TokenUpdate) {
        let Some(record) = self.records.get(log_id) else {
            log::warn!("update_tokens called for unknown log_id '{log_id}'");
            return;
        };
        let mut record = record.lock().unwrap();
        record.input_tokens = update.input_tokens;
        record.output_tokens = update.output_tokens;
        record.cached_read_tokens = update.cached_read_tokens;
        record.cached_creation_tokens = update.cached_creation_tokens;
        if update.ttft_ms.is_some() {
            record.ttft_ms = update.ttft_ms;
        }
        if update.tpot_ms.is_some() {
            record.tpot_ms = update.tpot_ms;
        }
    }

    async fn finalize(&self, log_id: &str, update: FinalizeUpdate) {
        let Some(record) = self.records.get(log_id) else {
            log::warn!("finalize called for unknown log_id '{log_id}'");
            return;
        };
        let mut record = record.lock().unwrap();
        if record.finalized {
            return;
        }
        record.latency_ms = Some(update.latency_ms);
        record.status_code = Some(update.status_code);
        record.error = update.error;
        record.finalized = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> LogHeader {
        LogHeader {
            endpoint: "anthropic".to_string(),
            provider: "anthropic-default".to_string(),
            model: "claude-opus-4".to_string(),
            client_model: "claude-opus-4".to_string(),
            api_key_id: "k1".to_string(),
            session_id: None,
            stream: false,
        }
    }

    #[tokio::test]
    async fn lifecycle_round_trip() {
        let logger = InMemoryLogger::new();
        let log_id = logger.create(header()).await;

        logger
            .upsert_payload(&log_id, PayloadUpdate { prompt: Some("hi".into()), ..Default::default() })
            .await;
        logger
            .update_tokens(
                &log_id,
                TokenUpdate { input_tokens: 10, output_tokens: 5, ..Default::default() },
            )
            .await;
        logger
            .upsert_payload(&log_id, PayloadUpdate { response: Some("there".into()), ..Default::default() })
            .await;
        logger
            .finalize(&log_id, FinalizeUpdate { latency_ms: 12.5, status_code: 200, error: None })
            .await;

        let record = logger.get(&log_id).unwrap();
        assert_eq!(record.prompt_payload.as_deref(), Some("hi"));
        assert_eq!(record.response_payload.as_deref(), Some("there"));
        assert_eq!(record.output_tokens, 5);
        assert_eq!(record.status_code, Some(200));
        assert!(record.finalized);
    }

    #[tokio::test]
    async fn finalize_is_idempotent() {
        let logger = InMemoryLogger::new();
        let log_id = logger.create(header()).await;

        logger
            .finalize(&log_id, FinalizeUpdate { latency_ms: 1.0, status_code: 200, error: None })
            .await;
        logger
            .finalize(&log_id, FinalizeUpdate { latency_ms: 999.0, status_code: 500, error: Some("late".into()) })
            .await;

        let record = logger.get(&log_id).unwrap();
        assert_eq!(record.status_code, Some(200));
    }

    #[tokio::test]
    async fn oversized_payload_is_truncated_and_flagged() {
        let logger = InMemoryLogger::new();
        let log_id = logger.create(header()).await;

        let huge = "x".repeat(MAX_CAPTURED_PAYLOAD_BYTES + 1024);
        logger
            .upsert_payload(&log_id, PayloadUpdate { prompt: Some(huge), ..Default::default() })
            .await;

        let record = logger.get(&log_id).unwrap();
        assert!(record.truncated);
        assert_eq!(record.prompt_payload.unwrap().len(), MAX_CAPTURED_PAYLOAD_BYTES);
    }
}
