//! In-memory API-key store: hashed lookup, wildcard key support, and
//! idempotent per-key usage counters.
//!
//! Lookup hashes the presented token with plain SHA-256 rather than a
//! salted scheme. Salting defends passwords against rainbow tables built
//! from a shared low-entropy dictionary; these tokens are operator-issued
//! high-entropy random strings, so a precomputed table isn't a workable
//! attack to begin with.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use async_trait::async_trait;
use context::{ApiKeyError, KeyContext};
use core::apikey::{ApiKeyService, UsageDelta};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

struct KeyRecord {
    enabled: AtomicBool,
    request_count: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl KeyRecord {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            request_count: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        })
    }
}

pub struct InMemoryApiKeyService {
    /// hash(presented token) -> key id.
    by_hash: DashMap<String, String>,
    records: DashMap<String, Arc<KeyRecord>>,
    wildcard_enabled: bool,
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

const WILDCARD_KEY_ID: &str = "wildcard";

impl InMemoryApiKeyService {
    pub fn new(wildcard_enabled: bool) -> Self {
        let records = DashMap::new();
        if wildcard_enabled {
            records.insert(WILDCARD_KEY_ID.to_string(), KeyRecord::new());
        }

        Self {
            by_hash: DashMap::new(),
            records,
            wildcard_enabled,
        }
    }

    /// Registers a raw key under `key_id`; only the salted hash is kept.
    pub fn insert_key(&self, key_id: impl Into<String>, raw_token: &str) {
        let key_id = key_id.into();
        self.by_hash.insert(hash_token(raw_token), key_id.clone());
        self.records.entry(key_id).or_insert_with(KeyRecord::new);
    }

    pub fn disable_key(&self, key_id: &str) {
        if let Some(record) = self.records.get(key_id) {
            record.enabled.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ApiKeyService for InMemoryApiKeyService {
    async fn resolve(&self, presented_token: Option<&str>) -> Result<KeyContext, ApiKeyError> {
        match presented_token {
            Some(token) if !token.is_empty() => {
                let hash = hash_token(token);
                let key_id = self.by_hash.get(&hash).ok_or(ApiKeyError::Unknown)?.clone();
                let record = self.records.get(&key_id).ok_or(ApiKeyError::Unknown)?;

                if !record.enabled.load(Ordering::SeqCst) {
                    return Err(ApiKeyError::Disabled);
                }

                Ok(KeyContext {
                    key_id,
                    is_wildcard: false,
                    byok_secret: None,
                })
            }
            _ => {
                if self.wildcard_enabled {
                    Ok(KeyContext::wildcard())
                } else {
                    Err(ApiKeyError::Missing)
                }
            }
        }
    }

    async fn record_usage(&self, key_id: &str, delta: UsageDelta) {
        let Some(record) = self.records.get(key_id) else {
            log::warn!("record_usage called for unknown key_id '{key_id}'");
            return;
        };

        record.request_count.fetch_add(1, Ordering::SeqCst);
        record.input_tokens.fetch_add(delta.input_tokens as u64, Ordering::SeqCst);
        record.output_tokens.fetch_add(delta.output_tokens as u64, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let service = InMemoryApiKeyService::new(false);
        let err = service.resolve(Some("sk-nope")).await.unwrap_err();
        assert!(matches!(err, ApiKeyError::Unknown));
    }

    #[tokio::test]
    async fn wildcard_accepts_empty_token_when_enabled() {
        let service = InMemoryApiKeyService::new(true);
        let ctx = service.resolve(None).await.unwrap();
        assert!(ctx.is_wildcard);
    }

    #[tokio::test]
    async fn disabled_key_is_rejected() {
        let service = InMemoryApiKeyService::new(false);
        service.insert_key("k1", "sk-test");
        service.disable_key("k1");
        let err = service.resolve(Some("sk-test")).await.unwrap_err();
        assert!(matches!(err, ApiKeyError::Disabled));
    }

    #[tokio::test]
    async fn usage_accumulates_per_key() {
        let service = InMemoryApiKeyService::new(false);
        service.insert_key("k1", "sk-test");
        service
            .record_usage("k1", UsageDelta { input_tokens: 3, output_tokens: 1 })
            .await;
        service
            .record_usage("k1", UsageDelta { input_tokens: 2, output_tokens: 1 })
            .await;

        let record = service.records.get("k1").unwrap();
        assert_eq!(record.request_count.load(Ordering::SeqCst), 2);
        assert_eq!(record.input_tokens.load(Ordering::SeqCst), 5);
    }
}
