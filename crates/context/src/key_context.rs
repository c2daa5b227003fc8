use secrecy::SecretString;

/// Identity resolved from an inbound `Authorization`/`x-api-key` header.
///
/// Carried on the request for the lifetime of the handler: usage recording
/// and logging both key off `key_id`.
#[derive(Debug, Clone)]
pub struct KeyContext {
    pub key_id: String,
    pub is_wildcard: bool,
    /// Present only when the caller presented a provider-specific key via
    /// `X-Provider-API-Key`, overriding the configured provider secret.
    pub byok_secret: Option<SecretString>,
}

impl KeyContext {
    pub fn wildcard() -> Self {
        Self {
            key_id: "wildcard".to_string(),
            is_wildcard: true,
            byok_secret: None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiKeyError {
    #[error("no api key presented")]
    Missing,
    #[error("unknown api key")]
    Unknown,
    #[error("api key disabled")]
    Disabled,
}
