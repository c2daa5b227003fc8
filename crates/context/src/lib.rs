//! Cross-cutting identity types shared between the API-key resolver and the
//! request handler.

mod client_identity;
mod key_context;

pub use client_identity::ClientIdentity;
pub use key_context::{ApiKeyError, KeyContext};
