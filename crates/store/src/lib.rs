//! In-memory stand-ins for the two persistence interfaces the core crate
//! consumes: API-key resolution/usage and request logging. A real
//! deployment backs these with a relational store; this crate gives the
//! gateway binary something to run against out of the box.

pub mod keys;
pub mod logger;

pub use keys::InMemoryApiKeyService;
pub use logger::InMemoryLogger;
