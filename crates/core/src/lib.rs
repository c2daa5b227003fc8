//! The hot request path: protocol normalization, routing, translation,
//! connector dispatch and log/usage bookkeeping. Axum wiring and the
//! listening socket live in the binary crate; this crate is transport-
//! agnostic.

pub mod apikey;
pub mod connector;
pub mod error;
pub mod handler;
pub mod logger;
pub mod messages;
pub mod model;
pub mod normalize;
pub mod router;
pub mod tokens;
pub mod translate;

pub use error::{GatewayError, Result};
pub use handler::{NonStreamOutcome, RequestContext, RequestHandler, StreamOutcome};
