//! Configuration types for `cc-gw`.
//!
//! This crate is the narrow interface boundary to the on-disk config file.
//! The rest of the gateway only ever sees a [`ConfigSnapshot`], never the
//! raw TOML.

mod endpoints;
mod error;
mod header_rule;
mod loader;
mod providers;
mod routing;
mod snapshot;

pub use endpoints::{CustomEndpointConfig, EndpointKind};
pub use error::Error;
pub use header_rule::HeaderRule;
pub use providers::{AuthMode, ProviderConfig, UpstreamType};
pub use routing::{RouteDefaults, RouteModel, RouteTarget, RoutingTable};
pub use snapshot::ConfigSnapshot;

pub use loader::load;
