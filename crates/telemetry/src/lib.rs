//! Metrics plumbing for the gateway's hot path.
//!
//! Trimmed to what the request handler's `FinalizeGuard` needs: a process
//! global meter and the `gen_ai.*` attribute names used to tag the
//! duration/token-usage histograms. Export wiring (OTLP, stdout) is left to
//! whoever embeds this crate in a real deployment; by default metrics are
//! recorded into an in-process provider with no exporter attached, so the
//! gateway runs without a collector present.

pub mod attributes;

use std::sync::OnceLock;

use opentelemetry_sdk::{Resource, metrics::SdkMeterProvider};

pub use opentelemetry::{KeyValue, metrics::Histogram};
pub use opentelemetry::metrics::Meter;

const METER_NAME: &str = "cc-gw";

static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

fn provider() -> &'static SdkMeterProvider {
    METER_PROVIDER.get_or_init(|| {
        SdkMeterProvider::builder()
            .with_resource(Resource::builder().with_service_name("cc-gw").build())
            .build()
    })
}

/// The meter every metrics recorder in the gateway pulls histograms from.
pub fn meter() -> Meter {
    provider().meter(METER_NAME)
}

/// Standard metric names, following OpenTelemetry's GenAI semantic
/// conventions.
pub mod metrics {
    pub const GEN_AI_CLIENT_OPERATION_DURATION: &str = "gen_ai.client.operation.duration";
    pub const GEN_AI_CLIENT_TOKEN_USAGE: &str = "gen_ai.client.token.usage";
}
