//! Observability bootstrap for the hub process.
//!
//! Provides distributed tracing via OpenTelemetry, context propagation,
//! and a Tower middleware layer for the thin read surface
//! the hub exposes over HTTP.
//!
//! # Usage
//!
//! ```rust,ignore
//! use r2e_observability::{Observability, ObservabilityConfig};
//!
//! let observability = Observability::new(
//!     ObservabilityConfig::new("r2e-hub").with_endpoint("http://otel-collector:4317"),
//! );
//! let _guard = observability.install();
//! let router = axum::Router::new().layer(observability.trace_layer());
//! ```

pub mod config;
pub mod middleware;
pub mod propagation;
pub mod tracing_setup;

pub use config::{LogFormat, ObservabilityConfig, OtlpProtocol, PropagationFormat};
pub use tracing_setup::OtelGuard;

use tower_http::trace::TraceLayer;

/// Observability bootstrap: OpenTelemetry tracing, context propagation, and
/// HTTP request logging for the hub's read surface.
///
/// 1. Installs a W3C `traceparent` propagator for cross-service context.
/// 2. Initialises a `tracing-subscriber` stack (fmt layer + OTel layer).
/// 3. `trace_layer()` hands back a tower-http `TraceLayer` plus an
///    `OtelTraceLayer` to attach to the read-surface router.
pub struct Observability {
    config: ObservabilityConfig,
}

impl Observability {
    /// Create a new observability bootstrap with the given configuration.
    pub fn new(config: ObservabilityConfig) -> Self {
        Self { config }
    }

    /// Create from R2eConfig (reads `observability.*` keys).
    pub fn from_config(r2e_config: &r2e_core::R2eConfig, service_name: &str) -> Self {
        Self {
            config: ObservabilityConfig::from_r2e_config(r2e_config, service_name),
        }
    }

    /// Install the global propagator and, if enabled, the tracing/OTel
    /// subscriber stack. Returns a guard that flushes pending traces on
    /// drop; hold it for the process lifetime.
    pub fn install(&self) -> Option<OtelGuard> {
        propagation::install_propagator(&self.config);
        if self.config.tracing_enabled {
            Some(tracing_setup::init_tracing(&self.config))
        } else {
            None
        }
    }

    /// The request-logging middleware for the read surface: a tower-http
    /// `TraceLayer` plus an OTel span-creating layer, in that order.
    pub fn trace_layer(&self) -> tower::ServiceBuilder<
        tower::layer::util::Stack<
            middleware::OtelTraceLayer,
            tower::layer::util::Stack<TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>, tower::layer::util::Identity>,
        >,
    > {
        tower::ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(middleware::OtelTraceLayer::new(self.config.capture_headers.clone()))
    }
}
