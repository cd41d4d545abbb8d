//! Prometheus metrics for the hub's read surface.
//!
//! Provides automatic HTTP request tracking (count, duration, in-flight
//! gauge) plus a `/metrics` handler, as a Tower layer the embedding
//! process attaches to its own router — the hub itself stays transport-
//! agnostic and never builds a router.
//!
//! # Usage
//!
//! ```rust,ignore
//! use r2e_prometheus::PrometheusMetrics;
//!
//! let metrics = PrometheusMetrics::new().with_namespace("r2e_hub");
//! metrics.install();
//! let router = axum::Router::new()
//!     .route("/metrics", axum::routing::get(r2e_prometheus::metrics_handler))
//!     .layer(metrics.layer());
//! ```
//!
//! # Metrics
//!
//! - `http_requests_total` — counter with labels: method, path, status
//! - `http_request_duration_seconds` — histogram with labels: method, path
//! - `http_requests_in_flight` — gauge of concurrent requests

mod handler;
mod layer;
mod metrics;

pub use handler::metrics_handler;
pub use layer::PrometheusLayer;
pub use metrics::{encode_metrics, init_metrics, metrics as global_metrics, Metrics, MetricsConfig};

/// Builder for the HTTP metrics layer and its backing registry.
///
/// `install()` initialises the global metrics registry exactly once; later
/// calls are no-ops against the already-initialised instance, matching
/// [`std::sync::OnceLock`]'s semantics.
#[derive(Clone, Default)]
pub struct PrometheusMetrics {
    config: MetricsConfig,
}

impl PrometheusMetrics {
    /// Create metrics configuration with default buckets and no namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every metric name with `namespace_` (e.g. `r2e_hub_http_requests_total`).
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.config.namespace = Some(namespace.to_string());
        self
    }

    /// Override the request-duration histogram buckets (seconds).
    pub fn with_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.config.buckets = buckets;
        self
    }

    /// Exclude paths from tracking (e.g. the `/metrics` endpoint itself).
    pub fn exclude_paths(mut self, paths: &[&str]) -> Self {
        self.config.exclude_paths = paths.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Initialise the global metrics registry. Call once at startup before
    /// attaching [`layer`](Self::layer) or serving [`metrics_handler`].
    pub fn install(&self) -> &'static Metrics {
        init_metrics(&self.config)
    }

    /// The Tower layer that records request count, duration, and in-flight
    /// gauge for every request it wraps.
    pub fn layer(&self) -> PrometheusLayer {
        PrometheusLayer::new(self.config.clone())
    }
}
