//! Test harness for integration-style tests of the hub's
//! ingestion -> queue -> store -> publish pipeline, without any
//! network I/O: no real MQTT/Socket.IO transport, no real database.
//!
//! [`TestHub`] wraps an in-memory [`r2e::Hub`] built over
//! [`r2e_data::InMemoryRealtimeStore`] and [`r2e_data::NoopHistoricalStore`],
//! with a small default [`r2e_core::hierarchy::HierarchyConfiguration`]
//! already active, so a test can call [`TestHub::ingest_and_drain`] and
//! assert on the result without any setup boilerplate.

use std::time::Duration;

use r2e::{Hub, HubConfig};
use r2e_core::hierarchy::{HierarchyConfiguration, HierarchyNode};
use r2e_core::{AppError, HierarchyRegistry};

/// An in-memory [`Hub`] with a default three-level hierarchy
/// (Enterprise/Site/Area) already active, suitable for integration tests.
pub struct TestHub {
    pub hub: Hub,
}

impl TestHub {
    /// Build a `TestHub` with the default hierarchy and [`HubConfig`].
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    pub fn with_config(config: HubConfig) -> Self {
        let hub = r2e::in_memory(config, default_hierarchy());
        Self { hub }
    }

    /// Build a `TestHub` over a caller-supplied hierarchy (e.g. to exercise
    /// a non-default template, or rejection paths on hierarchy mismatch).
    pub fn with_hierarchy(config: HubConfig, hierarchy: HierarchyRegistry) -> Self {
        Self { hub: r2e::in_memory(config, hierarchy) }
    }

    /// Start the hub's queue processor and scheduler jobs. Call before
    /// ingesting.
    pub async fn start(&self) {
        self.hub.start().await;
    }

    pub async fn stop(&self) {
        self.hub.stop().await;
    }

    /// Ingest one payload and wait (bounded) for the queue processor to
    /// drain it: realtime store write, cache warm, `TopicDataUpdatedEvent`,
    /// and output evaluation have all happened by the time this returns,
    /// letting a test assert on their effects without a flaky sleep.
    pub async fn ingest_and_drain(
        &self,
        connection_id: &str,
        source_type: &str,
        base_topic: &str,
        payload: &[u8],
    ) -> Result<usize, AppError> {
        let before = self.hub.queue_statistics();
        let enqueued = self
            .hub
            .ingest(connection_id, source_type, base_topic, payload)
            .await?;
        self.wait_for_drain(before.processed + enqueued as u64).await;
        Ok(enqueued)
    }

    /// Poll `queue_statistics()` until at least `target` items have been
    /// processed, or give up after a bounded number of attempts. Avoids a
    /// fixed sleep racing the queue processor's worker tasks.
    async fn wait_for_drain(&self, target: u64) {
        for _ in 0..200 {
            if self.hub.queue_statistics().processed >= target {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Default for TestHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Enterprise(0, required) / Site(1) / Area(2), all `allow_topics = true` -
/// mirrors a typical plant hierarchy (`"Acme/Plant1/Line3"`).
pub fn default_hierarchy() -> HierarchyRegistry {
    let registry = HierarchyRegistry::new();
    registry.register(
        HierarchyConfiguration::new(
            "test-default",
            "default",
            vec![
                HierarchyNode {
                    id: "enterprise".into(),
                    name: "Enterprise".into(),
                    order: 0,
                    required: true,
                    parent_id: None,
                    allowed_child_ids: vec!["site".into()],
                    allow_topics: true,
                    description: None,
                },
                HierarchyNode {
                    id: "site".into(),
                    name: "Site".into(),
                    order: 1,
                    required: false,
                    parent_id: Some("enterprise".into()),
                    allowed_child_ids: vec!["area".into()],
                    allow_topics: true,
                    description: None,
                },
                HierarchyNode {
                    id: "area".into(),
                    name: "Area".into(),
                    order: 2,
                    required: false,
                    parent_id: Some("site".into()),
                    allowed_child_ids: vec![],
                    allow_topics: true,
                    description: None,
                },
            ],
            true,
        )
        .expect("default test hierarchy is well-formed"),
    );
    registry
}
