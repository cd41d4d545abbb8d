//! The assembled UNS hub process.
//!
//! [`Hub`] owns every leaf component — event bus, hierarchy/namespace
//! registry, topic repository, auto-mapper, multi-level cache, connection
//! manager, parallel queue processor, output publisher, scheduler — and
//! wires the leaf-first control flow:
//!
//! ```text
//! transport event -> ingestion decode -> per-leaf auto-map/lookup
//!   -> DataReceived -> queue processor
//!   -> realtime store write + TopicDataUpdatedEvent
//!   -> (a) cache invalidation, (b) export services evaluate and publish
//! ```
//!
//! Concrete connections (MQTT, Socket.IO, Kafka, ...) push `DataPoint`s in
//! through [`Hub::ingest`]; the hub never talks to a transport directly,
//! matching the fixed-surface boundary kept around wire-protocol client
//! libraries.

pub mod ingestion;
pub mod outputs;
pub mod query;

#[cfg(feature = "mqtt")]
pub use r2e_connections_mqtt;

#[cfg(feature = "socketio")]
pub use r2e_connections_socketio;

#[cfg(feature = "kafka")]
pub use r2e_events_kafka;

#[cfg(feature = "rabbitmq")]
pub use r2e_events_rabbitmq;

#[cfg(feature = "pulsar")]
pub use r2e_events_pulsar;

#[cfg(feature = "iggy")]
pub use r2e_events_iggy;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use r2e_cache::{CacheConfig, MultiLevelCache};
use r2e_core::automap::{AutoMapConfig, AutoMapper};
use r2e_core::connection::{Connection, ConnectionManager, OutputConfiguration};
use r2e_core::error::AppError;
use r2e_core::events::TopicDataUpdatedEvent;
use r2e_core::namespace::NamespaceRegistry;
use r2e_core::topic::{TopicConfiguration, TopicConfigurationRepository};
use r2e_core::{DataPoint, HierarchyRegistry};
use r2e_data::{HistoricalStore, NoopHistoricalStore, RealtimeStore};
use r2e_events::EventBus;
use r2e_executor::{ParallelQueueProcessor, ProcessorFn, QueueConfig};
use r2e_rate_limit::{InMemoryRateLimiter, RateLimitRegistry};
use r2e_scheduler::Scheduler;

use outputs::RegisteredOutput;

pub use r2e_core::publisher::OutputPublisher;

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Periodic historical-retention sweep: every `interval`, archive
/// everything older than `retention` out of the historical store.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveConfig {
    pub interval: Duration,
    pub retention: Duration,
}

/// Static configuration the hub is constructed with. Connection configs
/// are supplied separately through [`Hub::connect`], since each connection
/// type has its own `typedConfig` shape.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub automap: AutoMapConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    /// Maximum leaf messages accepted per connection per second before
    /// `ingest` starts rejecting with a `Transport` error. Uses the
    /// `r2e-rate-limit` token bucket, applied here to inbound-connection
    /// throttling rather than the output side's `minEmitIntervalMs` gate.
    pub max_ingest_per_connection_per_sec: u64,
    /// Bounded retry count for realtime-store writes.
    pub store_retry_attempts: u32,
    /// Historical-retention sweep schedule. `None` disables it — the
    /// scheduler never registers the job and `historical.archive` is only
    /// reachable through [`Hub::archive_now`].
    pub archive: Option<ArchiveConfig>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            automap: AutoMapConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            max_ingest_per_connection_per_sec: 10_000,
            store_retry_attempts: 3,
            archive: None,
        }
    }
}

/// The whole running hub. Cheaply cloneable — every field is an
/// `Arc` or a handle over shared state, following the familiar
/// `AppState`-style composition root.
#[derive(Clone)]
pub struct Hub {
    pub bus: EventBus,
    pub hierarchy: Arc<HierarchyRegistry>,
    pub namespace: Arc<NamespaceRegistry>,
    pub topics: Arc<TopicConfigurationRepository>,
    pub automapper: Arc<AutoMapper>,
    pub connections: Arc<ConnectionManager>,
    pub cache_topics: Arc<MultiLevelCache<TopicConfiguration>>,
    pub cache_latest: Arc<MultiLevelCache<DataPoint>>,
    pub realtime: Arc<dyn RealtimeStore>,
    pub historical: Arc<dyn HistoricalStore>,
    pub publisher: Arc<OutputPublisher>,
    ingest_limiter: RateLimitRegistry,
    queue: Arc<ParallelQueueProcessor<DataPoint>>,
    scheduler: Arc<Scheduler>,
    outputs: Arc<DashMap<(String, String), RegisteredOutput>>,
    config: HubConfig,
}

impl Hub {
    /// Assemble the hub over caller-supplied stores. `historical` may be
    /// [`r2e_data::NoopHistoricalStore`] to disable historical persistence
    /// globally.
    pub fn new(
        config: HubConfig,
        hierarchy: HierarchyRegistry,
        realtime: Arc<dyn RealtimeStore>,
        historical: Arc<dyn HistoricalStore>,
    ) -> Self {
        let bus = EventBus::new();
        let hierarchy = Arc::new(hierarchy);
        let namespace = Arc::new(NamespaceRegistry::new());
        let topics = Arc::new(TopicConfigurationRepository::new(bus.clone()));
        let automapper = Arc::new(AutoMapper::new(
            hierarchy.clone(),
            namespace.clone(),
            topics.clone(),
            bus.clone(),
            config.automap.clone(),
        ));
        let connections = Arc::new(ConnectionManager::new(bus.clone()));
        let publisher = Arc::new(OutputPublisher::new());
        let outputs: Arc<DashMap<(String, String), RegisteredOutput>> = Arc::new(DashMap::new());
        let scheduler = Arc::new(Scheduler::new());
        let ingest_limiter = RateLimitRegistry::new(InMemoryRateLimiter::new());

        let cache_topics = {
            let topics = topics.clone();
            Arc::new(MultiLevelCache::new(
                config.cache,
                Arc::new(move |key: String| {
                    let topics = topics.clone();
                    Box::pin(async move { topics.by_topic(&key) })
                }),
            ))
        };

        let cache_latest = {
            let realtime = realtime.clone();
            Arc::new(MultiLevelCache::new(
                config.cache,
                Arc::new(move |key: String| {
                    let realtime = realtime.clone();
                    Box::pin(async move { realtime.get_latest(&key).await.ok().flatten() })
                }),
            ))
        };

        let queue = Arc::new(ParallelQueueProcessor::new(
            config.queue,
            Self::build_processor(
                realtime.clone(),
                historical.clone(),
                bus.clone(),
                cache_latest.clone(),
                outputs.clone(),
                publisher.clone(),
                config.store_retry_attempts,
            ),
        ));

        let hub = Self {
            bus,
            hierarchy,
            namespace,
            topics,
            automapper,
            connections,
            cache_topics,
            cache_latest,
            realtime,
            historical,
            publisher,
            ingest_limiter,
            queue,
            scheduler,
            outputs,
            config,
        };
        hub.wire_cache_invalidation();
        hub
    }

    /// The processor function handed to the queue: one ingested
    /// `DataPoint` per call. Failures never kill the lane — every branch
    /// that can fail degrades according to its error kind instead of
    /// returning `Err` upward, except genuinely cancelled work.
    fn build_processor(
        realtime: Arc<dyn RealtimeStore>,
        historical: Arc<dyn HistoricalStore>,
        bus: EventBus,
        cache_latest: Arc<MultiLevelCache<DataPoint>>,
        outputs: Arc<DashMap<(String, String), RegisteredOutput>>,
        publisher: Arc<OutputPublisher>,
        store_retry_attempts: u32,
    ) -> ProcessorFn<DataPoint> {
        Arc::new(move |point: DataPoint| {
            let realtime = realtime.clone();
            let historical = historical.clone();
            let bus = bus.clone();
            let cache_latest = cache_latest.clone();
            let outputs = outputs.clone();
            let publisher = publisher.clone();
            Box::pin(async move {
                store_with_bounded_retry(&*realtime, &point, store_retry_attempts).await;

                // Historical persistence is best-effort and may be a no-op
                // store entirely; failures are
                // logged, never block the realtime path.
                if let Err(err) = historical.store(&point).await {
                    tracing::warn!(topic = %point.source_topic, error = %err, "historical store write failed");
                }

                cache_latest.warm(&point.source_topic, point.clone(), true);

                bus.emit(TopicDataUpdatedEvent {
                    topic: point.source_topic.clone(),
                    point: point.clone(),
                })
                .await;

                outputs::evaluate_and_publish(&outputs, &publisher, &point).await;
                Ok(())
            })
        })
    }

    /// Subscribe the caches to the bus, so cached reads never go stale:
    /// `TopicAddedEvent` warms the topic cache;
    /// `TopicConfigurationUpdatedEvent`/`TopicRemovedEvent` evict from
    /// every tier, so a subsequent `get` never sees the stale value.
    fn wire_cache_invalidation(&self) {
        let cache_topics = self.cache_topics.clone();
        let cache_latest = self.cache_latest.clone();
        let bus = self.bus.clone();
        let added_cache = cache_topics.clone();
        tokio::spawn(async move {
            bus.subscribe::<r2e_core::events::TopicAddedEvent, _, _>("cache-invalidation::topic-added", move |event| {
                let cache = added_cache.clone();
                async move {
                    cache.warm(&event.topic.topic, event.topic.clone(), true);
                }
            })
            .await;
        });

        let bus = self.bus.clone();
        let updated_topics = cache_topics.clone();
        let updated_latest = cache_latest.clone();
        tokio::spawn(async move {
            bus.subscribe::<r2e_core::events::TopicConfigurationUpdatedEvent, _, _>(
                "cache-invalidation::topic-updated",
                move |event| {
                    let topics = updated_topics.clone();
                    let latest = updated_latest.clone();
                    async move {
                        topics.invalidate(&event.topic.topic);
                        latest.invalidate(&event.topic.topic);
                    }
                },
            )
            .await;
        });

        let bus = self.bus.clone();
        let removed_topics = cache_topics;
        let removed_latest = cache_latest;
        tokio::spawn(async move {
            bus.subscribe::<r2e_core::events::TopicRemovedEvent, _, _>(
                "cache-invalidation::topic-removed",
                move |event| {
                    let topics = removed_topics.clone();
                    let latest = removed_latest.clone();
                    async move {
                        topics.invalidate(&event.topic);
                        latest.invalidate(&event.topic);
                    }
                },
            )
            .await;
        });
    }

    /// Start the queue processor and the periodic maintenance/warming/
    /// model-republish jobs.
    pub async fn start(&self) {
        self.queue.start().await;
        ingestion::register_cache_jobs(
            &self.scheduler,
            self.config.cache,
            self.cache_topics.clone(),
            self.cache_latest.clone(),
        );
        outputs::register_model_republish(
            &self.scheduler,
            self.outputs.clone(),
            self.namespace.clone(),
            self.hierarchy.clone(),
        );
        if let Some(archive) = self.config.archive {
            ingestion::register_archive_job(&self.scheduler, self.historical.clone(), archive);
        }
    }

    /// Run the historical-retention sweep once, outside its schedule.
    /// Backs the CLI's `archive` subcommand and lets operators trigger a
    /// one-off prune without waiting on `HubConfig::archive`'s interval.
    pub async fn archive_now(&self, retention: Duration) -> Result<u64, AppError> {
        let before_ms = now_millis().saturating_sub(retention.as_millis() as i64);
        self.historical
            .archive(before_ms)
            .await
            .map_err(|err| AppError::Store(err.to_string()))
    }

    /// Stop the queue processor (draining in-flight items) and cancel every
    /// scheduled job.
    pub async fn stop(&self) {
        self.scheduler.shutdown().await;
        self.queue.stop().await;
    }

    /// Decode one transport message into leaf `DataPoint`s, auto-map each,
    /// and enqueue it onto the parallel queue processor. Returns the number of leaves enqueued.
    pub async fn ingest(
        &self,
        connection_id: &str,
        source_type: &str,
        base_topic: &str,
        payload: &[u8],
    ) -> Result<usize, AppError> {
        if !self.ingest_limiter.try_acquire(
            connection_id,
            self.config.max_ingest_per_connection_per_sec,
            1,
        ) {
            return Err(AppError::Transport(format!(
                "connection '{connection_id}' exceeded its ingest rate limit"
            )));
        }

        let leaves = r2e_utils::decode_leaves_from_bytes(base_topic, payload)
            .ok_or_else(|| AppError::Decode(format!("could not parse payload for '{base_topic}'")))?;

        let now = now_millis();
        let mut enqueued = 0usize;
        for leaf in leaves {
            let topic_config = self.resolve_topic(&leaf.topic, source_type).await;

            let mut point = DataPoint::new(
                leaf.topic.clone(),
                leaf.value,
                connection_id,
                source_type,
                leaf.timestamp_ms.unwrap_or(now),
            );
            if let Some(cfg) = topic_config.as_ref().filter(|c| !c.ns_path.is_empty()) {
                point = point.mapped_to(cfg.ns_path.clone());
            }

            self.queue.enqueue(point, false).await?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Resolve one raw leaf topic to a `TopicConfiguration`: auto-map first
    ///, else fall back to unverified discovery so operators can
    /// triage it later.
    async fn resolve_topic(&self, topic: &str, source_type: &str) -> Option<TopicConfiguration> {
        if let Some(existing) = self.topics.by_topic_and_source(topic, source_type) {
            return Some(existing);
        }
        if let Some(mapped) = self.automapper.map(topic, source_type).await {
            return Some(mapped);
        }
        self.automapper.discover_unverified(topic, source_type).await.ok()
    }

    /// Register a connection's outbound publication rules for evaluation by
    /// the change-detection + rate-limited publisher.
    /// Must be called after the connection accepts the output via
    /// [`r2e_core::connection::Connection::configure_output`].
    pub fn register_output(&self, connection: Arc<dyn Connection>, config: OutputConfiguration) {
        self.outputs.insert(
            (connection.connection_id().to_string(), config.id.clone()),
            RegisteredOutput { connection, config },
        );
    }

    pub fn unregister_output(&self, connection_id: &str, output_id: &str) {
        self.outputs
            .remove(&(connection_id.to_string(), output_id.to_string()));
    }

    /// Point-in-time counters for the queue processor.
    pub fn queue_statistics(&self) -> r2e_executor::Statistics {
        self.queue.statistics()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

/// Bounded retry with a small fixed backoff for contention-shaped store
/// errors. After exhausting attempts the error is
/// logged and the write is dropped — the caller (the queue processor) still
/// proceeds to deliver the point to subscribers, per spec.
async fn store_with_bounded_retry(store: &dyn RealtimeStore, point: &DataPoint, attempts: u32) {
    let mut attempt = 0u32;
    loop {
        match store.store(point).await {
            Ok(()) => return,
            Err(err) => {
                attempt += 1;
                if attempt >= attempts.max(1) {
                    tracing::warn!(
                        topic = %point.source_topic,
                        error = %err,
                        attempts = attempt,
                        "realtime store write failed; dropping from write path"
                    );
                    return;
                }
                tokio::time::sleep(Duration::from_millis(25 * attempt as u64)).await;
            }
        }
    }
}

/// A default, fully in-memory hub suitable for tests and small
/// deployments: no realtime persistence beyond the process lifetime
/// (backed by the cache's own repository hook) and no historical store.
pub fn in_memory(config: HubConfig, hierarchy: HierarchyRegistry) -> Hub {
    Hub::new(
        config,
        hierarchy,
        Arc::new(r2e_data::InMemoryRealtimeStore::default()),
        Arc::new(NoopHistoricalStore),
    )
}
