//! Domain event types carried over the event bus.
//!
//! The bus mechanism itself ([`r2e_events::EventBus`]) is generic and knows
//! nothing about these types — it dispatches by Rust type id. Listing the
//! event types here, next to the domain model that produces them, is what
//! lets a subscriber write `bus.subscribe::<TopicAddedEvent, _, _>(key, ...)`
//! without any reflection at publish time.

use crate::datapoint::DataPoint;
use crate::hierarchy::HierarchicalPath;
use crate::topic::TopicConfiguration;

/// A new [`TopicConfiguration`] was registered (by discovery, auto-map, or
/// an operator verifying a topic).
#[derive(Debug, Clone)]
pub struct TopicAddedEvent {
    pub topic: TopicConfiguration,
}

/// A topic's latest value changed. Carries the point itself so subscribers
/// (the cache, export services) don't need a second read.
#[derive(Debug, Clone)]
pub struct TopicDataUpdatedEvent {
    pub topic: String,
    pub point: DataPoint,
}

/// An existing [`TopicConfiguration`] was modified (verification, path
/// reassignment, metadata edit).
#[derive(Debug, Clone)]
pub struct TopicConfigurationUpdatedEvent {
    pub topic: TopicConfiguration,
}

/// A topic configuration was deleted.
#[derive(Debug, Clone)]
pub struct TopicRemovedEvent {
    pub topic: String,
}

/// The auto-mapper rejected a topic: below-confidence match or a resolved
/// path whose deepest level disallows topics.
#[derive(Debug, Clone)]
pub struct AutoMappingFailedEvent {
    pub source_topic: String,
    pub reason: String,
    pub suggestions: Vec<String>,
}

/// A connection transitioned state.
#[derive(Debug, Clone)]
pub struct StatusChangedEvent {
    pub connection_id: String,
    pub old_state: crate::connection::ConnectionState,
    pub new_state: crate::connection::ConnectionState,
    pub message: Option<String>,
    pub timestamp: i64,
}

/// A connection decoded a wire message into a leaf [`DataPoint`].
#[derive(Debug, Clone)]
pub struct DataReceivedEvent {
    pub point: DataPoint,
    pub input_id: String,
}

/// A `HierarchyConfiguration` was swapped active.
#[derive(Debug, Clone)]
pub struct HierarchyActivatedEvent {
    pub config_id: String,
}

/// Helper used by discovery/auto-map callers who only have a raw topic
/// string and want to know which namespace path it would land under once
/// mapped — purely a label, not part of the event bus contract.
#[derive(Debug, Clone)]
pub struct ResolvedPlacement {
    pub ns_path: String,
    pub path: HierarchicalPath,
}
