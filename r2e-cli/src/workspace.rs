//! Loads a workspace file and replays its sample messages through an in-memory
//! [`r2e::Hub`] so the rest of the CLI can inspect the result.
//!
//! A workspace file is the operator-facing JSON document the CLI reads and
//! writes: the active hierarchy template, optional auto-mapper tuning, and
//! a batch of sample ingest messages to replay (standing in for live
//! connection traffic, since the hub itself never talks to a transport
//! directly — wire protocols live entirely in pluggable connection crates).

use std::path::Path;
use std::time::Duration;

use r2e_core::automap::AutoMapConfig;
use r2e_core::connection::ConnectionConfiguration;
use r2e_core::hierarchy::HierarchyConfiguration;
use r2e_core::HierarchyRegistry;
use r2e::{Hub, HubConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct SampleMessage {
    pub connection_id: String,
    pub source_type: String,
    pub base_topic: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkspaceFile {
    pub hierarchy: HierarchyConfiguration,
    #[serde(default)]
    pub automap: Option<AutoMapConfig>,
    #[serde(default)]
    pub samples: Vec<SampleMessage>,
    /// Connection descriptors to validate; not started, since
    /// the CLI replays data through `Hub::ingest` directly rather than a
    /// live transport.
    #[serde(default)]
    pub connections: Vec<ConnectionConfiguration>,
}

pub fn load(path: &Path) -> Result<WorkspaceFile, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read {}: {e}", path.display()))?;
    let workspace: WorkspaceFile = serde_json::from_str(&text)
        .map_err(|e| format!("could not parse {}: {e}", path.display()))?;

    // Deserialization bypasses `HierarchyConfiguration::new`'s duplicate-order
    // check, so re-run it explicitly before the file is trusted.
    HierarchyConfiguration::new(
        workspace.hierarchy.id.clone(),
        workspace.hierarchy.name.clone(),
        workspace.hierarchy.levels().to_vec(),
        workspace.hierarchy.is_system_defined,
    )
    .map_err(|e| format!("invalid hierarchy in {}: {e}", path.display()))?;

    Ok(workspace)
}

/// Build an in-memory hub from `workspace.hierarchy`/`workspace.automap`,
/// start it, replay every sample message through [`Hub::ingest`], wait for
/// the queue to drain, and return the running hub for the caller to
/// inspect and eventually `stop()`.
pub async fn build_and_replay(workspace: &WorkspaceFile) -> Result<Hub, Box<dyn std::error::Error>> {
    let registry = HierarchyRegistry::new();
    registry.register(workspace.hierarchy.clone());

    let mut config = HubConfig::default();
    if let Some(automap) = &workspace.automap {
        config.automap = automap.clone();
    }

    let hub = r2e::in_memory(config, registry);
    hub.start().await;

    let mut enqueued_total = 0u64;
    for sample in &workspace.samples {
        let payload = serde_json::to_vec(&sample.payload)?;
        let enqueued = hub
            .ingest(&sample.connection_id, &sample.source_type, &sample.base_topic, &payload)
            .await?;
        enqueued_total += enqueued as u64;
    }

    wait_for_drain(&hub, enqueued_total).await;
    Ok(hub)
}

async fn wait_for_drain(hub: &Hub, target: u64) {
    for _ in 0..200 {
        if hub.queue_statistics().processed >= target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
