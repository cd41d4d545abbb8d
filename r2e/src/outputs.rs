//! Output evaluation/publish glue and the model-republish job.
//!
//! [`crate::Hub`] owns the registry of `(connectionId, outputId)` ->
//! connection instance; this module holds the two operations that walk it:
//! per-point change-detection publishing on the hot path, and the periodic
//! namespace-model republish for outputs flagged `isModelExport`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use r2e_core::connection::{Connection, OutputConfiguration};
use r2e_core::hierarchy::HierarchyRegistry;
use r2e_core::namespace::NamespaceRegistry;
use r2e_core::publisher::{build_model_document, render, OutputPublisher};
use r2e_core::DataPoint;
use r2e_scheduler::{ScheduleConfig, Scheduler};

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One registered output, paired with the connection instance it publishes
/// through. Looked up by `(connection_id, output_id)` when a connection is
/// reconfigured and by full scan when a `DataPoint` needs evaluating
/// against every matching output.
pub(crate) struct RegisteredOutput {
    pub connection: Arc<dyn Connection>,
    pub config: OutputConfiguration,
}

/// Evaluate `point` against every registered output and hand matching,
/// rate-limit-cleared sends to their connection. A send the connection
/// rejects (`send_data` returns `false`) never commits change-detection
/// state, so the next matching point gets another chance.
pub(crate) async fn evaluate_and_publish(
    outputs: &DashMap<(String, String), RegisteredOutput>,
    publisher: &OutputPublisher,
    point: &DataPoint,
) {
    // Collect matches first: holding a `DashMap` iterator across an `.await`
    // would deadlock against a concurrent `insert`/`remove`.
    let candidates: Vec<(Arc<dyn Connection>, OutputConfiguration)> = outputs
        .iter()
        .map(|entry| (entry.connection.clone(), entry.config.clone()))
        .collect();

    for (connection, config) in candidates {
        let Some(pending) = publisher.evaluate(&config, point) else {
            continue;
        };
        let sent = connection
            .send_data(&pending.topic, &pending.bytes, Some(config.id.as_str()))
            .await;
        if sent {
            pending.commit();
        } else {
            tracing::warn!(
                connection_id = connection.connection_id(),
                output_id = %config.id,
                topic = %point.source_topic,
                "output publish failed; change-detection state not advanced"
            );
        }
    }
}

/// Register the periodic model-republish job: every output flagged
/// `is_model_export` gets the current namespace forest pushed to its
/// connection once every `republish_interval_minutes`, independent of
/// change-detection.
pub fn register_model_republish(
    scheduler: &Scheduler,
    outputs: Arc<DashMap<(String, String), RegisteredOutput>>,
    namespace: Arc<NamespaceRegistry>,
    hierarchy: Arc<HierarchyRegistry>,
) {
    let last_republish: Arc<DashMap<String, i64>> = Arc::new(DashMap::new());
    scheduler.register(
        "model-republish",
        ScheduleConfig::Interval(std::time::Duration::from_secs(60)),
        Arc::new(move || {
            let outputs = outputs.clone();
            let namespace = namespace.clone();
            let hierarchy = hierarchy.clone();
            let last_republish = last_republish.clone();
            Box::pin(async move {
                let exporters: Vec<(Arc<dyn Connection>, OutputConfiguration)> = outputs
                    .iter()
                    .filter(|e| e.config.is_model_export)
                    .map(|e| (e.connection.clone(), e.config.clone()))
                    .collect();
                if exporters.is_empty() {
                    return;
                }

                let forest = namespace.namespace_structure(&hierarchy);
                let now = now_millis();
                for (connection, config) in exporters {
                    let interval_ms = config.republish_interval_minutes.unwrap_or(0) as i64 * 60_000;
                    let due = match last_republish.get(&config.id) {
                        Some(last) => now.saturating_sub(*last) >= interval_ms,
                        None => true,
                    };
                    if !due {
                        continue;
                    }

                    let document = build_model_document(&config, &forest);
                    let point = DataPoint::new(
                        config.id.clone(),
                        document.payload,
                        connection.connection_id(),
                        "model-export",
                        now,
                    );
                    let (topic, bytes) = render(&config, &point);
                    if connection.send_data(&topic, &bytes, Some(config.id.as_str())).await {
                        last_republish.insert(config.id.clone(), now);
                    }
                }
            })
        }),
    );
}
