//! Apache Pulsar connection type: a pluggable
//! [`Connection`] over `pulsar`, for sites that front their OT data with a
//! Pulsar topic rather than MQTT.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock as SyncRwLock;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use pulsar::{Consumer, Producer, Pulsar, SubType, TokioExecutor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;

use r2e_core::connection::{
    emit_status_changed, ConfigSchema, Connection, ConnectionConfiguration, ConnectionDescriptor,
    ConnectionState, FieldType, InputConfiguration, OutputConfiguration, SchemaField, ValidationResult,
};
use r2e_core::events::DataReceivedEvent;
use r2e_core::DataPoint;
use r2e_events::EventBus;
use r2e_utils::decode_leaves_from_bytes;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PulsarConfig {
    service_url: String,
    #[serde(default = "default_subscription")]
    subscription: String,
    #[serde(default)]
    base_topic: String,
}

fn default_subscription() -> String {
    "r2e-hub".to_string()
}

struct Inner {
    producers: HashMap<String, Producer<TokioExecutor>>,
    consumer_task: Option<JoinHandle<()>>,
    client: Option<Pulsar<TokioExecutor>>,
}

pub struct PulsarConnection {
    id: String,
    bus: EventBus,
    state: SyncRwLock<ConnectionState>,
    inner: Mutex<Inner>,
    data_tx: broadcast::Sender<DataReceivedEvent>,
    inputs: AsyncRwLock<HashMap<String, InputConfiguration>>,
    outputs: AsyncRwLock<HashMap<String, OutputConfiguration>>,
    base_topic: AsyncRwLock<String>,
}

impl PulsarConnection {
    fn new(id: String, bus: EventBus) -> Self {
        let (data_tx, _rx) = broadcast::channel(1024);
        Self {
            id,
            bus,
            state: SyncRwLock::new(ConnectionState::Disconnected),
            inner: Mutex::new(Inner { producers: HashMap::new(), consumer_task: None, client: None }),
            data_tx,
            inputs: AsyncRwLock::new(HashMap::new()),
            outputs: AsyncRwLock::new(HashMap::new()),
            base_topic: AsyncRwLock::new(String::new()),
        }
    }

    async fn set_state(&self, new_state: ConnectionState, message: Option<String>) {
        let old_state = {
            let mut state = self.state.write().expect("state lock poisoned");
            let old = *state;
            *state = new_state;
            old
        };
        if old_state != new_state {
            emit_status_changed(&self.bus, &self.id, old_state, new_state, message).await;
        }
    }

    fn spawn_consumer(
        id: String,
        mut consumer: Consumer<Vec<u8>, TokioExecutor>,
        base_topic: Arc<str>,
        data_tx: broadcast::Sender<DataReceivedEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = consumer.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(err) => {
                        tracing::warn!(connection_id = %id, error = %err, "Pulsar consumer error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };
                let payload = message.payload.data.clone();
                let _ = consumer.ack(&message).await;
                let Some(leaves) = decode_leaves_from_bytes(&base_topic, &payload) else {
                    tracing::warn!(connection_id = %id, "dropping undecodable Pulsar payload");
                    continue;
                };
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                for leaf in leaves {
                    let point = DataPoint::new(leaf.topic, leaf.value, id.clone(), "pulsar", leaf.timestamp_ms.unwrap_or(now));
                    let _ = data_tx.send(DataReceivedEvent { point, input_id: "raw".into() });
                }
            }
        })
    }
}

#[async_trait]
impl Connection for PulsarConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }

    async fn initialize(&self, config: ConnectionConfiguration) -> bool {
        let parsed: Result<PulsarConfig, _> = serde_json::from_value(config.typed_config.clone());
        let Ok(cfg) = parsed else {
            self.set_state(ConnectionState::Error, Some("invalid Pulsar configuration".into())).await;
            return false;
        };
        *self.base_topic.write().await = cfg.base_topic.clone();

        let client: Result<Pulsar<_>, _> = Pulsar::builder(&cfg.service_url, TokioExecutor).build().await;
        let Ok(client) = client else {
            self.set_state(ConnectionState::Error, Some("failed to connect to Pulsar".into())).await;
            return false;
        };

        let mut inner = self.inner.lock().await;

        if let Some(input) = config.inputs.iter().find(|i| i.is_enabled) {
            let consumer: Result<Consumer<Vec<u8>, _>, _> = client
                .consumer()
                .with_topic(&input.filter)
                .with_subscription_type(SubType::Shared)
                .with_subscription(&cfg.subscription)
                .build()
                .await;
            match consumer {
                Ok(consumer) => {
                    inner.consumer_task = Some(Self::spawn_consumer(
                        self.id.clone(),
                        consumer,
                        Arc::from(cfg.base_topic.as_str()),
                        self.data_tx.clone(),
                    ));
                }
                Err(_) => {
                    drop(inner);
                    self.set_state(ConnectionState::Error, Some("failed to subscribe to Pulsar topic".into())).await;
                    return false;
                }
            }
        }

        for output in &config.outputs {
            let topic = match &output.topic_prefix {
                Some(prefix) => prefix.clone(),
                None => output.id.clone(),
            };
            if let Ok(producer) = client.producer().with_topic(&topic).build().await {
                inner.producers.insert(output.id.clone(), producer);
            }
        }

        inner.client = Some(client);
        drop(inner);

        for input in config.inputs {
            self.inputs.write().await.insert(input.id.clone(), input);
        }
        for output in config.outputs {
            self.outputs.write().await.insert(output.id.clone(), output);
        }
        true
    }

    async fn start(&self) -> bool {
        self.set_state(ConnectionState::Connecting, None).await;
        if self.inner.lock().await.client.is_none() {
            self.set_state(ConnectionState::Error, Some("start called before initialize".into())).await;
            return false;
        }
        self.set_state(ConnectionState::Connected, None).await;
        true
    }

    async fn stop(&self) -> bool {
        self.set_state(ConnectionState::Stopping, None).await;
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.consumer_task.take() {
            task.abort();
        }
        inner.producers.clear();
        inner.client = None;
        drop(inner);
        self.set_state(ConnectionState::Disconnected, None).await;
        true
    }

    async fn configure_input(&self, cfg: InputConfiguration) -> bool {
        self.inputs.write().await.insert(cfg.id.clone(), cfg);
        true
    }

    async fn remove_input(&self, id: &str) -> bool {
        self.inputs.write().await.remove(id).is_some()
    }

    async fn configure_output(&self, cfg: OutputConfiguration) -> bool {
        self.outputs.write().await.insert(cfg.id.clone(), cfg);
        true
    }

    async fn remove_output(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        inner.producers.remove(id);
        drop(inner);
        self.outputs.write().await.remove(id).is_some()
    }

    /// Pulsar producers are bound to a fixed topic at `initialize` time, so
    /// `output_id` (not `topic`) picks which producer to publish through.
    async fn send_data(&self, _topic: &str, bytes: &[u8], output_id: Option<&str>) -> bool {
        let mut inner = self.inner.lock().await;
        let ids: Vec<String> = match output_id {
            Some(id) => vec![id.to_string()],
            None => inner.producers.keys().cloned().collect(),
        };
        if ids.is_empty() {
            return false;
        }
        let mut ok = true;
        for id in ids {
            if let Some(producer) = inner.producers.get_mut(&id) {
                if producer.send_non_blocking(bytes.to_vec()).await.is_err() {
                    ok = false;
                }
            } else {
                ok = false;
            }
        }
        ok
    }

    fn validate_configuration(&self, config: &ConnectionConfiguration) -> ValidationResult {
        let mut errors = Vec::new();
        match serde_json::from_value::<PulsarConfig>(config.typed_config.clone()) {
            Ok(cfg) if cfg.service_url.trim().is_empty() => errors.push("serviceUrl must not be empty".to_string()),
            Err(e) => errors.push(format!("invalid configuration: {e}")),
            _ => {}
        }
        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings: vec![],
        }
    }

    fn subscribe_data(&self) -> Option<broadcast::Receiver<DataReceivedEvent>> {
        Some(self.data_tx.subscribe())
    }
}

pub struct PulsarDescriptor;

impl ConnectionDescriptor for PulsarDescriptor {
    fn connection_type(&self) -> &str {
        "pulsar"
    }

    fn display_name(&self) -> &str {
        "Apache Pulsar"
    }

    fn connection_schema(&self) -> ConfigSchema {
        ConfigSchema {
            fields: vec![SchemaField {
                name: "serviceUrl".into(),
                display_name: "Service URL".into(),
                field_type: FieldType::Url,
                required: true,
                default: None,
                options: None,
                group: "connection".into(),
                order: 0,
                is_secret: false,
            }],
            groups: vec![],
        }
    }

    fn input_schema(&self) -> ConfigSchema {
        ConfigSchema::default()
    }

    fn output_schema(&self) -> ConfigSchema {
        ConfigSchema::default()
    }

    fn default_config(&self) -> Value {
        serde_json::json!({"serviceUrl": "pulsar://localhost:6650"})
    }

    fn create(&self, connection_id: String, bus: EventBus) -> Arc<dyn Connection> {
        Arc::new(PulsarConnection::new(connection_id, bus))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_service_url_fails_validation() {
        let descriptor = PulsarDescriptor;
        let bus = EventBus::new();
        let conn = descriptor.create("pulsar-1".into(), bus);
        let config = ConnectionConfiguration {
            id: "pulsar-1".into(),
            connection_type: "pulsar".into(),
            name: "pulsar-1".into(),
            is_enabled: true,
            auto_start: true,
            typed_config: serde_json::json!({"serviceUrl": ""}),
            inputs: vec![],
            outputs: vec![],
        };
        let result = conn.validate_configuration(&config);
        assert!(!result.valid);
    }
}
